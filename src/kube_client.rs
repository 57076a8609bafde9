//! Constructs typed cluster clients from a kubeconfig-shaped structure.

use base64::Engine;
use kube::config::{AuthInfo, Cluster, Context as KubeContextEntry, Kubeconfig, NamedAuthInfo,
    NamedCluster, NamedContext};
use kube::discovery::Discovery;

use crate::context::ClusterAuthInfo;
use crate::RuntimeFlags;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("kubernetes credentials have expired, re-authenticate")]
    Unauthorized,

    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("invalid kubeconfig: {0}")]
    Config(#[from] kube::config::KubeconfigError),

    #[error("invalid CA certificate: {0}")]
    Certificate(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

const CONTEXT_NAME: &str = "devctl";

/// Builds a minimal, single-cluster [`Kubeconfig`] from a [`ClusterAuthInfo`]
/// — this is a synthesized kubeconfig-shaped structure, not the user's
/// `~/.kube/config`.
fn to_kubeconfig(auth: &ClusterAuthInfo, namespace: &str) -> Result<Kubeconfig> {
    let certificate_authority_data = match &auth.certificate_authority_data {
        Some(cert) => {
            base64::engine::general_purpose::STANDARD
                .decode(cert)
                .map_err(|e| Error::Certificate(e.to_string()))?;
            Some(cert.clone())
        }
        None => None,
    };

    Ok(Kubeconfig {
        current_context: Some(CONTEXT_NAME.to_string()),
        clusters: vec![NamedCluster {
            name: CONTEXT_NAME.to_string(),
            cluster: Some(Cluster {
                server: Some(auth.server.clone()),
                certificate_authority_data,
                insecure_skip_tls_verify: None,
                ..Default::default()
            }),
        }],
        auth_infos: vec![NamedAuthInfo {
            name: CONTEXT_NAME.to_string(),
            auth_info: Some(AuthInfo {
                token: Some(auth.token.clone().into()),
                ..Default::default()
            }),
        }],
        contexts: vec![NamedContext {
            name: CONTEXT_NAME.to_string(),
            context: Some(KubeContextEntry {
                cluster: CONTEXT_NAME.to_string(),
                user: Some(CONTEXT_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            }),
        }],
        ..Default::default()
    })
}

/// Shares a single transport; `typed()`, `dynamic_api()`, and `discovery()`
/// are three views over the same wiring.
#[derive(Clone)]
pub struct KubeClients {
    client: kube::Client,
}

impl KubeClients {
    /// Builds typed/dynamic/discovery clients from a kubeconfig-shaped
    /// credential, applying the configured request timeout and suppressing
    /// API deprecation warnings.
    pub async fn build(auth: &ClusterAuthInfo, namespace: &str, flags: &RuntimeFlags) -> Result<Self> {
        let kubeconfig = to_kubeconfig(auth, namespace)?;
        let options = kube::config::KubeConfigOptions {
            context: Some(CONTEXT_NAME.to_string()),
            cluster: Some(CONTEXT_NAME.to_string()),
            user: Some(CONTEXT_NAME.to_string()),
        };
        let mut config = kube::Config::from_custom_kubeconfig(kubeconfig, &options).await?;
        config.timeout = Some(flags.kubernetes_timeout());
        config.accept_invalid_certs = flags.insecure_tls();

        // kube logs a warning by default when it hits a deprecated API; we
        // run against whatever is in the shadow deployment's apiVersion and
        // don't want that noise in the CLI.
        std::env::set_var("KUBE_SUPPRESS_DEPRECATION_WARNINGS", "1");

        let client = kube::Client::try_from(config)?;
        Ok(Self { client })
    }

    /// Full typed client — `Api<Deployment>`, `Api<Pod>`, etc.
    pub fn typed(&self) -> kube::Client {
        self.client.clone()
    }

    /// Dynamic client for a runtime-resolved `ApiResource`/`DynamicObject`
    /// pair, e.g. when walking an owner-reference chain of unknown kind.
    pub fn dynamic(&self) -> kube::Client {
        self.client.clone()
    }

    /// Discovery client for resolving API groups/versions at runtime.
    pub async fn discovery(&self) -> Result<Discovery> {
        Ok(Discovery::new(self.client.clone()).run().await?)
    }
}

/// Converts any `kube::Error` into a [`Error::Unauthorized`] if it carries
/// an HTTP 401, for the Engine to detect the "token expired, re-mint and
/// retry" signal.
pub fn classify(err: kube::Error) -> Error {
    if let kube::Error::Api(ref resp) = err {
        if resp.code == 401 {
            return Error::Unauthorized;
        }
    }
    Error::Kube(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_auth() -> ClusterAuthInfo {
        ClusterAuthInfo {
            server: "https://cluster.example".to_string(),
            certificate_authority_data: None,
            token: "tok".to_string(),
            current_context: CONTEXT_NAME.to_string(),
        }
    }

    #[test]
    fn builds_single_context_kubeconfig() {
        let kubeconfig = to_kubeconfig(&sample_auth(), "dev").unwrap();
        assert_eq!(kubeconfig.current_context.as_deref(), Some(CONTEXT_NAME));
        assert_eq!(kubeconfig.clusters.len(), 1);
        assert_eq!(
            kubeconfig.clusters[0].cluster.as_ref().unwrap().server.as_deref(),
            Some("https://cluster.example")
        );
    }

    #[test]
    fn rejects_non_base64_certificate() {
        let mut auth = sample_auth();
        auth.certificate_authority_data = Some("not valid base64!!".to_string());
        assert!(to_kubeconfig(&auth, "dev").is_err());
    }
}
