//! Single-endpoint gateway to the control plane.

use std::future::Future;
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::credential::{Credential, KubeToken};
use super::error::{classify_graphql_message, is_schema_skew, is_transient, Error, Result};
use super::kubetoken_cache::KubeTokenCache;
use crate::context::User;

/// Typed gateway to a single control-plane endpoint. Holds no long-lived
/// state beyond the underlying HTTP client.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: Value,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

impl ApiClient {
    /// Builds an HTTP client attaching the bearer token on every request,
    /// optionally pinning a CA or allowing insecure TLS (process-wide flag).
    pub fn new(
        base_url: &str,
        token: &str,
        ca_pem: Option<&[u8]>,
        insecure_tls: bool,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(60));

        if let Some(pem) = ca_pem {
            let cert = reqwest::Certificate::from_pem(pem).map_err(Error::Request)?;
            builder = builder.add_root_certificate(cert);
        }
        if insecure_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build().map_err(Error::Request)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn graphql_url(&self) -> String {
        format!("{}/graphql", self.base_url)
    }

    fn kube_token_url(&self, namespace: &str) -> String {
        format!("{}/auth/kubetoken/{namespace}", self.base_url)
    }

    fn sse_logs_url(&self, namespace: &str, name: &str, action: &str) -> String {
        format!(
            "{}/sse/logs/{namespace}/gitdeploy/{name}?action={action}",
            self.base_url
        )
    }

    /// Runs `call` once, and again exactly once more if it fails with a
    /// transient transport error. The error substring match happens on
    /// `{:#}` formatting of the returned error so nested causes are
    /// included.
    async fn with_one_retry<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match call().await {
            Ok(v) => Ok(v),
            Err(e) => {
                if is_transient(&format!("{e:#}")) {
                    tracing::warn!(error = %e, "transient transport error, retrying once");
                    call().await
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        self.with_one_retry(|| self.graphql_once(query, variables.clone()))
            .await
    }

    async fn graphql_once<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let resp = self
            .http
            .post(self.graphql_url())
            .bearer_auth(&self.token)
            .json(&GraphQlRequest { query, variables })
            .send()
            .await?;

        let status = resp.status();
        let body: GraphQlResponse<T> = resp.json().await.map_err(Error::Request)?;

        if let Some(errors) = body.errors {
            let message = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            if !status.is_success() && message.to_lowercase().contains("401") {
                return Err(Error::Unauthorized);
            }
            return Err(classify_graphql_message(&message));
        }

        body.data.ok_or_else(|| Error::Other("empty GraphQL response".to_string()))
    }

    /// User identity + credential for `namespace` + platform variables, in
    /// one round-trip. Retries once on transient error; falls back to a
    /// narrower query on schema skew.
    pub async fn get_context(&self, namespace: &str) -> Result<UserContext> {
        const RICH_QUERY: &str = "query GetContext($ns: String!) { me { id name email token registryUrl buildkitUrl certificate globalNamespace telemetryEnabled } variables(ns: $ns) { name value } }";
        const NARROW_QUERY: &str = "query GetContext($ns: String!) { me { id name email token } variables(ns: $ns) { name value } }";

        let vars = serde_json::json!({ "ns": namespace });
        match self.graphql::<RawUserContext>(RICH_QUERY, vars.clone()).await {
            Ok(raw) => Ok(raw.into_user_context()),
            Err(Error::GraphQl(message)) if is_schema_skew(&message) => {
                let raw: RawUserContext = self.graphql(NARROW_QUERY, vars).await?;
                let mut ctx = raw.into_user_context();
                // Fields the narrow query can't ask for: fall back to
                // reasonable defaults.
                ctx.user.analytics = true;
                ctx.user.global_namespace = "okteto".to_string();
                Ok(ctx)
            }
            Err(e) => Err(e),
        }
    }

    /// Empty server URL means "cluster not yet ready".
    pub async fn get_credentials(&self, namespace: &str) -> Result<Credential> {
        const QUERY: &str = "query GetCredentials($ns: String!) { credentials(ns: $ns) { server certificate token namespace } }";
        #[derive(Deserialize)]
        struct Data {
            credentials: Credential,
        }
        let vars = serde_json::json!({ "ns": namespace });
        let data: Data = self.graphql(QUERY, vars).await?;
        if data.credentials.server.is_empty() {
            return Err(Error::ClusterNotReady);
        }
        Ok(data.credentials)
    }

    /// Consults the on-disk cache before calling the network; writes back
    /// on success.
    pub async fn get_kube_token(&self, context_key: &str, namespace: &str) -> Result<KubeToken> {
        let mut cache = KubeTokenCache::load()?;
        if let Some(cached) = cache.get(context_key, namespace) {
            return Ok(cached.clone());
        }

        let url = self.kube_token_url(namespace);
        let resp = self
            .with_one_retry(|| async {
                self.http
                    .get(&url)
                    .bearer_auth(&self.token)
                    .send()
                    .await
                    .map_err(Error::Request)
            })
            .await?;

        let status = resp.status();
        match status.as_u16() {
            200 => {
                let token: KubeToken = resp.json().await.map_err(Error::Request)?;
                cache.set(context_key, namespace, token.clone());
                cache.save()?;
                Ok(token)
            }
            401 => Err(Error::Unauthorized),
            404 => Err(Error::KubeTokenUnsupported),
            other => {
                let body = resp.text().await.unwrap_or_default();
                Err(Error::Status { status: other, path: url, body })
            }
        }
    }

    /// Either an "available" fragment or a "waiting" fragment. A schema
    /// error mentioning both "Cannot query field" and the endpoint field is
    /// mapped to `IncompatibleBackend` so the caller can fall back.
    pub async fn get_least_loaded_buildkit_pod(
        &self,
        build_request_id: &str,
    ) -> Result<BuildkitPodStatus> {
        const QUERY: &str = "query GetLeastLoadedBuildkitPod($id: String!) { leastLoadedBuildkitPod(buildRequestId: $id) { ... on AvailableBuildkitPod { name ip } ... on WaitingBuildkitPod { reason queuePosition queueLength } } }";
        const FIELD: &str = "leastLoadedBuildkitPod";

        let vars = serde_json::json!({ "id": build_request_id });
        match self.graphql::<BuildkitPodStatus>(QUERY, vars).await {
            Ok(status) => Ok(status),
            Err(Error::GraphQl(message))
                if is_schema_skew(&message) && message.contains(FIELD) =>
            {
                Err(Error::IncompatibleBackend { field: FIELD.to_string() })
            }
            Err(e) => Err(e),
        }
    }

    /// Flattened list of URLs belonging to `deployer`, prefixed
    /// `"(external)"` for external-type components.
    pub async fn list_endpoints(&self, namespace: &str, deployer: &str) -> Result<Vec<String>> {
        const QUERY: &str = "query ListEndpoints($ns: String!, $deployer: String!) { endpoints(ns: $ns, deployer: $deployer) { url kind } }";
        #[derive(Deserialize)]
        struct Endpoint {
            url: String,
            kind: String,
        }
        #[derive(Deserialize)]
        struct Data {
            endpoints: Vec<Endpoint>,
        }
        let vars = serde_json::json!({ "ns": namespace, "deployer": deployer });
        let data: Data = self.graphql(QUERY, vars).await?;
        Ok(data
            .endpoints
            .into_iter()
            .map(|e| {
                if e.kind == "external" {
                    format!("(external) {}", e.url)
                } else {
                    e.url
                }
            })
            .collect())
    }

    /// Status of an asynchronous control-plane action (namespace or
    /// pipeline create/destroy), for the Engine's poll loop.
    pub async fn get_action(&self, namespace: &str, name: &str) -> Result<String> {
        const QUERY: &str = "query GetAction($ns: String!, $name: String!) { action(ns: $ns, name: $name) { name status } }";
        #[derive(Deserialize)]
        struct Action {
            status: String,
        }
        #[derive(Deserialize)]
        struct Data {
            action: Action,
        }
        let vars = serde_json::json!({ "ns": namespace, "name": name });
        let data: Data = self.graphql(QUERY, vars).await?;
        Ok(data.action.status)
    }

    /// Follows an SSE line stream, invoking `on_line` for each `data:` line.
    /// `on_line` returns `true` to stop; the stream also stops naturally on
    /// `stage="done"` + `message="EOF"`.
    pub async fn stream_pipeline_logs<F>(
        &self,
        name: &str,
        namespace: &str,
        action: &str,
        mut on_line: F,
    ) -> Result<()>
    where
        F: FnMut(&str) -> bool,
    {
        use futures::StreamExt;

        let url = self.sse_logs_url(namespace, name, action);
        let resp = self.http.get(&url).bearer_auth(&self.token).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Status { status, path: url, body });
        }

        let mut stream = resp.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(Error::Request)?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(idx) = buffer.find('\n') {
                let line = buffer[..idx].trim_end_matches('\r').to_string();
                buffer.drain(..=idx);

                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                let stop = on_line(data);

                let is_eof = serde_json::from_str::<Value>(data)
                    .ok()
                    .and_then(|v| {
                        let stage = v.get("stage")?.as_str()?.to_string();
                        let message = v.get("message")?.as_str()?.to_string();
                        Some(stage == "done" && message == "EOF")
                    })
                    .unwrap_or(false);

                if stop || is_eof {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RawUserContext {
    me: RawUser,
    #[serde(default)]
    variables: Vec<RawVariable>,
}

#[derive(Debug, Deserialize)]
struct RawVariable {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: String,
    name: String,
    email: String,
    token: String,
    #[serde(default)]
    #[serde(rename = "registryUrl")]
    registry_url: Option<String>,
    #[serde(default)]
    #[serde(rename = "buildkitUrl")]
    buildkit_url: Option<String>,
    #[serde(default)]
    certificate: Option<String>,
    #[serde(default)]
    #[serde(rename = "globalNamespace")]
    global_namespace: Option<String>,
    #[serde(default)]
    #[serde(rename = "telemetryEnabled")]
    telemetry_enabled: Option<bool>,
}

impl RawUserContext {
    fn into_user_context(self) -> UserContext {
        UserContext {
            user: User {
                id: self.me.id.clone(),
                display_name: self.me.name,
                external_id: self.me.id,
                email: self.me.email,
                token: self.me.token,
                is_new: false,
                registry_url: self.me.registry_url,
                builder_url: self.me.buildkit_url,
                certificate: self.me.certificate,
                global_namespace: self.me.global_namespace.unwrap_or_else(|| "okteto".to_string()),
                analytics: self.me.telemetry_enabled.unwrap_or(true),
            },
            platform_variables: self
                .variables
                .into_iter()
                .map(|v| (v.name, v.value))
                .collect(),
        }
    }
}

/// Result of [`ApiClient::get_context`]: user identity plus the platform
/// ("secrets") variables for the namespace.
#[derive(Clone, Debug)]
pub struct UserContext {
    pub user: User,
    pub platform_variables: Vec<(String, String)>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum BuildkitPodStatus {
    Available { name: String, ip: String },
    Waiting { reason: String, #[serde(rename = "queuePosition")] queue_position: i32, #[serde(rename = "queueLength")] queue_length: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_endpoints_external_prefix() {
        // Exercises the pure mapping logic without a network round-trip.
        let urls = vec![
            ("https://api.example".to_string(), "internal"),
            ("https://ext.example".to_string(), "external"),
        ];
        let mapped: Vec<String> = urls
            .into_iter()
            .map(|(url, kind)| {
                if kind == "external" {
                    format!("(external) {url}")
                } else {
                    url
                }
            })
            .collect();
        assert_eq!(
            mapped,
            vec![
                "https://api.example".to_string(),
                "(external) https://ext.example".to_string()
            ]
        );
    }
}
