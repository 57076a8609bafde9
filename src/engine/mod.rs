//! Development Session Engine: owns the live [`Session`] state machine
//! that swaps a running workload for a synced dev container.

pub mod actions;
pub mod app;
pub mod envs;
mod shadow;

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::Api;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::context::ClusterAuthInfo;
use crate::kube_client::KubeClients;
use crate::manifest::DevManifest;
use crate::supervisor::{self, MountSpec, Supervisor};
use crate::RuntimeFlags;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("application {0:?} not found")]
    AppNotFound(String),

    #[error("failed to start development session: {0}")]
    StartError(String),

    #[error("pipeline {name:?} failed")]
    PipelineFailed { name: String },

    #[error("pipeline {name:?} timed out after {timeout:?}")]
    PipelineTimeout { name: String, timeout: Duration },

    #[error("{0}")]
    SecretNotFound(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    KubeClient(#[from] crate::kube_client::Error),

    #[error(transparent)]
    Api(#[from] crate::api::Error),

    #[error(transparent)]
    Supervisor(#[from] crate::supervisor::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Lifecycle states of one development Session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Preparing,
    Activating,
    Syncing,
    Running,
    TearingDown,
    Failed(String),
}

/// The Engine's live record for one activation: manifest snapshot, resolved
/// app/pod references, aggregated environment, and the Supervisor it owns.
/// Created by `dev_mode_on`, destroyed by `dev_mode_off` or fatal error.
pub struct Session {
    pub state: State,
    pub manifest: DevManifest,
    pub namespace: String,
    app_name: String,
    pod_name: Option<String>,
    environment: Vec<(String, String)>,
    supervisor: Option<Supervisor>,
}

impl Session {
    pub fn new(manifest: DevManifest, namespace: &str) -> Self {
        let app_name = manifest.name.clone();
        Self {
            state: State::Idle,
            manifest,
            namespace: namespace.to_string(),
            app_name,
            pod_name: None,
            environment: Vec::new(),
            supervisor: None,
        }
    }

    pub fn environment(&self) -> &[(String, String)] {
        &self.environment
    }

    pub fn pod_name(&self) -> Option<&str> {
        self.pod_name.as_deref()
    }

    /// Drives `Idle -> Preparing -> Activating -> Syncing -> Running`.
    /// On failure the Session moves to `Failed` with the error preserved;
    /// any partial side effects (shadow created, pod never ready) are left
    /// for [`Self::dev_mode_off`] to revert.
    pub async fn dev_mode_on(
        &mut self,
        kube: &mut KubeClients,
        api: &ApiClient,
        flags: &RuntimeFlags,
        pod_ready_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let outcome = self.run_activation(kube, api, flags, pod_ready_timeout, cancel).await;
        if let Err(ref e) = outcome {
            self.state = State::Failed(e.to_string());
        }
        outcome
    }

    /// Runs a Kubernetes call against the current client; on a 401
    /// (classified by `kube_client::classify`) it mints a fresh credential
    /// from the control plane, rebuilds `kube` in place, and retries `call`
    /// exactly once. Any other error, including a repeated 401 on the
    /// retry, propagates unchanged.
    async fn with_remint<T, F, Fut>(
        &self,
        kube: &mut KubeClients,
        api: &ApiClient,
        flags: &RuntimeFlags,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut(kube::Client) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        match call(kube.typed()).await {
            Ok(v) => Ok(v),
            Err(Error::Kube(kube_err)) => match crate::kube_client::classify(kube_err) {
                crate::kube_client::Error::Unauthorized => {
                    tracing::warn!(namespace = %self.namespace, "kubernetes credentials expired, re-minting");
                    let credential = api.get_credentials(&self.namespace).await?;
                    let auth = ClusterAuthInfo {
                        server: credential.server,
                        certificate_authority_data: (!credential.certificate.is_empty()).then_some(credential.certificate),
                        token: credential.token,
                        current_context: String::new(),
                    };
                    *kube = KubeClients::build(&auth, &self.namespace, flags).await?;
                    call(kube.typed()).await
                }
                other => Err(Error::KubeClient(other)),
            },
            Err(other) => Err(other),
        }
    }

    async fn run_activation(
        &mut self,
        kube: &mut KubeClients,
        api: &ApiClient,
        flags: &RuntimeFlags,
        pod_ready_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.state = State::Preparing;
        let (target, shadow) = self.prepare(kube, api, flags).await?;

        self.state = State::Activating;
        let shadow_uid = shadow.metadata.uid.clone().ok_or_else(|| {
            Error::StartError("shadow deployment has no uid".to_string())
        })?;
        let shadow_revision = shadow
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(shadow::REVISION_ANNOTATION))
            .cloned()
            .unwrap_or_default();
        let namespace = self.namespace.clone();
        let pod = tokio::select! {
            result = self.with_remint(kube, api, flags, |client| {
                let namespace = namespace.clone();
                let shadow_uid = shadow_uid.clone();
                let shadow_revision = shadow_revision.clone();
                async move { app::select_pod(client, &namespace, &shadow_uid, &shadow_revision, pod_ready_timeout).await }
            }) => result?,
            _ = cancel.cancelled() => return Err(Error::StartError("cancelled while activating".to_string())),
        };
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        self.pod_name = Some(pod_name.clone());

        self.state = State::Syncing;
        self.environment = self.aggregate_environment(kube, api, flags, &target, &pod).await?;
        self.start_supervisor(kube, pod_name.as_str()).await?;

        self.state = State::Running;
        Ok(())
    }

    async fn prepare(&mut self, kube: &mut KubeClients, api: &ApiClient, flags: &RuntimeFlags) -> Result<(app::TargetApp, Deployment)> {
        let namespace = self.namespace.clone();
        let app_name = self.app_name.clone();

        let target = self
            .with_remint(kube, api, flags, |client| {
                let namespace = namespace.clone();
                let app_name = app_name.clone();
                async move { app::resolve_app(client, &namespace, &app_name).await }
            })
            .await?;

        let existing = self
            .with_remint(kube, api, flags, |client| {
                let namespace = namespace.clone();
                let app_name = app_name.clone();
                async move { app::get_shadow(client, &namespace, &app_name).await }
            })
            .await?;

        // Stop anything in the original pod that would hold the work-dir
        // open before the container swap lands, per the cleaner contract.
        if let Some(original_uid) = target.uid() {
            let running_pod = self
                .with_remint(kube, api, flags, |client| {
                    let namespace = namespace.clone();
                    let original_uid = original_uid.clone();
                    async move { app::find_running_pod(client, &namespace, &original_uid, None).await }
                })
                .await?;
            if let Some(pod) = running_pod {
                if let Some(pod_name) = pod.metadata.name {
                    supervisor::clean(kube.typed(), &self.namespace, &pod_name, &self.manifest.container).await?;
                }
            }
        }

        let shadow_name = app::shadow_name(&self.app_name);
        let shadow = match existing {
            Some(_) => {
                let patch = shadow::refresh_patch(&target, &self.manifest)?;
                self.with_remint(kube, api, flags, |client| {
                    let namespace = namespace.clone();
                    let shadow_name = shadow_name.clone();
                    let patch = patch.clone();
                    async move { app::patch_shadow(client, &namespace, &shadow_name, patch).await }
                })
                .await?
            }
            None => {
                let new_shadow = shadow::build(&target, &self.manifest)?;
                self.with_remint(kube, api, flags, |client| {
                    let namespace = namespace.clone();
                    let new_shadow = new_shadow.clone();
                    async move { app::create_shadow(client, &namespace, new_shadow).await }
                })
                .await?
            }
        };

        Ok((target, shadow))
    }

    /// Environment aggregation, ordered low-to-high
    /// precedence: image env, platform variables, dev config-map
    /// variables, the pod's existing env, then the manifest's.
    async fn aggregate_environment(
        &self,
        kube: &mut KubeClients,
        api: &ApiClient,
        flags: &RuntimeFlags,
        _target: &app::TargetApp,
        pod: &k8s_openapi::api::core::v1::Pod,
    ) -> Result<Vec<(String, String)>> {
        let context = api.get_context(&self.namespace).await?;

        let namespace = self.namespace.clone();
        let configmap_vars = self
            .with_remint(kube, api, flags, |client| {
                let namespace = namespace.clone();
                async move { envs::fetch_configmap_vars(client, &namespace, "okteto-env-vars").await }
            })
            .await?;
        let container = self.manifest.container.clone();
        let pod_env = self
            .with_remint(kube, api, flags, |client| {
                let namespace = namespace.clone();
                let container = container.clone();
                let pod = pod.clone();
                async move { envs::fetch_pod_env(client, &namespace, &pod, &container).await }
            })
            .await?;

        let sources = envs::EnvSources {
            // Image-baked vars are never introspected; this crate has no
            // registry client to pull the image config from. Always empty,
            // and the lowest-precedence source so it never wins anyway.
            image_env: Vec::new(),
            platform_vars: context.platform_variables,
            configmap_vars,
            pod_env,
            manifest_env: self.manifest.env.iter().map(|e| (e.name.clone(), e.value.clone())).collect(),
        };

        Ok(envs::aggregate(sources))
    }

    async fn start_supervisor(&mut self, kube: &mut KubeClients, pod_name: &str) -> Result<()> {
        let mut supervisor = Supervisor::new();

        let work_dir = self.manifest.work_dir.clone().unwrap_or_default();
        let mount = MountSpec {
            namespace: self.namespace.clone(),
            pod_name: pod_name.to_string(),
            container: self.manifest.container.clone(),
            local_path: ".".to_string(),
            remote_path: work_dir.path,
        };
        supervisor.start_sync(&mount)?;
        if let Some(handle) = supervisor.sync_handle_mut() {
            crate::supervisor::Synchronizer::wait_ready(handle).await?;
        }

        supervisor
            .start_forwards(kube.typed(), &self.namespace, pod_name, &self.manifest.forward)
            .await?;

        self.supervisor = Some(supervisor);
        Ok(())
    }

    /// Drives the `Running` state: waits for `cancel`, meanwhile polling the
    /// Supervisor for an unexpected synchronizer exit and restarting it per
    /// its restart-window policy. Returns `Ok(())` once `cancel` fires;
    /// escalates to `Failed` and returns the error if the restart budget is
    /// exhausted.
    pub async fn run_until_cancelled(&mut self, cancel: &CancellationToken) -> Result<()> {
        const POLL_INTERVAL: Duration = Duration::from_secs(2);
        let mut ticker = tokio::time::interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    if let Some(supervisor) = self.supervisor.as_mut() {
                        if let Err(e) = supervisor.check_sync() {
                            let err = Error::Supervisor(e);
                            self.state = State::Failed(err.to_string());
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    /// Drives `Running|* -> TearingDown -> Idle`: stops the Supervisor,
    /// drains its outputs, then removes the shadow deployment. A 404 on
    /// deletion means there was nothing to tear down; any other error
    /// propagates instead of being swallowed, matching `devctl down`'s
    /// deletion handling.
    pub async fn dev_mode_off(&mut self, kube: &mut KubeClients, api: &ApiClient, flags: &RuntimeFlags) -> Result<()> {
        self.state = State::TearingDown;

        if let Some(supervisor) = self.supervisor.take() {
            supervisor.stop().await?;
        }

        let shadow_name = app::shadow_name(&self.app_name);
        let namespace = self.namespace.clone();
        self.with_remint(kube, api, flags, |client| {
            let namespace = namespace.clone();
            let shadow_name = shadow_name.clone();
            async move {
                let deployments: Api<Deployment> = Api::namespaced(client, &namespace);
                match deployments.delete(&shadow_name, &Default::default()).await {
                    Ok(_) => Ok(()),
                    Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
        })
        .await?;

        self.pod_name = None;
        self.environment.clear();
        self.state = State::Idle;
        Ok(())
    }

    /// Polls an asynchronous control-plane action to completion.
    pub async fn wait_for_action(&self, api: &ApiClient, namespace: &str, name: &str, deadline: Duration) -> Result<()> {
        actions::poll_until_terminal(name, deadline, || api.get_action(namespace, name)).await
    }
}
