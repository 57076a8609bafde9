//! `devctl up` — activate dev mode for a manifest.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::context::{self, url_to_cluster_context_key};
use crate::engine::Session;
use crate::kube_client::KubeClients;
use crate::manifest::DevManifest;
use crate::{RuntimeFlags, NAME_ENV};

const POD_READY_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Clone, Debug, Args)]
pub struct UpArgs {
    /// Path to the manifest file. Defaults to `devctl.yml` in the current
    /// directory.
    #[clap(default_value = "devctl.yml")]
    pub manifest: PathBuf,

    /// Namespace to activate in; defaults to the current context's.
    #[clap(long)]
    pub namespace: Option<String>,
}

pub async fn run(args: &UpArgs, flags: &RuntimeFlags) -> Result<()> {
    if std::env::var(NAME_ENV).is_ok() {
        anyhow::bail!("devctl up cannot be run from inside a development container");
    }

    let raw = std::fs::read_to_string(&args.manifest)
        .with_context(|| format!("reading manifest {}", args.manifest.display()))?;
    let manifest: DevManifest = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing manifest {}", args.manifest.display()))?;
    let manifest = manifest.normalize_and_validate().context("invalid manifest")?;

    let store = context::ContextStore::load()?;
    let ctx = store.current().context("no current context; run `devctl context <url>` first")?;
    let namespace = args.namespace.clone().unwrap_or_else(|| ctx.namespace.clone());

    let api = ApiClient::new(&ctx.url, &ctx.token, None, flags.insecure_tls())?;
    let context_key = url_to_cluster_context_key(&ctx.url);
    let kube_token = api.get_kube_token(&context_key, &namespace).await?;

    let mut auth = ctx.cluster.clone();
    auth.token = kube_token.status.token;
    let mut kube = KubeClients::build(&auth, &namespace, flags).await?;

    tracing::info!(name = %manifest.name, %namespace, "activating dev mode");

    let mut session = Session::new(manifest, &namespace);
    let cancel = CancellationToken::new();

    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        })
    };

    let result = session.dev_mode_on(&mut kube, &api, flags, POD_READY_TIMEOUT, &cancel).await;
    if let Err(e) = result {
        tracing::error!(error = %e, "failed to activate dev mode");
        ctrl_c.abort();
        session.dev_mode_off(&mut kube, &api, flags).await.ok();
        return Err(e.into());
    }

    tracing::info!(pod = session.pod_name().unwrap_or("<unknown>"), "development container running, press Ctrl-C to stop");
    let run_result = session.run_until_cancelled(&cancel).await;
    ctrl_c.abort();
    if let Err(e) = run_result {
        tracing::error!(error = %e, "development session failed while running");
        session.dev_mode_off(&mut kube, &api, flags).await.ok();
        return Err(e.into());
    }

    session
        .dev_mode_off(&mut kube, &api, flags)
        .await
        .context("tearing down development session")?;
    Ok(())
}
