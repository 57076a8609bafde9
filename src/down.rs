//! `devctl down` — tear down a previously activated dev mode shadow.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::api::{Api, DeleteParams};

use crate::api::ApiClient;
use crate::context::{self, url_to_cluster_context_key};
use crate::engine::app::shadow_name;
use crate::kube_client::KubeClients;
use crate::manifest::DevManifest;
use crate::{RuntimeFlags, NAME_ENV};

#[derive(Clone, Debug, Args)]
pub struct DownArgs {
    /// Path to the manifest file, used only to resolve the app name.
    #[clap(default_value = "devctl.yml")]
    pub manifest: PathBuf,

    #[clap(long)]
    pub namespace: Option<String>,
}

pub async fn run(args: &DownArgs, flags: &RuntimeFlags) -> Result<()> {
    if std::env::var(NAME_ENV).is_ok() {
        anyhow::bail!("devctl down cannot be run from inside a development container");
    }

    let raw = std::fs::read_to_string(&args.manifest)
        .with_context(|| format!("reading manifest {}", args.manifest.display()))?;
    let manifest: DevManifest = serde_yaml::from_str(&raw)?;
    let manifest = manifest.normalize_and_validate().context("invalid manifest")?;

    let store = context::ContextStore::load()?;
    let ctx = store.current().context("no current context; run `devctl context <url>` first")?;
    let namespace = args.namespace.clone().unwrap_or_else(|| ctx.namespace.clone());

    let api = ApiClient::new(&ctx.url, &ctx.token, None, flags.insecure_tls())?;
    let context_key = url_to_cluster_context_key(&ctx.url);
    let kube_token = api.get_kube_token(&context_key, &namespace).await?;

    let mut auth = ctx.cluster.clone();
    auth.token = kube_token.status.token;
    let kube = KubeClients::build(&auth, &namespace, flags).await?;

    let name = shadow_name(&manifest.name);
    let deployments: Api<Deployment> = Api::namespaced(kube.typed(), &namespace);
    let stateful_sets: Api<StatefulSet> = Api::namespaced(kube.typed(), &namespace);

    let removed = match deployments.delete(&name, &DeleteParams::default()).await {
        Ok(_) => true,
        Err(kube::Error::Api(e)) if e.code == 404 => false,
        Err(e) => return Err(e.into()),
    };

    let removed = removed
        || match stateful_sets.delete(&name, &DeleteParams::default()).await {
            Ok(_) => true,
            Err(kube::Error::Api(e)) if e.code == 404 => false,
            Err(e) => return Err(e.into()),
        };

    if removed {
        tracing::info!(%name, "shadow deployment removed");
    } else {
        tracing::info!(%name, "no development container was running");
    }
    Ok(())
}
