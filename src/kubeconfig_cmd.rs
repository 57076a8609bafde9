//! `devctl kubeconfig` — write the current context's credentials to
//! `$KUBECONFIG` (default `~/.kube/config`-compatible path).

use std::fs;
use std::io::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;

use crate::context::{self, Context};
use crate::WITHIN_DEPLOY_COMMAND_CONTEXT_ENV;

#[derive(Clone, Debug, Args)]
pub struct KubeconfigArgs {
    /// Override the destination path; defaults to `$KUBECONFIG` or
    /// `~/.kube/config`.
    #[clap(long)]
    pub path: Option<PathBuf>,
}

fn destination(explicit: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path.clone();
    }
    if let Ok(path) = std::env::var("KUBECONFIG") {
        return PathBuf::from(path);
    }
    home::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".kube").join("config")
}

pub fn run(args: &KubeconfigArgs) -> Result<()> {
    if std::env::var(WITHIN_DEPLOY_COMMAND_CONTEXT_ENV).as_deref() == Ok("true") {
        tracing::debug!("kubeconfig write suppressed inside a deploy command context");
        return Ok(());
    }

    let store = context::ContextStore::load()?;
    let ctx = store.current().context("no current context; run `devctl context <url>` first")?;

    let path = destination(args.path.as_ref());
    write_kubeconfig(ctx, &path)?;
    tracing::info!(path = %path.display(), "wrote kubeconfig");
    Ok(())
}

fn write_kubeconfig(ctx: &Context, path: &PathBuf) -> Result<()> {
    let key = context::url_to_cluster_context_key(&ctx.url);
    let doc = serde_yaml::to_string(&render(ctx, &key))?;

    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(doc.as_bytes())?;
    fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
    tmp.persist(path).map_err(|e| anyhow::anyhow!(e.error))?;
    Ok(())
}

fn render(ctx: &Context, key: &str) -> serde_yaml::Value {
    serde_yaml::to_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "current-context": key,
        "clusters": [{
            "name": key,
            "cluster": {
                "server": ctx.cluster.server,
                "certificate-authority-data": ctx.cluster.certificate_authority_data,
            },
        }],
        "users": [{
            "name": key,
            "user": { "token": ctx.cluster.token },
        }],
        "contexts": [{
            "name": key,
            "context": { "cluster": key, "user": key, "namespace": ctx.namespace },
        }],
    }))
    .expect("static shape always serializes")
}
