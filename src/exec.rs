//! `devctl exec` — run a command in the dev pod's container.

use anyhow::{Context as _, Result};
use clap::Args;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, ListParams};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::api::ApiClient;
use crate::context::{self, url_to_cluster_context_key};
use crate::engine::app::shadow_name;
use crate::kube_client::KubeClients;
use crate::RuntimeFlags;

#[derive(Clone, Debug, Args)]
pub struct ExecArgs {
    /// Name of the manifest's `name` field — resolves to the `<name>-okteto`
    /// shadow.
    pub app: String,

    #[clap(long)]
    pub namespace: Option<String>,

    #[clap(long)]
    pub container: Option<String>,

    /// Command and arguments to run; defaults to an interactive shell.
    #[clap(trailing_var_arg = true)]
    pub command: Vec<String>,
}

pub async fn run(args: &ExecArgs, flags: &RuntimeFlags) -> Result<()> {
    let store = context::ContextStore::load()?;
    let ctx = store.current().context("no current context; run `devctl context <url>` first")?;
    let namespace = args.namespace.clone().unwrap_or_else(|| ctx.namespace.clone());

    let api = ApiClient::new(&ctx.url, &ctx.token, None, flags.insecure_tls())?;
    let context_key = url_to_cluster_context_key(&ctx.url);
    let kube_token = api.get_kube_token(&context_key, &namespace).await?;

    let mut auth = ctx.cluster.clone();
    auth.token = kube_token.status.token;
    let kube = KubeClients::build(&auth, &namespace, flags).await?;

    let shadow = shadow_name(&args.app);
    let pods: Api<Pod> = Api::namespaced(kube.typed(), &namespace);
    let selector = format!("dev.devctl.io/app={}", args.app);
    let pod = pods
        .list(&ListParams::default().labels(&selector))
        .await?
        .items
        .into_iter()
        .next()
        .with_context(|| format!("no running pod found for {shadow:?}"))?;
    let pod_name = pod.metadata.name.context("pod has no name")?;

    let command: Vec<&str> = if args.command.is_empty() {
        vec!["sh"]
    } else {
        args.command.iter().map(String::as_str).collect()
    };

    let mut params = AttachParams::interactive_tty().stdin(true).stdout(true).stderr(false);
    if let Some(container) = &args.container {
        params = params.container(container);
    }

    let mut attached = pods.exec(&pod_name, &command, &params).await?;

    let mut remote_stdout = attached.stdout().context("no stdout stream from exec")?;
    let mut remote_stdin = attached.stdin().context("no stdin stream from exec")?;

    let stdout_task = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        let mut buf = [0u8; 4096];
        loop {
            match remote_stdout.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stdout.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; 4096];
    loop {
        match stdin.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if remote_stdin.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = stdout_task.await;
    let status = attached.take_status().expect("status channel available after exec");
    if let Some(status) = status.await {
        tracing::debug!(?status, "exec finished");
    }
    Ok(())
}
