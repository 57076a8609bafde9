//! `devctl context` — switch (or bootstrap) the current control-plane
//! endpoint.

use anyhow::{Context as _, Result};
use clap::Args;

use crate::api::ApiClient;
use crate::context::{self, ClusterAuthInfo};
use crate::{RuntimeFlags, TOKEN_ENV, URL_ENV};

#[derive(Clone, Debug, Args)]
pub struct ContextArgs {
    /// Control-plane endpoint to switch to. Defaults to `$DEVCTL_URL` when
    /// omitted, matching non-interactive bootstrap.
    pub url: Option<String>,

    /// Namespace to select within the context.
    #[clap(long)]
    pub namespace: Option<String>,
}

pub async fn run(args: &ContextArgs, flags: &RuntimeFlags) -> Result<()> {
    let url = args
        .url
        .clone()
        .or_else(|| std::env::var(URL_ENV).ok())
        .context("no context URL given and DEVCTL_URL is unset")?;
    let normalized = context::normalize_url(&url);

    let already_known = context::with_store(|store| Ok(store.get(&normalized).is_some()))?;
    if already_known {
        context::with_store(|store| {
            store.select(&normalized)?;
            store.classify(&normalized);
            Ok(())
        })?;
        tracing::info!(context = %normalized, "switched context");
        return Ok(());
    }

    let token = std::env::var(TOKEN_ENV)
        .context("context is unknown and DEVCTL_TOKEN is unset; authenticate interactively first")?;

    let namespace = args.namespace.clone().unwrap_or_else(|| "default".to_string());
    let api = ApiClient::new(&normalized, &token, None, flags.insecure_tls())?;
    let user_context = api.get_context(&namespace).await?;
    let credential = api.get_credentials(&namespace).await?;

    let ctx = context::Context {
        url: normalized.clone(),
        user_id: user_context.user.id.clone(),
        display_name: user_context.user.display_name.clone(),
        token: user_context.user.token.clone(),
        namespace: namespace.clone(),
        cluster: ClusterAuthInfo {
            server: credential.server,
            certificate_authority_data: (!credential.certificate.is_empty()).then_some(credential.certificate),
            token: credential.token,
            current_context: context::url_to_cluster_context_key(&normalized),
        },
        builder_url: user_context.user.builder_url.clone(),
        registry_url: user_context.user.registry_url.clone(),
        global_namespace: Some(user_context.user.global_namespace.clone()),
        telemetry: user_context.user.analytics,
        cluster_kind: None,
    };

    context::with_store(|store| {
        store.add(ctx);
        store.classify(&normalized);
        Ok(())
    })?;

    tracing::info!(context = %normalized, %namespace, "authenticated");
    Ok(())
}
