#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Context(#[from] context::Error),

    #[error(transparent)]
    Api(#[from] api::Error),

    #[error(transparent)]
    KubeClient(#[from] kube_client::Error),

    #[error(transparent)]
    Manifest(#[from] manifest::Error),

    #[error(transparent)]
    Engine(#[from] engine::Error),

    #[error(transparent)]
    Supervisor(#[from] supervisor::Error),

    #[error("Kube Error: {0}")]
    Kube(#[from] kube::Error),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Name of the environment variable that overrides the on-disk state
/// directory (default `$HOME/.devctl`).
pub const HOME_ENV: &str = "DEVCTL_HOME";

/// Present inside a dev container; some commands refuse to run when set.
pub const NAME_ENV: &str = "DEVCTL_NAME";

/// Bootstraps a context non-interactively alongside [`URL_ENV`].
pub const TOKEN_ENV: &str = "DEVCTL_TOKEN";
pub const URL_ENV: &str = "DEVCTL_URL";

/// When `"true"`, kubeconfig writes are suppressed to avoid overriding a
/// deploy command's own proxy settings.
pub const WITHIN_DEPLOY_COMMAND_CONTEXT_ENV: &str = "DEVCTL_WITHIN_DEPLOY_COMMAND_CONTEXT";

pub mod context;

pub mod api;

pub mod kube_client;

pub mod manifest;

pub mod engine;

pub mod supervisor;

pub mod up;
pub mod down;
pub mod exec;
pub mod kubeconfig_cmd;
pub mod context_cmd;

mod runtime_flags;
pub use runtime_flags::RuntimeFlags;
