//! Typed request layer over a single control-plane endpoint.

mod client;
mod credential;
mod error;
pub mod kubetoken_cache;

pub use client::{ApiClient, BuildkitPodStatus, UserContext};
pub use credential::{Credential, KubeToken, KubeTokenStatus};
pub use error::{Error, Result};
