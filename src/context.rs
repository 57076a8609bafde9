//! Canonical, persistent registry of known control-plane endpoints plus the
//! current selection.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::net::IpAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::HOME_ENV;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no current context")]
    NoCurrentContext,

    #[error("corrupted contexts: {0}")]
    Corrupted(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("error (de)serializing context store: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Tag applied to a [`Context`] the first time a cluster is actually
/// contacted; a freshly-loaded context has no kind until classified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterKind {
    Local,
    Remote,
}

/// The kubeconfig-shaped structure a [`Context`] carries: enough to build a
/// [`kube::Config`] without touching `~/.kube/config`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterAuthInfo {
    pub server: String,
    /// Base64-encoded DER certificate, if the endpoint pins its own CA.
    pub certificate_authority_data: Option<String>,
    pub token: String,
    pub current_context: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Context {
    pub url: String,
    pub user_id: String,
    pub display_name: String,
    pub token: String,
    pub namespace: String,
    pub cluster: ClusterAuthInfo,
    pub builder_url: Option<String>,
    pub registry_url: Option<String>,
    pub global_namespace: Option<String>,
    pub telemetry: bool,
    pub cluster_kind: Option<ClusterKind>,
}

/// Resolved from the control plane at authentication time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub external_id: String,
    pub email: String,
    pub token: String,
    pub is_new: bool,
    pub registry_url: Option<String>,
    pub builder_url: Option<String>,
    pub certificate: Option<String>,
    pub global_namespace: String,
    pub analytics: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(rename = "contexts")]
    contexts: BTreeMap<String, Context>,
    #[serde(rename = "current-context")]
    current_context: Option<String>,
}

/// In-memory view of the on-disk store. Mutation methods persist
/// immediately; there is no separate "dirty" flag to forget to flush.
#[derive(Clone, Debug, Default)]
pub struct ContextStore {
    contexts: BTreeMap<String, Context>,
    current_context: Option<String>,
}

impl ContextStore {
    /// Directory holding all on-disk state, `$DEVCTL_HOME` or `$HOME/.devctl`.
    pub fn home_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(HOME_ENV) {
            return PathBuf::from(dir);
        }
        let home = home::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".devctl")
    }

    fn config_path() -> PathBuf {
        Self::home_dir().join("context").join("config.json")
    }

    /// Reads the on-disk store. A missing file is an empty store, never an
    /// error. A present-but-malformed file, or one whose current-context key
    /// points at nothing, is `Error::Corrupted` — we never silently
    /// overwrite state we can't make sense of.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let file: StoreFile = serde_json::from_slice(&raw)
            .map_err(|e| Error::Corrupted(format!("malformed contexts file: {e}")))?;

        if let Some(current) = &file.current_context {
            if !file.contexts.contains_key(current) {
                return Err(Error::Corrupted(format!(
                    "current-context {current:?} has no matching entry"
                )));
            }
        }

        Ok(Self {
            contexts: file.contexts,
            current_context: file.current_context,
        })
    }

    /// Atomic write (temp file + rename) at mode `0600`, directory at mode
    /// `0700`. If the file already exists its mode is reasserted before
    /// writing.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        let dir = path.parent().expect("config path always has a parent");
        fs::create_dir_all(dir)?;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;

        if path.exists() {
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }

        let file = StoreFile {
            contexts: self.contexts.clone(),
            current_context: self.current_context.clone(),
        };
        let body = serde_json::to_vec_pretty(&file)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        io::Write::write_all(&mut tmp, &body)?;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;

        Ok(())
    }

    /// Upserts a context under its normalized URL and selects it as current.
    pub fn add(&mut self, mut ctx: Context) {
        ctx.url = normalize_url(&ctx.url);
        let key = ctx.url.clone();
        self.contexts.insert(key.clone(), ctx);
        self.current_context = Some(key);
    }

    /// Selects an already-known context as current.
    pub fn select(&mut self, url: &str) -> Result<()> {
        let key = normalize_url(url);
        if !self.contexts.contains_key(&key) {
            return Err(Error::Corrupted(format!("unknown context {key:?}")));
        }
        self.current_context = Some(key);
        Ok(())
    }

    pub fn current(&self) -> Result<&Context> {
        let key = self.current_context.as_ref().ok_or(Error::NoCurrentContext)?;
        self.contexts.get(key).ok_or(Error::NoCurrentContext)
    }

    pub fn current_mut(&mut self) -> Result<&mut Context> {
        let key = self.current_context.clone().ok_or(Error::NoCurrentContext)?;
        self.contexts.get_mut(&key).ok_or(Error::NoCurrentContext)
    }

    pub fn get(&self, url: &str) -> Option<&Context> {
        self.contexts.get(&normalize_url(url))
    }

    pub fn remove(&mut self, url: &str) {
        let key = normalize_url(url);
        self.contexts.remove(&key);
        if self.current_context.as_deref() == Some(key.as_str()) {
            self.current_context = None;
        }
    }

    pub fn contexts(&self) -> impl Iterator<Item = &Context> {
        self.contexts.values()
    }

    /// Tags `url`'s context `local` iff the host is RFC-1918/link-local/
    /// loopback or literally `kubernetes.docker.internal`.
    pub fn classify(&mut self, url: &str) {
        let key = normalize_url(url);
        let kind = classify_host(&key);
        if let Some(ctx) = self.contexts.get_mut(&key) {
            ctx.cluster_kind = Some(kind);
        }
    }
}

/// Strips scheme+host down to `scheme://host` with no trailing slash.
pub fn normalize_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            let host = parsed.host_str().unwrap_or_default();
            match parsed.port() {
                Some(port) => format!("{scheme}://{host}:{port}"),
                None => format!("{scheme}://{host}"),
            }
        }
        Err(_) => url.trim_end_matches('/').to_string(),
    }
}

/// `https://a.b.c` → `a_b_c` (dots → underscores, host only).
pub fn url_to_cluster_context_key(url: &str) -> String {
    let normalized = normalize_url(url);
    let host = url::Url::parse(&normalized)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or(normalized);
    host.replace('.', "_")
}

/// Reverse of [`url_to_cluster_context_key`]. Consults the store first; a
/// key matching no known endpoint is returned unchanged — it is a plain
/// cluster context name, not one of ours.
pub fn cluster_context_key_to_url(store: &ContextStore, key: &str) -> String {
    for ctx in store.contexts() {
        if url_to_cluster_context_key(&ctx.url) == key {
            return ctx.url.clone();
        }
    }
    key.to_string()
}

fn classify_host(url: &str) -> ClusterKind {
    let host = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();

    if host == "kubernetes.docker.internal" {
        return ClusterKind::Local;
    }

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            if v4.is_loopback() || v4.is_private() || v4.is_link_local() {
                ClusterKind::Local
            } else {
                ClusterKind::Remote
            }
        }
        Ok(IpAddr::V6(v6)) => {
            if v6.is_loopback() {
                ClusterKind::Local
            } else {
                ClusterKind::Remote
            }
        }
        Err(_) => ClusterKind::Remote,
    }
}

/// Loads the store, mutates it, saves it back. Convenience for the common
/// read-modify-write pattern in command handlers.
pub fn with_store<F, T>(f: F) -> Result<T>
where
    F: FnOnce(&mut ContextStore) -> Result<T>,
{
    let mut store = ContextStore::load()?;
    let result = f(&mut store)?;
    store.save()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context(url: &str) -> Context {
        Context {
            url: url.to_string(),
            user_id: "u1".to_string(),
            display_name: "Dev".to_string(),
            token: "tok".to_string(),
            namespace: "dev".to_string(),
            cluster: ClusterAuthInfo {
                server: "https://cluster.example".to_string(),
                certificate_authority_data: None,
                token: "ctok".to_string(),
                current_context: "default".to_string(),
            },
            builder_url: None,
            registry_url: None,
            global_namespace: None,
            telemetry: true,
            cluster_kind: None,
        }
    }

    #[test]
    fn missing_file_is_empty_store() {
        std::env::set_var(HOME_ENV, "/nonexistent/devctl-home-missing");
        let store = ContextStore::load().expect("missing file is not an error");
        assert!(store.current().is_err());
    }

    #[test]
    fn normalize_strips_trailing_slash() {
        assert_eq!(normalize_url("https://example.dev/"), "https://example.dev");
        assert_eq!(normalize_url("https://example.dev"), "https://example.dev");
    }

    #[test]
    fn url_key_roundtrip_for_known_endpoint() {
        let mut store = ContextStore::default();
        store.add(sample_context("https://a.b.c"));
        let key = url_to_cluster_context_key("https://a.b.c");
        assert_eq!(key, "a_b_c");
        assert_eq!(cluster_context_key_to_url(&store, &key), "https://a.b.c");
    }

    #[test]
    fn unknown_key_returned_unchanged() {
        let store = ContextStore::default();
        assert_eq!(cluster_context_key_to_url(&store, "my-kind-cluster"), "my-kind-cluster");
    }

    #[test]
    fn classify_private_and_loopback_as_local() {
        assert_eq!(classify_host("https://10.0.0.1"), ClusterKind::Local);
        assert_eq!(classify_host("https://127.0.0.1"), ClusterKind::Local);
        assert_eq!(classify_host("https://192.168.1.5"), ClusterKind::Local);
        assert_eq!(
            classify_host("https://kubernetes.docker.internal"),
            ClusterKind::Local
        );
        assert_eq!(classify_host("https://example.dev"), ClusterKind::Remote);
        assert_eq!(classify_host("https://1.2.3.4"), ClusterKind::Remote);
    }

    #[test]
    fn add_select_current_roundtrip() {
        let mut store = ContextStore::default();
        store.add(sample_context("https://example.dev/"));
        assert_eq!(store.current().unwrap().url, "https://example.dev");

        store.add(sample_context("https://other.dev"));
        assert_eq!(store.current().unwrap().url, "https://other.dev");

        store.select("https://example.dev").unwrap();
        assert_eq!(store.current().unwrap().url, "https://example.dev");
    }

    #[test]
    fn select_unknown_fails() {
        let mut store = ContextStore::default();
        assert!(store.select("https://nope.dev").is_err());
    }
}
