//! `(context, namespace) -> TokenRequest` cache persisted to a single file.
//!
//! Tokens are stored and returned as the same typed struct regardless of
//! the backing call's response shape, with JSON marshaling only at the
//! file boundary.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::credential::KubeToken;
use crate::context::ContextStore;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("error (de)serializing kube-token cache: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: HashMap<String, KubeToken>,
}

fn cache_key(context: &str, namespace: &str) -> String {
    format!("{context}|{namespace}")
}

fn cache_path() -> PathBuf {
    ContextStore::home_dir().join("context").join("kubetoken_cache.json")
}

/// Persisted `(context, namespace) -> KubeToken` map.
#[derive(Clone, Debug, Default)]
pub struct KubeTokenCache {
    entries: HashMap<String, KubeToken>,
}

impl KubeTokenCache {
    /// Malformed content is an empty cache, not a fatal error — the next
    /// successful mint overwrites it.
    pub fn load() -> Result<Self> {
        let path = cache_path();
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let file: CacheFile = serde_json::from_slice(&raw).unwrap_or_default();
        Ok(Self { entries: file.entries })
    }

    pub fn save(&self) -> Result<()> {
        let path = cache_path();
        let dir = path.parent().expect("cache path always has a parent");
        fs::create_dir_all(dir)?;

        let file = CacheFile { entries: self.entries.clone() };
        let body = serde_json::to_vec(&file)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        io::Write::write_all(&mut tmp, &body)?;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Returns the cached token iff present and not expired. Expired
    /// entries are left on disk (not evicted here) — they're treated as
    /// absent but overwritten by the next successful `set`.
    pub fn get(&self, context: &str, namespace: &str) -> Option<&KubeToken> {
        let token = self.entries.get(&cache_key(context, namespace))?;
        if token.is_expired(chrono::Utc::now()) {
            None
        } else {
            Some(token)
        }
    }

    pub fn set(&mut self, context: &str, namespace: &str, token: KubeToken) {
        self.entries.insert(cache_key(context, namespace), token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::credential::KubeTokenStatus;
    use chrono::Duration;

    fn token_expiring_in(minutes: i64) -> KubeToken {
        KubeToken {
            status: KubeTokenStatus {
                token: "tok".to_string(),
                expiration_timestamp: (chrono::Utc::now() + Duration::minutes(minutes)).to_rfc3339(),
            },
        }
    }

    #[test]
    fn set_then_get_with_future_expiration() {
        let mut cache = KubeTokenCache::default();
        cache.set("ctx", "ns", token_expiring_in(10));
        assert!(cache.get("ctx", "ns").is_some());
    }

    #[test]
    fn past_expiration_returns_none() {
        let mut cache = KubeTokenCache::default();
        cache.set("ctx", "ns", token_expiring_in(-10));
        assert!(cache.get("ctx", "ns").is_none());
    }

    #[test]
    fn different_namespace_misses() {
        let mut cache = KubeTokenCache::default();
        cache.set("ctx", "ns-a", token_expiring_in(10));
        assert!(cache.get("ctx", "ns-b").is_none());
    }
}
