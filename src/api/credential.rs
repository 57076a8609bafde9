//! Short-lived bundles minted on demand by the control plane.

use serde::{Deserialize, Serialize};

/// A short-lived cluster bearer token bundle. Callers treat this as
/// expiring and re-mint on 401 rather than inspecting any expiry field
/// themselves.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Credential {
    pub server: String,
    pub certificate: String,
    pub token: String,
    pub namespace: String,
}

/// Echoes the expiration timestamp of a minted service-account token, in the
/// shape of a Kubernetes `TokenRequest` status.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KubeToken {
    pub status: KubeTokenStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KubeTokenStatus {
    pub token: String,
    #[serde(rename = "expirationTimestamp")]
    pub expiration_timestamp: String,
}

impl KubeToken {
    /// An entry is absent (from the caller's point of view) once its
    /// expiration timestamp has passed. Parse failures are treated as
    /// already-expired so a bad cache entry never wedges the caller.
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        match chrono::DateTime::parse_from_rfc3339(&self.status.expiration_timestamp) {
            Ok(expires) => expires.with_timezone(&chrono::Utc) <= now,
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token_expiring_at(ts: chrono::DateTime<chrono::Utc>) -> KubeToken {
        KubeToken {
            status: KubeTokenStatus {
                token: "tok".to_string(),
                expiration_timestamp: ts.to_rfc3339(),
            },
        }
    }

    #[test]
    fn future_expiration_is_not_expired() {
        let now = chrono::Utc::now();
        let token = token_expiring_at(now + Duration::minutes(5));
        assert!(!token.is_expired(now));
    }

    #[test]
    fn past_expiration_is_expired() {
        let now = chrono::Utc::now();
        let token = token_expiring_at(now - Duration::minutes(5));
        assert!(token.is_expired(now));
    }

    #[test]
    fn malformed_timestamp_is_expired() {
        let token = KubeToken {
            status: KubeTokenStatus {
                token: "tok".to_string(),
                expiration_timestamp: "not-a-timestamp".to_string(),
            },
        };
        assert!(token.is_expired(chrono::Utc::now()));
    }
}
