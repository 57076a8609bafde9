//! Error taxonomy for the API Client.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not logged in, run `devctl context` to authenticate")]
    NotAuthorized,

    #[error("unauthorized, reconfigure context")]
    Unauthorized,

    #[error("namespace quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("temporary server error, retry")]
    InternalServerError,

    #[error("cluster is not yet ready, try again")]
    ClusterNotReady,

    #[error("dynamic kube-token is not supported by this endpoint")]
    KubeTokenUnsupported,

    #[error("TLS/certificate error: {0} (pin the CA with a context certificate, or pass --insecure-skip-tls-verify)")]
    Tls(String),

    #[error("incompatible backend: field {field:?} is not recognized by this server")]
    IncompatibleBackend { field: String },

    #[error("unexpected status {status} from {path}: {body}")]
    Status { status: u16, path: String, body: String },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("error (de)serializing: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    #[error(transparent)]
    KubeTokenCache(#[from] super::kubetoken_cache::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Substring set used at the single retry point for transient transport
/// errors.
const TRANSIENT_SUBSTRINGS: &[&str] = &[
    "connection refused",
    "connection reset by peer",
    "client connection lost",
    "unexpected EOF",
    "TLS handshake timeout",
    "broken pipe",
    "network is unreachable",
    "can't assign requested address",
    "dial tcp: operation was canceled",
    "development container has been removed",
];

pub fn is_transient(message: &str) -> bool {
    TRANSIENT_SUBSTRINGS.iter().any(|needle| message.contains(needle))
}

/// Maps a raw GraphQL error message string to this module's error taxonomy.
/// Applied on every call after the transport succeeds but the server body
/// describes a failure.
pub fn classify_graphql_message(message: &str) -> Error {
    let stripped = message.strip_prefix("graphql:").unwrap_or(message).trim();

    if stripped.contains("not-authorized") {
        return Error::NotAuthorized;
    }
    if stripped.contains("401") || stripped.to_lowercase().contains("unauthorized") {
        return Error::Unauthorized;
    }
    if stripped.contains("namespace-quota-exceeded") {
        return Error::QuotaExceeded(stripped.to_string());
    }
    if stripped.contains("internal-server-error") {
        return Error::InternalServerError;
    }
    if stripped.to_lowercase().contains("x509") {
        return Error::Tls(stripped.to_string());
    }
    Error::GraphQl(stripped.to_string())
}

/// Detects GraphQL schema-version skew: `"Cannot query field \"x\" on type
/// \"y\""`.
pub fn is_schema_skew(message: &str) -> bool {
    message.contains("Cannot query field")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_transient_substrings() {
        assert!(is_transient("dial tcp: connection refused"));
        assert!(is_transient("unexpected EOF while reading body"));
        assert!(!is_transient("some other unrelated error"));
    }

    #[test]
    fn classifies_not_authorized() {
        assert!(matches!(
            classify_graphql_message("graphql: not-authorized"),
            Error::NotAuthorized
        ));
    }

    #[test]
    fn detects_schema_skew() {
        assert!(is_schema_skew(
            "Cannot query field \"telemetryEnabled\" on type \"me\""
        ));
        assert!(!is_schema_skew("some other error"));
    }
}
