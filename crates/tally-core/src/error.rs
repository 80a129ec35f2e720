//! Error types for Tally

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No authenticated user")]
    AuthMissing,

    #[error("Session expired: {0}")]
    AuthExpired(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Sync timed out after {0} seconds")]
    SyncTimeout(u64),

    #[error("Cloud payload failed integrity validation: {0}")]
    Integrity(String),

    #[error("No candidate books or categories to classify against")]
    EmptyCandidates,

    #[error("LLM provider unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM returned an invalid prediction: {0}")]
    LlmProtocol(String),

    #[error("No exchange rate available for {from} -> {to}")]
    RateUnavailable { from: String, to: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether a sync step hitting this error should be retried with backoff.
    ///
    /// Permission-denied is retried because a freshly refreshed token can lag
    /// behind at the cloud store; persistent occurrences are reclassified by
    /// the orchestrator as a revoked session.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::PermissionDenied(_) => true,
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Io(_) => true,
            _ => false,
        }
    }

    /// Whether this error means the session is gone for good and the
    /// subsystem must sign out rather than retry.
    pub fn is_auth_permanent(&self) -> bool {
        matches!(self, Error::AuthExpired(_) | Error::AuthMissing)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::Network("connection reset".into()).is_transient());
        assert!(Error::PermissionDenied("403".into()).is_transient());
        assert!(!Error::Validation("bad amount".into()).is_transient());
        assert!(!Error::AuthExpired("token revoked".into()).is_transient());
    }

    #[test]
    fn auth_permanent_classification() {
        assert!(Error::AuthExpired("revoked".into()).is_auth_permanent());
        assert!(Error::AuthMissing.is_auth_permanent());
        assert!(!Error::PermissionDenied("lag".into()).is_auth_permanent());
    }

    #[test]
    fn error_display() {
        let err = Error::RateUnavailable {
            from: "SGD".into(),
            to: "INR".into(),
        };
        assert_eq!(err.to_string(), "No exchange rate available for SGD -> INR");

        let err = Error::SyncTimeout(30);
        assert_eq!(err.to_string(), "Sync timed out after 30 seconds");
    }
}
