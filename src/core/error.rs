use std::io;
use thiserror::Error;

/// Unified error type for the Espejo application
#[derive(Error, Debug)]
pub enum EspejoError {
    /// Provider API errors
    #[error("API error: {0}")]
    Api(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// User input errors
    #[error("Input error: {0}")]
    Input(String),

    /// IO-related errors
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(String),

    /// Conversation or agent persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// A conversation or agent that does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Completion dispatch failed
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Unknown or unexpected errors
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Terminal outcome of a failed completion request.
///
/// Per-route failures (network errors, rate limits, revoked keys) are
/// absorbed by the dispatch cascade and only surface here once nothing
/// is left to try.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The provider rejected the content itself; retrying cannot help.
    #[error("Request blocked by content policy: {reason}")]
    PolicyBlocked { reason: String },

    /// Every (model, key, version) combination was tried without success.
    #[error("All routes exhausted after {attempts} attempts")]
    AllRoutesExhausted { attempts: usize },

    #[error("Conversation has no messages to complete")]
    EmptyConversation,

    /// The caller abandoned the request before it resolved.
    #[error("Completion request cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for EspejoError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EspejoError::Network(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            EspejoError::Network(format!("Connection failed: {}", err))
        } else if err.is_status() {
            EspejoError::Api(format!("API returned error status: {}", err))
        } else {
            EspejoError::Network(format!("Request failed: {}", err))
        }
    }
}

impl From<serde_json::Error> for EspejoError {
    fn from(err: serde_json::Error) -> Self {
        EspejoError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<serde_yml::Error> for EspejoError {
    fn from(err: serde_yml::Error) -> Self {
        EspejoError::Serialization(format!("YAML error: {}", err))
    }
}

impl From<String> for EspejoError {
    fn from(err: String) -> Self {
        EspejoError::Unknown(err)
    }
}

impl From<&str> for EspejoError {
    fn from(err: &str) -> Self {
        EspejoError::Unknown(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_errors_pass_through_transparently() {
        let err: EspejoError = DispatchError::AllRoutesExhausted { attempts: 8 }.into();
        assert_eq!(err.to_string(), "All routes exhausted after 8 attempts");
    }

    #[test]
    fn io_errors_convert() {
        let err: EspejoError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, EspejoError::Io { .. }));
    }
}
