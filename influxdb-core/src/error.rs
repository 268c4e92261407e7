//! Error types for InfluxDB sink operations

use thiserror::Error;

/// Result type for InfluxDB sink operations
pub type InfluxResult<T> = Result<T, InfluxError>;

/// Error types raised while building, encoding and writing points
#[derive(Error, Debug)]
pub enum InfluxError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported value kind '{kind}': {message}")]
    UnsupportedValue { kind: &'static str, message: String },

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Store rejected write with status {status}: {body}")]
    StoreRejected { status: u16, body: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Timeout error: operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Flush already in progress")]
    FlushInProgress,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl InfluxError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    /// Create a new unsupported value error for the given kind
    pub fn unsupported_value<S: Into<String>>(kind: &'static str, message: S) -> Self {
        Self::UnsupportedValue {
            kind,
            message: message.into(),
        }
    }

    /// Create a new mapping error
    pub fn mapping<S: Into<String>>(message: S) -> Self {
        Self::Mapping(message.into())
    }

    /// Create a new store error
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store(message.into())
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection(message.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this is a retriable error
    pub fn is_retriable(&self) -> bool {
        match self {
            InfluxError::Connection(_)
            | InfluxError::Timeout { .. }
            | InfluxError::Store(_)
            | InfluxError::Io(_) => true,
            InfluxError::StoreRejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Get the error category for monitoring/metrics
    pub fn category(&self) -> &'static str {
        match self {
            InfluxError::Validation(_) => "validation",
            InfluxError::UnsupportedValue { .. } => "unsupported_value",
            InfluxError::Mapping(_) => "mapping",
            InfluxError::Store(_) => "store",
            InfluxError::StoreRejected { .. } => "store_rejected",
            InfluxError::Connection(_) => "connection",
            InfluxError::Configuration(_) => "configuration",
            InfluxError::Timeout { .. } => "timeout",
            InfluxError::FlushInProgress => "flush_in_progress",
            InfluxError::Internal(_) => "internal",
            InfluxError::Io(_) => "io",
            InfluxError::Json(_) => "json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_errors() {
        assert!(InfluxError::connection("refused").is_retriable());
        assert!(InfluxError::Timeout { timeout_ms: 10 }.is_retriable());
        assert!(InfluxError::StoreRejected {
            status: 503,
            body: "busy".to_string()
        }
        .is_retriable());
        assert!(!InfluxError::StoreRejected {
            status: 400,
            body: "bad line".to_string()
        }
        .is_retriable());
        assert!(!InfluxError::validation("empty metric").is_retriable());
    }

    #[test]
    fn test_unsupported_value_message_names_kind() {
        let err = InfluxError::unsupported_value("double", "must be Integer/Long/Float");
        assert_eq!(err.category(), "unsupported_value");
        assert!(err.to_string().contains("double"));
    }
}
