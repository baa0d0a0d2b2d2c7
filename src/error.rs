//! Error taxonomy for the relay.
//!
//! Only [`ConfigError`] and [`SessionError`] are allowed to end the process.
//! Delivery and processing errors are logged, counted, and swallowed.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to connect to {name}: {reason}")]
    ConnectFailed { name: String, reason: String },

    #[error("Session {name} disconnected: {reason}")]
    Disconnected { name: String, reason: String },

    #[error("Session {name} is not connected")]
    NotConnected { name: String },

    #[error("Lookup of source {id} failed: {reason}")]
    Lookup { id: i64, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Sink returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Sink request timed out")]
    Timeout,

    #[error("Connection to sink failed: {0}")]
    Connect(String),

    #[error("Sink rejected message: {0}")]
    Rejected(String),

    #[error("Unexpected delivery failure: {0}")]
    Unexpected(String),
}

impl DeliveryError {
    /// Transient faults are retried; everything else ends the attempt sequence.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeliveryError::Status { .. } | DeliveryError::Timeout | DeliveryError::Connect(_)
        )
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DeliveryError::Timeout
        } else if e.is_connect() || ((e.is_request() || e.is_body()) && !e.is_builder()) {
            // Reset or closed mid-exchange counts as a connection fault
            DeliveryError::Connect(e.to_string())
        } else {
            DeliveryError::Unexpected(e.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Handling message {message_id} from {source_id} panicked: {reason}")]
    Panicked {
        source_id: i64,
        message_id: i64,
        reason: String,
    },

    #[error("Delivery task for message {message_id} from {source_id} failed: {reason}")]
    TaskFailed {
        source_id: i64,
        message_id: i64,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DeliveryError::Status {
            status: 500,
            body: String::new()
        }
        .is_transient());
        assert!(DeliveryError::Timeout.is_transient());
        assert!(DeliveryError::Connect("refused".into()).is_transient());
        assert!(!DeliveryError::Rejected("bad".into()).is_transient());
        assert!(!DeliveryError::Unexpected("boom".into()).is_transient());
    }

    #[test]
    fn test_malformed_request_not_transient() {
        let err = reqwest::Client::new()
            .post("not a url")
            .build()
            .unwrap_err();
        let mapped = DeliveryError::from(err);
        assert!(matches!(mapped, DeliveryError::Unexpected(_)));
        assert!(!mapped.is_transient());
    }

    #[test]
    fn test_config_error_wraps_into_relay_error() {
        let err: RelayError = ConfigError::InvalidValue {
            key: "sink.url".into(),
            message: "must not be empty".into(),
        }
        .into();
        assert!(matches!(err, RelayError::Config(_)));
        assert!(err.to_string().contains("sink.url"));
    }
}
