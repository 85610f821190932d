use thiserror::Error;

/// Failures talking to a remote bus instance.
///
/// These are transport problems, never application faults: a remote service
/// that fails answers with a fault wire message instead.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote invocation failed: {0}")]
    Io(#[from] reqwest::Error),
    #[error("invalid remote endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("remote message could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid request header: {0}")]
    InvalidHeader(String),
}

impl RemoteError {
    /// Only I/O failures are worth retrying; every other variant fails the
    /// same way again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
