use thiserror::Error;

/// Errors from push delivery.
#[derive(Debug, Error)]
pub enum PushError {
    /// Credentials could not be loaded or refreshed.
    #[error("credential error: {0}")]
    Credential(String),

    /// The provider rejected the send.
    #[error("push provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },

    /// The send exceeded the configured timeout.
    #[error("push send timed out")]
    Timeout,

    /// Transport-level failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
