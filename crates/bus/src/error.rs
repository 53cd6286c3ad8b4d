use thiserror::Error;

/// Errors from message bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("consume failed: {0}")]
    Consume(String),

    #[error("unknown queue: {0}")]
    UnknownQueue(String),
}
