use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::PushError;
use crate::message::PushMessage;

/// Object-safe push client used behind `Arc<dyn PushClient>`.
///
/// The construction happens once at startup; all workers share a
/// reference.
#[async_trait]
pub trait PushClient: Send + Sync {
    /// Unique name of this client for logs and metrics.
    fn name(&self) -> &str;

    /// Send one push. Returns a provider message id on success.
    async fn send(&self, message: &PushMessage) -> Result<String, PushError>;

    /// Whether sends actually reach a provider.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Stand-in client used when push credentials are absent: sends succeed
/// without reaching any provider, so the pipeline keeps flowing.
pub struct NoopPushClient;

impl NoopPushClient {
    #[must_use]
    pub fn new() -> Self {
        warn!("push credentials absent, notifications are disabled");
        Self
    }
}

impl Default for NoopPushClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushClient for NoopPushClient {
    fn name(&self) -> &str {
        "noop"
    }

    async fn send(&self, message: &PushMessage) -> Result<String, PushError> {
        debug!(
            collapse_id = %message.collapse_id,
            title = %message.title,
            "push disabled, dropping notification"
        );
        Ok("noop".to_owned())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_send_succeeds_without_provider() {
        let client = NoopPushClient::new();
        assert!(!client.is_enabled());
        let message = PushMessage::new("tok", None, None, "n-1");
        assert_eq!(client.send(&message).await.unwrap(), "noop");
    }
}
