use async_trait::async_trait;

use crate::domain::errors::DeliveryError;

/// Outbound message channel (a chat bot, a log, a test recorder).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver `text` to the user's channel. Failures are reported, not retried.
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), DeliveryError>;
}
