use super::{DeliveryChannel, DeliveryResult};
use crate::models::{Channel, Notification};
use async_trait::async_trait;

/// In-app delivery. The stored notification is the inbox entry, so there is
/// no external transport to call.
#[derive(Debug, Default)]
pub struct InAppChannel;

impl InAppChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeliveryChannel for InAppChannel {
    fn channel(&self) -> Channel {
        Channel::InApp
    }

    async fn send(&self, notification: &Notification) -> DeliveryResult {
        tracing::debug!(
            notification_id = %notification.id,
            recipient_id = %notification.recipient_id,
            "Notification available in inbox"
        );
        DeliveryResult::success(Some(format!("inbox:{}", notification.id)))
    }
}
