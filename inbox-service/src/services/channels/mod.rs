pub mod email;
pub mod in_app;
pub mod push;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{Channel, DeliveryErrorKind, Notification};

pub use email::{EmailContent, MockEmailChannel, SmtpEmailChannel};
pub use in_app::InAppChannel;
pub use push::{FcmPushChannel, MockPushChannel, PushContent};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Send error: {0}")]
    SendFailed(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication error: {0}")]
    Authentication(String),
}

impl ProviderError {
    /// Whether another attempt could plausibly succeed.
    pub fn kind(&self) -> DeliveryErrorKind {
        match self {
            ProviderError::Connection(_)
            | ProviderError::Timeout(_)
            | ProviderError::SendFailed(_)
            | ProviderError::RateLimited(_) => DeliveryErrorKind::Transient,
            ProviderError::Configuration(_)
            | ProviderError::Rejected(_)
            | ProviderError::InvalidRecipient(_)
            | ProviderError::Authentication(_) => DeliveryErrorKind::Permanent,
        }
    }
}

/// Outcome of a single send attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
    pub success: bool,
    pub error_kind: Option<DeliveryErrorKind>,
    pub provider_id: Option<String>,
    pub message: Option<String>,
}

impl DeliveryResult {
    pub fn success(provider_id: Option<String>) -> Self {
        Self {
            success: true,
            error_kind: None,
            provider_id,
            message: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::failure(DeliveryErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::failure(DeliveryErrorKind::Permanent, message)
    }

    fn failure(kind: DeliveryErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_kind: Some(kind),
            provider_id: None,
            message: Some(message.into()),
        }
    }

    pub fn is_transient(&self) -> bool {
        !self.success && self.error_kind == Some(DeliveryErrorKind::Transient)
    }
}

impl From<ProviderError> for DeliveryResult {
    fn from(err: ProviderError) -> Self {
        DeliveryResult::failure(err.kind(), err.to_string())
    }
}

impl From<Result<Option<String>, ProviderError>> for DeliveryResult {
    fn from(result: Result<Option<String>, ProviderError>) -> Self {
        match result {
            Ok(provider_id) => DeliveryResult::success(provider_id),
            Err(e) => e.into(),
        }
    }
}

/// One outbound transport. Each call makes exactly one attempt; retries are
/// the caller's business.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, notification: &Notification) -> DeliveryResult;
}

/// Adapters keyed by the channel they serve.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    adapters: HashMap<Channel, Arc<dyn DeliveryChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for its channel.
    pub fn register(mut self, adapter: Arc<dyn DeliveryChannel>) -> Self {
        self.adapters.insert(adapter.channel(), adapter);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn DeliveryChannel>> {
        self.adapters.get(&channel).cloned()
    }

    pub fn supports(&self, channel: Channel) -> bool {
        self.adapters.contains_key(&channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_classification() {
        assert_eq!(
            ProviderError::RateLimited("429".into()).kind(),
            DeliveryErrorKind::Transient
        );
        assert_eq!(
            ProviderError::Timeout("slow".into()).kind(),
            DeliveryErrorKind::Transient
        );
        assert_eq!(
            ProviderError::InvalidRecipient("no address".into()).kind(),
            DeliveryErrorKind::Permanent
        );
        assert_eq!(
            ProviderError::Authentication("401".into()).kind(),
            DeliveryErrorKind::Permanent
        );
    }

    #[test]
    fn test_delivery_result_from_provider_result() {
        let ok: DeliveryResult = Ok::<_, ProviderError>(Some("msg-1".to_string())).into();
        assert!(ok.success);
        assert_eq!(ok.provider_id.as_deref(), Some("msg-1"));

        let err: DeliveryResult =
            Err::<Option<String>, _>(ProviderError::Connection("reset".into())).into();
        assert!(err.is_transient());
        assert!(err.message.unwrap().contains("reset"));
    }

    #[test]
    fn test_registry_dispatches_by_channel() {
        let registry = ChannelRegistry::new()
            .register(Arc::new(InAppChannel::new()))
            .register(Arc::new(MockEmailChannel::new()));

        assert!(registry.supports(Channel::InApp));
        assert!(registry.supports(Channel::Email));
        assert!(!registry.supports(Channel::Push));
        assert_eq!(
            registry.get(Channel::Email).unwrap().channel(),
            Channel::Email
        );
    }
}
