//! Dispatch coordinator: create, deliver, record.
//!
//! A dispatch persists the notification as `pending`, fans out to every
//! requested channel concurrently, and writes the combined outcome in a
//! single status update. No store lock is held while adapters are running;
//! if the record moved on in the meantime (typically a delete), the outcome
//! is dropped.

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Deserializer};
use service_core::retry::RetryConfig;
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

use super::channels::{ChannelRegistry, DeliveryResult};
use super::metrics::{record_delivery_attempt, record_dispatch};
use super::store::NotificationStore;
use crate::error::NotificationError;
use crate::models::{
    Channel, DeliveryAttempt, DeliveryErrorKind, Notification, NotificationStatus,
    NotificationType, StatusUpdate,
};

/// Body of `POST /notifications`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 128, message = "recipientId must be 1-128 characters"))]
    pub recipient_id: String,
    #[serde(rename = "type", default)]
    pub notification_type: Option<NotificationType>,
    /// Accepts a single channel or a list.
    #[serde(default, deserialize_with = "one_or_many")]
    #[validate(length(min = 1, message = "at least one channel is required"))]
    pub channel: Vec<Channel>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl DispatchRequest {
    pub fn new(
        recipient_id: impl Into<String>,
        notification_type: NotificationType,
        channel: Vec<Channel>,
    ) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            notification_type: Some(notification_type),
            channel,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(Channel),
    Many(Vec<Channel>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<Channel>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(channel) => vec![channel],
        OneOrMany::Many(channels) => channels,
    })
}

const OUTCOME_WRITE_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct DispatchCoordinator {
    store: Arc<dyn NotificationStore>,
    channels: ChannelRegistry,
    retry: RetryConfig,
    send_timeout: Duration,
}

impl DispatchCoordinator {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        channels: ChannelRegistry,
        retry: RetryConfig,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            channels,
            retry,
            send_timeout,
        }
    }

    /// Check a request before anything is written. Returns the type and the
    /// de-duplicated channel list.
    fn validate(
        &self,
        request: &DispatchRequest,
    ) -> Result<(NotificationType, Vec<Channel>), NotificationError> {
        request.validate()?;

        if request.recipient_id.trim().is_empty() {
            return Err(NotificationError::Validation(
                "recipientId must not be blank".to_string(),
            ));
        }

        let notification_type = request
            .notification_type
            .ok_or_else(|| NotificationError::Validation("type is required".to_string()))?;

        if !(request.payload.is_object() || request.payload.is_null()) {
            return Err(NotificationError::Validation(
                "payload must be a JSON object".to_string(),
            ));
        }

        let mut channels: Vec<Channel> = Vec::with_capacity(request.channel.len());
        for channel in &request.channel {
            if !self.channels.supports(*channel) {
                return Err(NotificationError::Validation(format!(
                    "channel {} is not available",
                    channel
                )));
            }
            if !channels.contains(channel) {
                channels.push(*channel);
            }
        }

        Ok((notification_type, channels))
    }

    /// Validate, persist and deliver. Returns the new notification id.
    ///
    /// Delivery failures do not fail the call; they leave the notification
    /// in `failed`. Once the record exists the call succeeds, even if the
    /// outcome could not be written.
    #[tracing::instrument(skip(self, request), fields(recipient_id = %request.recipient_id))]
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<String, NotificationError> {
        let (notification_type, channels) = self.validate(&request)?;

        let notification = Notification::new(
            request.recipient_id,
            notification_type,
            channels,
            request.payload,
            Utc::now(),
        );

        let id = self.store.create(&notification).await?;
        tracing::info!(notification_id = %id, "Notification created");

        self.deliver(&notification).await;

        Ok(id)
    }

    /// Deliver a pending notification on all its channels and record the
    /// outcome. Returns the status the outcome called for.
    pub async fn deliver(&self, notification: &Notification) -> NotificationStatus {
        let deliveries = join_all(
            notification
                .channels
                .iter()
                .map(|channel| self.deliver_to(*channel, notification)),
        )
        .await;

        let update = if deliveries.iter().any(|d| d.success) {
            StatusUpdate::new(NotificationStatus::Sent, Utc::now())
        } else {
            let summary = deliveries
                .iter()
                .map(|d| {
                    format!(
                        "{}: {}",
                        d.channel,
                        d.error.as_deref().unwrap_or("delivery failed")
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");

            tracing::warn!(
                notification_id = %notification.id,
                error = %summary,
                "Notification could not be delivered on any channel"
            );

            StatusUpdate::new(NotificationStatus::Failed, Utc::now()).with_error(summary)
        };

        let status = update.status;
        self.record_outcome(notification, update.with_deliveries(deliveries))
            .await;

        status
    }

    /// Write the delivery outcome. Storage failures are retried a bounded
    /// number of times; a lost race with another writer is dropped.
    async fn record_outcome(&self, notification: &Notification, update: StatusUpdate) {
        let status = update.status;

        for attempt in 1..=OUTCOME_WRITE_ATTEMPTS {
            match self.store.update_status(&notification.id, update.clone()).await {
                Ok(_) => {
                    record_dispatch(notification.notification_type, status);
                    tracing::info!(
                        notification_id = %notification.id,
                        status = %status,
                        "Delivery outcome recorded"
                    );
                    return;
                }
                Err(NotificationError::InvalidTransition { from, .. }) => {
                    tracing::info!(
                        notification_id = %notification.id,
                        current = %from,
                        outcome = %status,
                        "Notification changed during delivery; outcome not recorded"
                    );
                    return;
                }
                Err(NotificationError::NotFound(_)) => {
                    tracing::warn!(
                        notification_id = %notification.id,
                        "Notification disappeared during delivery"
                    );
                    return;
                }
                Err(e) if attempt < OUTCOME_WRITE_ATTEMPTS => {
                    let backoff = self.retry.backoff_duration(attempt - 1);
                    tracing::warn!(
                        notification_id = %notification.id,
                        attempt,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Failed to record delivery outcome, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    tracing::error!(
                        notification_id = %notification.id,
                        outcome = %status,
                        attempts = attempt,
                        error = %e,
                        "Delivery outcome could not be recorded; notification left pending"
                    );
                }
            }
        }
    }

    /// Deliver on one channel, retrying transient failures with backoff.
    async fn deliver_to(&self, channel: Channel, notification: &Notification) -> DeliveryAttempt {
        let Some(adapter) = self.channels.get(channel) else {
            return DeliveryAttempt {
                channel,
                attempts: 0,
                success: false,
                error_kind: Some(DeliveryErrorKind::Permanent),
                error: Some(format!("no adapter registered for {}", channel)),
                provider_id: None,
            };
        };

        let mut attempts = 0;
        loop {
            attempts += 1;

            let result = match tokio::time::timeout(self.send_timeout, adapter.send(notification))
                .await
            {
                Ok(result) => result,
                Err(_) => DeliveryResult::transient(format!(
                    "send timed out after {}ms",
                    self.send_timeout.as_millis()
                )),
            };

            if result.success {
                record_delivery_attempt(channel, "success");
                if attempts > 1 {
                    tracing::info!(
                        notification_id = %notification.id,
                        channel = %channel,
                        attempts,
                        "Delivery succeeded after retry"
                    );
                }
                return DeliveryAttempt {
                    channel,
                    attempts,
                    success: true,
                    error_kind: None,
                    error: None,
                    provider_id: result.provider_id,
                };
            }

            let transient = result.is_transient();
            record_delivery_attempt(channel, if transient { "transient" } else { "permanent" });

            if !transient || attempts > self.retry.max_retries {
                tracing::warn!(
                    notification_id = %notification.id,
                    channel = %channel,
                    attempts,
                    error = ?result.message,
                    transient,
                    "Delivery failed"
                );
                return DeliveryAttempt {
                    channel,
                    attempts,
                    success: false,
                    error_kind: Some(result.error_kind.unwrap_or(DeliveryErrorKind::Permanent)),
                    error: result.message,
                    provider_id: None,
                };
            }

            let backoff = self.retry.backoff_duration(attempts - 1);
            tracing::warn!(
                notification_id = %notification.id,
                channel = %channel,
                attempt = attempts,
                error = ?result.message,
                backoff_ms = backoff.as_millis() as u64,
                "Delivery attempt failed, retrying after backoff"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::channels::{DeliveryChannel, InAppChannel, MockEmailChannel};
    use crate::services::store::{InMemoryNotificationStore, ListFilter};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Plays back a fixed sequence of results, then succeeds.
    struct ScriptedChannel {
        channel: Channel,
        script: Mutex<VecDeque<DeliveryResult>>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl ScriptedChannel {
        fn new(channel: Channel, script: Vec<DeliveryResult>) -> Arc<Self> {
            Arc::new(Self {
                channel,
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            })
        }

        fn slow(channel: Channel, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                channel,
                script: Mutex::new(VecDeque::new()),
                calls: AtomicU32::new(0),
                delay,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DeliveryChannel for ScriptedChannel {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(&self, _notification: &Notification) -> DeliveryResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| DeliveryResult::success(Some("ok".to_string())))
        }
    }

    /// Deletes the notification mid-send, then reports success.
    struct DeletingChannel {
        store: InMemoryNotificationStore,
    }

    #[async_trait]
    impl DeliveryChannel for DeletingChannel {
        fn channel(&self) -> Channel {
            Channel::Push
        }

        async fn send(&self, notification: &Notification) -> DeliveryResult {
            self.store
                .update_status(
                    &notification.id,
                    StatusUpdate::new(NotificationStatus::Deleted, Utc::now()),
                )
                .await
                .unwrap();
            DeliveryResult::success(None)
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    fn coordinator(
        store: &InMemoryNotificationStore,
        registry: ChannelRegistry,
        max_retries: u32,
    ) -> DispatchCoordinator {
        DispatchCoordinator::new(
            Arc::new(store.clone()),
            registry,
            fast_retry(max_retries),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_successful_dispatch_is_sent() {
        let store = InMemoryNotificationStore::new();
        let registry = ChannelRegistry::new().register(Arc::new(MockEmailChannel::new()));
        let dispatcher = coordinator(&store, registry, 3);

        let id = dispatcher
            .dispatch(DispatchRequest::new(
                "u1",
                NotificationType::Reminder,
                vec![Channel::Email],
            ))
            .await
            .unwrap();

        let n = store.get(&id).await.unwrap();
        assert_eq!(n.status, NotificationStatus::Sent);
        assert!(n.delivered_at.is_some());
        assert_eq!(n.deliveries.len(), 1);
        assert_eq!(n.deliveries[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_transient_failures_retried_until_success() {
        let max_retries = 3;
        let store = InMemoryNotificationStore::new();
        let channel = ScriptedChannel::new(
            Channel::Email,
            (0..max_retries)
                .map(|_| DeliveryResult::transient("rate limited"))
                .collect(),
        );
        let registry = ChannelRegistry::new().register(channel.clone());
        let dispatcher = coordinator(&store, registry, max_retries);

        let id = dispatcher
            .dispatch(DispatchRequest::new(
                "u1",
                NotificationType::Alert,
                vec![Channel::Email],
            ))
            .await
            .unwrap();

        assert_eq!(channel.calls(), max_retries + 1);
        let n = store.get(&id).await.unwrap();
        assert_eq!(n.status, NotificationStatus::Sent);
        assert_eq!(n.deliveries[0].attempts, max_retries + 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted_marks_failed() {
        let store = InMemoryNotificationStore::new();
        let channel = ScriptedChannel::new(
            Channel::Email,
            (0..5).map(|_| DeliveryResult::transient("timeout")).collect(),
        );
        let registry = ChannelRegistry::new().register(channel.clone());
        let dispatcher = coordinator(&store, registry, 2);

        let id = dispatcher
            .dispatch(DispatchRequest::new(
                "u1",
                NotificationType::Alert,
                vec![Channel::Email],
            ))
            .await
            .unwrap();

        assert_eq!(channel.calls(), 3);
        let n = store.get(&id).await.unwrap();
        assert_eq!(n.status, NotificationStatus::Failed);
        assert_eq!(
            n.deliveries[0].error_kind,
            Some(DeliveryErrorKind::Transient)
        );
        assert!(n.delivered_at.is_none());
        assert!(n.error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let store = InMemoryNotificationStore::new();
        let channel = ScriptedChannel::new(
            Channel::Email,
            vec![DeliveryResult::permanent("invalid address")],
        );
        let registry = ChannelRegistry::new().register(channel.clone());
        let dispatcher = coordinator(&store, registry, 5);

        let id = dispatcher
            .dispatch(DispatchRequest::new(
                "u1",
                NotificationType::Reminder,
                vec![Channel::Email],
            ))
            .await
            .unwrap();

        assert_eq!(channel.calls(), 1);
        let n = store.get(&id).await.unwrap();
        assert_eq!(n.status, NotificationStatus::Failed);
        assert_eq!(
            n.deliveries[0].error_kind,
            Some(DeliveryErrorKind::Permanent)
        );
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let store = InMemoryNotificationStore::new();
        let channel = ScriptedChannel::slow(Channel::Push, Duration::from_millis(200));
        let registry = ChannelRegistry::new().register(channel.clone());
        let dispatcher = DispatchCoordinator::new(
            Arc::new(store.clone()),
            registry,
            fast_retry(1),
            Duration::from_millis(20),
        );

        let id = dispatcher
            .dispatch(DispatchRequest::new(
                "u1",
                NotificationType::Alert,
                vec![Channel::Push],
            ))
            .await
            .unwrap();

        assert_eq!(channel.calls(), 2);
        let n = store.get(&id).await.unwrap();
        assert_eq!(n.status, NotificationStatus::Failed);
        assert!(n.deliveries[0]
            .error
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_partial_success_is_sent() {
        let store = InMemoryNotificationStore::new();
        let email = ScriptedChannel::new(
            Channel::Email,
            vec![DeliveryResult::permanent("bounced")],
        );
        let registry = ChannelRegistry::new()
            .register(email)
            .register(Arc::new(InAppChannel::new()));
        let dispatcher = coordinator(&store, registry, 0);

        let id = dispatcher
            .dispatch(DispatchRequest::new(
                "u1",
                NotificationType::Reminder,
                vec![Channel::Email, Channel::InApp],
            ))
            .await
            .unwrap();

        let n = store.get(&id).await.unwrap();
        assert_eq!(n.status, NotificationStatus::Sent);
        assert_eq!(n.deliveries.len(), 2);
        assert!(!n.deliveries[0].success);
        assert!(n.deliveries[1].success);
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_write() {
        let store = InMemoryNotificationStore::new();
        let registry = ChannelRegistry::new().register(Arc::new(InAppChannel::new()));
        let dispatcher = coordinator(&store, registry, 0);

        let invalid = [
            DispatchRequest::new("", NotificationType::Reminder, vec![Channel::InApp]),
            DispatchRequest::new("u1", NotificationType::Reminder, vec![]),
            DispatchRequest {
                notification_type: None,
                ..DispatchRequest::new("u1", NotificationType::Reminder, vec![Channel::InApp])
            },
            DispatchRequest::new("u1", NotificationType::Reminder, vec![Channel::Email]),
            DispatchRequest::new("u1", NotificationType::Reminder, vec![Channel::InApp])
                .with_payload(json!("just a string")),
        ];

        for request in invalid {
            let err = dispatcher.dispatch(request).await.unwrap_err();
            assert!(matches!(err, NotificationError::Validation(_)), "{err}");
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_channels_are_collapsed() {
        let store = InMemoryNotificationStore::new();
        let channel = ScriptedChannel::new(Channel::InApp, vec![]);
        let registry = ChannelRegistry::new().register(channel.clone());
        let dispatcher = coordinator(&store, registry, 0);

        let id = dispatcher
            .dispatch(DispatchRequest::new(
                "u1",
                NotificationType::System,
                vec![Channel::InApp, Channel::InApp],
            ))
            .await
            .unwrap();

        assert_eq!(channel.calls(), 1);
        assert_eq!(store.get(&id).await.unwrap().channels, vec![Channel::InApp]);
    }

    #[tokio::test]
    async fn test_delete_during_delivery_is_not_an_error() {
        let store = InMemoryNotificationStore::new();
        let registry = ChannelRegistry::new().register(Arc::new(DeletingChannel {
            store: store.clone(),
        }));
        let dispatcher = coordinator(&store, registry, 0);

        let id = dispatcher
            .dispatch(DispatchRequest::new(
                "u1",
                NotificationType::Reminder,
                vec![Channel::Push],
            ))
            .await
            .unwrap();

        assert!(matches!(
            store.get(&id).await,
            Err(NotificationError::NotFound(_))
        ));
    }

    /// Store whose status writes always fail, as if the database went away
    /// between create and the outcome write.
    struct FailingWritesStore {
        inner: InMemoryNotificationStore,
        update_calls: AtomicU32,
    }

    #[async_trait]
    impl NotificationStore for FailingWritesStore {
        async fn create(&self, notification: &Notification) -> Result<String, NotificationError> {
            self.inner.create(notification).await
        }

        async fn get(&self, id: &str) -> Result<Notification, NotificationError> {
            self.inner.get(id).await
        }

        async fn list_by_recipient(
            &self,
            recipient_id: &str,
            filter: &ListFilter,
        ) -> Result<Vec<Notification>, NotificationError> {
            self.inner.list_by_recipient(recipient_id, filter).await
        }

        async fn update_status(
            &self,
            _id: &str,
            _update: StatusUpdate,
        ) -> Result<Notification, NotificationError> {
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            Err(NotificationError::Storage(anyhow::anyhow!("write failed")))
        }

        async fn health_check(&self) -> Result<(), NotificationError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_outcome_write_failure_still_returns_id() {
        let inner = InMemoryNotificationStore::new();
        let store = Arc::new(FailingWritesStore {
            inner: inner.clone(),
            update_calls: AtomicU32::new(0),
        });
        let channel = ScriptedChannel::new(Channel::Email, vec![]);
        let registry = ChannelRegistry::new().register(channel.clone());
        let dispatcher =
            DispatchCoordinator::new(store.clone(), registry, fast_retry(0), Duration::from_secs(1));

        let id = dispatcher
            .dispatch(DispatchRequest::new(
                "u1",
                NotificationType::Reminder,
                vec![Channel::Email],
            ))
            .await
            .unwrap();

        assert_eq!(channel.calls(), 1);
        assert_eq!(
            store.update_calls.load(Ordering::SeqCst),
            OUTCOME_WRITE_ATTEMPTS
        );
        assert_eq!(inner.len(), 1);
        assert_eq!(inner.get(&id).await.unwrap().status, NotificationStatus::Pending);
    }

    #[tokio::test]
    async fn test_blank_recipient_is_rejected() {
        let store = InMemoryNotificationStore::new();
        let registry = ChannelRegistry::new().register(Arc::new(InAppChannel::new()));
        let dispatcher = coordinator(&store, registry, 0);

        let err = dispatcher
            .dispatch(DispatchRequest::new(
                "   ",
                NotificationType::Reminder,
                vec![Channel::InApp],
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, NotificationError::Validation(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_request_accepts_single_channel() {
        let request: DispatchRequest = serde_json::from_value(json!({
            "recipientId": "u1",
            "type": "reminder",
            "channel": "email",
        }))
        .unwrap();

        assert_eq!(request.channel, vec![Channel::Email]);
        assert_eq!(request.notification_type, Some(NotificationType::Reminder));
    }

    #[test]
    fn test_request_missing_fields_deserialize() {
        let request: DispatchRequest = serde_json::from_value(json!({})).unwrap();
        assert!(request.recipient_id.is_empty());
        assert!(request.notification_type.is_none());
        assert!(request.channel.is_empty());
    }
}
