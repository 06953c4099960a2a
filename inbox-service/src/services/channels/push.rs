use super::{DeliveryChannel, DeliveryResult, ProviderError};
use crate::config::FcmConfig;
use crate::models::{Channel, Notification};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Push rendering of a notification payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PushContent {
    pub device_token: Option<String>,
    pub title: String,
    pub body: String,
    pub data: HashMap<String, String>,
}

impl PushContent {
    /// Reads `deviceToken`, `title`, `body`/`message` and the string values
    /// of `data` from the payload. The notification id and type are always
    /// added to `data` so the app can deduplicate and route the message.
    pub fn from_notification(notification: &Notification) -> Self {
        let title = notification
            .payload_str("title")
            .map(str::to_string)
            .unwrap_or_else(|| format!("New {}", notification.notification_type));

        let body = notification
            .payload_str("body")
            .or_else(|| notification.payload_str("message"))
            .unwrap_or_default()
            .to_string();

        let mut data: HashMap<String, String> = notification
            .payload
            .get("data")
            .and_then(|d| d.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        data.insert("notificationId".to_string(), notification.id.clone());
        data.insert(
            "type".to_string(),
            notification.notification_type.to_string(),
        );

        Self {
            device_token: notification.payload_str("deviceToken").map(str::to_string),
            title,
            body,
            data,
        }
    }
}

#[derive(Debug, Serialize)]
struct FcmRequest {
    message: FcmMessage,
}

#[derive(Debug, Serialize)]
struct FcmMessage {
    token: String,
    notification: FcmNotification,
    data: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct FcmNotification {
    title: String,
    body: String,
}

#[derive(Debug, Deserialize)]
struct FcmResponse {
    name: Option<String>,
}

/// Firebase Cloud Messaging HTTP v1 adapter.
pub struct FcmPushChannel {
    config: FcmConfig,
    client: Client,
}

impl FcmPushChannel {
    pub fn new(config: FcmConfig) -> Result<Self, ProviderError> {
        if config.project_id.is_empty() {
            return Err(ProviderError::Configuration(
                "FCM project_id is not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Configuration(format!("Failed to build client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.project_id
        )
    }

    async fn deliver(&self, notification: &Notification) -> Result<Option<String>, ProviderError> {
        let content = PushContent::from_notification(notification);
        let token = content.device_token.clone().ok_or_else(|| {
            ProviderError::InvalidRecipient("payload has no deviceToken".to_string())
        })?;

        // Minting the OAuth2 token from a service account happens outside
        // this service; we only present it.
        if self.config.access_token.is_empty() {
            return Err(ProviderError::Authentication(
                "FCM access token not configured".to_string(),
            ));
        }

        let request = FcmRequest {
            message: FcmMessage {
                token,
                notification: FcmNotification {
                    title: content.title,
                    body: content.body,
                },
                data: content.data,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(format!("FCM request timed out: {}", e))
                } else {
                    ProviderError::Connection(format!("Failed to connect to FCM: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        // FCM accepted the message; an unreadable body only loses the message name.
        let body = response.text().await.unwrap_or_else(|e| {
            tracing::warn!(notification_id = %notification.id, "Failed to read FCM response: {}", e);
            String::new()
        });
        let name = message_name(&body);
        if name.is_none() {
            tracing::warn!(
                notification_id = %notification.id,
                "FCM response carried no message name"
            );
        }

        tracing::info!(
            notification_id = %notification.id,
            "Push notification sent successfully via FCM"
        );

        Ok(name)
    }
}

fn message_name(body: &str) -> Option<String> {
    serde_json::from_str::<FcmResponse>(body)
        .ok()
        .and_then(|r| r.name)
}

fn classify_status(status: StatusCode, body: String) -> ProviderError {
    let detail = format!("FCM returned {}: {}", status, body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Authentication(detail),
        StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => ProviderError::InvalidRecipient(detail),
        s if s.is_server_error() => ProviderError::SendFailed(detail),
        _ => ProviderError::Rejected(detail),
    }
}

#[async_trait]
impl DeliveryChannel for FcmPushChannel {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn send(&self, notification: &Notification) -> DeliveryResult {
        self.deliver(notification).await.into()
    }
}

/// Used when FCM is disabled; logs instead of sending.
#[derive(Default)]
pub struct MockPushChannel {
    send_count: AtomicU64,
}

impl MockPushChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryChannel for MockPushChannel {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn send(&self, notification: &Notification) -> DeliveryResult {
        let count = self.send_count.fetch_add(1, Ordering::SeqCst) + 1;
        let content = PushContent::from_notification(notification);

        tracing::info!(
            notification_id = %notification.id,
            title = %content.title,
            "[MOCK] Push notification would be sent"
        );

        DeliveryResult::success(Some(format!("mock-push-{}", count)))
    }
}
