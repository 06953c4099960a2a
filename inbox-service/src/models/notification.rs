use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::NotificationError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Push,
    InApp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
            Channel::InApp => "in_app",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Reminder,
    Alert,
    Marketing,
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Reminder => "reminder",
            NotificationType::Alert => "alert",
            NotificationType::Marketing => "marketing",
            NotificationType::System => "system",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Read,
    Deleted,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Read => "read",
            NotificationStatus::Deleted => "deleted",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// ```text
    /// pending -> sent | failed | deleted
    /// sent    -> read | deleted
    /// failed  -> deleted
    /// read    -> deleted
    /// ```
    pub fn can_transition_to(self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;

        matches!(
            (self, next),
            (Pending, Sent)
                | (Pending, Failed)
                | (Pending, Deleted)
                | (Sent, Read)
                | (Sent, Deleted)
                | (Failed, Deleted)
                | (Read, Deleted)
        )
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(NotificationStatus::Pending),
            "sent" => Ok(NotificationStatus::Sent),
            "failed" => Ok(NotificationStatus::Failed),
            "read" => Ok(NotificationStatus::Read),
            "deleted" => Ok(NotificationStatus::Deleted),
            _ => Err(NotificationError::Validation(format!(
                "Invalid status: {}. Must be one of: pending, sent, failed, read, deleted",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryErrorKind {
    /// Timeouts, rate limits, provider hiccups. Worth another attempt.
    Transient,
    /// Bad address, rejected token, misconfiguration. Never retried.
    Permanent,
}

/// Outcome of delivering a notification over one channel, retries included.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    pub channel: Channel,
    pub attempts: u32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<DeliveryErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: String,
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub channels: Vec<Channel>,
    pub status: NotificationStatus,
    #[serde(default)]
    pub deliveries: Vec<DeliveryAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Bumped on every status change; used for compare-and-swap writes.
    pub version: i64,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub deleted_at: Option<DateTime<Utc>>,
}

// Optional DateTime<Utc> stored as BSON DateTime
mod opt_chrono_datetime_as_bson_datetime {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(dt) => bson::DateTime::from_chrono(*dt).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<bson::DateTime> = Option::deserialize(deserializer)?;
        Ok(opt.map(|dt| dt.to_chrono()))
    }
}

/// A requested status change together with whatever it records.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: NotificationStatus,
    pub at: DateTime<Utc>,
    pub deliveries: Option<Vec<DeliveryAttempt>>,
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: NotificationStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            at,
            deliveries: None,
            error: None,
        }
    }

    pub fn with_deliveries(mut self, deliveries: Vec<DeliveryAttempt>) -> Self {
        self.deliveries = Some(deliveries);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

impl Notification {
    pub fn new(
        recipient_id: String,
        notification_type: NotificationType,
        channels: Vec<Channel>,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            recipient_id,
            notification_type,
            payload,
            channels,
            status: NotificationStatus::Pending,
            deliveries: Vec::new(),
            error: None,
            version: 0,
            created_at,
            updated_at: created_at,
            delivered_at: None,
            read_at: None,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.status == NotificationStatus::Deleted
    }

    /// Look up a string field in the payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }

    /// Apply a status change in place, enforcing the lifecycle.
    pub fn apply(&mut self, update: &StatusUpdate) -> Result<(), NotificationError> {
        if !self.status.can_transition_to(update.status) {
            return Err(NotificationError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: update.status,
            });
        }

        match update.status {
            NotificationStatus::Sent => self.delivered_at = Some(update.at),
            NotificationStatus::Read => self.read_at = Some(update.at),
            NotificationStatus::Deleted => self.deleted_at = Some(update.at),
            NotificationStatus::Failed | NotificationStatus::Pending => {}
        }

        if let Some(deliveries) = &update.deliveries {
            self.deliveries = deliveries.clone();
        }
        if update.error.is_some() {
            self.error = update.error.clone();
        }

        self.status = update.status;
        self.updated_at = update.at;
        self.version += 1;
        Ok(())
    }
}
