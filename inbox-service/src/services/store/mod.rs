pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::NotificationError;
use crate::models::{Notification, NotificationStatus, StatusUpdate};

pub use memory::InMemoryNotificationStore;
pub use mongo::MongoNotificationStore;

/// Restricts and pages a recipient listing.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<NotificationStatus>,
    /// Inclusive lower bound on `created_at`.
    pub created_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub created_before: Option<DateTime<Utc>>,
    pub offset: u64,
    pub limit: Option<i64>,
}

impl ListFilter {
    pub fn with_status(mut self, status: NotificationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn page(mut self, offset: u64, limit: i64) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// In-process equivalent of the query the Mongo store sends.
    pub fn matches(&self, notification: &Notification) -> bool {
        if notification.is_deleted() {
            return false;
        }
        if let Some(status) = self.status {
            if notification.status != status {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if notification.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if notification.created_at >= before {
                return false;
            }
        }
        true
    }
}

/// Durable record of notifications, indexed by id and by recipient.
///
/// Implementations must serialize status updates of the same id; updates of
/// different ids must not block each other.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert a new notification. Fails with `DuplicateId` on collision.
    async fn create(&self, notification: &Notification) -> Result<String, NotificationError>;

    /// Fetch a live notification. Deleted records are reported as `NotFound`.
    async fn get(&self, id: &str) -> Result<Notification, NotificationError>;

    /// Newest first by `created_at`, ties broken by id (descending).
    /// Deleted records are never listed.
    async fn list_by_recipient(
        &self,
        recipient_id: &str,
        filter: &ListFilter,
    ) -> Result<Vec<Notification>, NotificationError>;

    /// Atomically apply a status change, enforcing the lifecycle against the
    /// record's current status. Returns the updated record.
    async fn update_status(
        &self,
        id: &str,
        update: StatusUpdate,
    ) -> Result<Notification, NotificationError>;

    async fn health_check(&self) -> Result<(), NotificationError>;
}
