//! Recipient-facing read model over the notification store.
//!
//! Pagination is offset based: `page` is 1-based and `next_page` is only
//! present when at least one more record exists past the current page.

use chrono::Utc;
use std::sync::Arc;

use super::store::{ListFilter, NotificationStore};
use crate::error::NotificationError;
use crate::models::{Notification, NotificationStatus, StatusUpdate};

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    /// Normalizes out-of-range values instead of rejecting them.
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

#[derive(Debug, Clone)]
pub struct InboxPage {
    pub data: Vec<Notification>,
    pub next_page: Option<u32>,
}

#[derive(Clone)]
pub struct InboxService {
    store: Arc<dyn NotificationStore>,
}

impl InboxService {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, filter))]
    pub async fn list_inbox(
        &self,
        recipient_id: &str,
        page: PageRequest,
        filter: ListFilter,
    ) -> Result<InboxPage, NotificationError> {
        if recipient_id.is_empty() {
            return Err(NotificationError::Validation(
                "recipientId is required".to_string(),
            ));
        }

        // One extra row tells us whether another page exists.
        let filter = filter.page(page.offset(), i64::from(page.page_size) + 1);
        let mut data = self.store.list_by_recipient(recipient_id, &filter).await?;

        let next_page = if data.len() > page.page_size as usize {
            data.truncate(page.page_size as usize);
            Some(page.page + 1)
        } else {
            None
        };

        Ok(InboxPage { data, next_page })
    }

    pub async fn get(&self, id: &str) -> Result<Notification, NotificationError> {
        self.store.get(id).await
    }

    /// Only `sent` notifications can be marked read.
    #[tracing::instrument(skip(self))]
    pub async fn mark_read(&self, id: &str) -> Result<Notification, NotificationError> {
        let notification = self
            .store
            .update_status(id, StatusUpdate::new(NotificationStatus::Read, Utc::now()))
            .await?;
        tracing::info!(notification_id = %id, "Notification marked read");
        Ok(notification)
    }

    /// Mark every delivered, unread notification of a recipient as read.
    /// Records that change concurrently are skipped. Returns how many were
    /// marked.
    #[tracing::instrument(skip(self))]
    pub async fn mark_all_read(&self, recipient_id: &str) -> Result<u64, NotificationError> {
        let unread = self
            .store
            .list_by_recipient(
                recipient_id,
                &ListFilter::default().with_status(NotificationStatus::Sent),
            )
            .await?;

        let mut updated = 0;
        for notification in unread {
            match self
                .store
                .update_status(
                    &notification.id,
                    StatusUpdate::new(NotificationStatus::Read, Utc::now()),
                )
                .await
            {
                Ok(_) => updated += 1,
                Err(NotificationError::InvalidTransition { .. })
                | Err(NotificationError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        tracing::info!(recipient_id = %recipient_id, updated, "Marked inbox read");
        Ok(updated)
    }

    /// Logically delete. Deleting an already deleted notification is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), NotificationError> {
        match self
            .store
            .update_status(id, StatusUpdate::new(NotificationStatus::Deleted, Utc::now()))
            .await
        {
            Ok(_) => {
                tracing::info!(notification_id = %id, "Notification deleted");
                Ok(())
            }
            Err(NotificationError::InvalidTransition {
                from: NotificationStatus::Deleted,
                ..
            }) => {
                tracing::debug!(notification_id = %id, "Notification already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
