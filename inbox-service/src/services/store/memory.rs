use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;

use super::{ListFilter, NotificationStore};
use crate::error::NotificationError;
use crate::models::{Notification, StatusUpdate};

/// Process-local store for tests and local development.
///
/// Each entry is guarded by its shard lock, so concurrent updates of one id
/// are serialized while other ids proceed independently.
#[derive(Clone, Default)]
pub struct InMemoryNotificationStore {
    notifications: Arc<DashMap<String, Notification>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn create(&self, notification: &Notification) -> Result<String, NotificationError> {
        match self.notifications.entry(notification.id.clone()) {
            Entry::Occupied(_) => Err(NotificationError::DuplicateId(notification.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(notification.clone());
                Ok(notification.id.clone())
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Notification, NotificationError> {
        self.notifications
            .get(id)
            .filter(|n| !n.is_deleted())
            .map(|n| n.value().clone())
            .ok_or_else(|| NotificationError::NotFound(id.to_string()))
    }

    async fn list_by_recipient(
        &self,
        recipient_id: &str,
        filter: &ListFilter,
    ) -> Result<Vec<Notification>, NotificationError> {
        let mut matched: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id && filter.matches(n.value()))
            .map(|n| n.value().clone())
            .collect();

        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let limit = filter
            .limit
            .map(|l| l.max(0) as usize)
            .unwrap_or(usize::MAX);

        Ok(matched
            .into_iter()
            .skip(filter.offset as usize)
            .take(limit)
            .collect())
    }

    async fn update_status(
        &self,
        id: &str,
        update: StatusUpdate,
    ) -> Result<Notification, NotificationError> {
        let mut entry = self
            .notifications
            .get_mut(id)
            .ok_or_else(|| NotificationError::NotFound(id.to_string()))?;

        // Apply to a copy so a rejected change leaves the record untouched.
        let mut updated = entry.value().clone();
        updated.apply(&update)?;
        *entry = updated.clone();

        Ok(updated)
    }

    async fn health_check(&self) -> Result<(), NotificationError> {
        Ok(())
    }
}
