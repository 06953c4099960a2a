use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, DateTime as BsonDateTime, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOptions, IndexOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};

use super::{ListFilter, NotificationStore};
use crate::error::NotificationError;
use crate::models::{Notification, NotificationStatus, StatusUpdate};

const DUPLICATE_KEY_CODE: i32 = 11000;
const MAX_UPDATE_ATTEMPTS: usize = 5;

/// MongoDB-backed store. Status updates are compare-and-swap writes keyed on
/// `{_id, version}`; a lost race re-reads and re-validates the transition.
#[derive(Clone)]
pub struct MongoNotificationStore {
    client: MongoClient,
    db: Database,
}

impl MongoNotificationStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, NotificationError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            NotificationError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), NotificationError> {
        tracing::info!("Creating MongoDB indexes for inbox-service");

        let notifications = self.notifications();

        // Inbox listing: recipient, newest first, id as tie-breaker
        let recipient_index = IndexModel::builder()
            .keys(doc! { "recipient_id": 1, "created_at": -1, "_id": -1 })
            .options(
                IndexOptions::builder()
                    .name("recipient_created_idx".to_string())
                    .build(),
            )
            .build();

        notifications
            .create_index(recipient_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create recipient index: {}", e);
                NotificationError::from(e)
            })?;

        let status_index = IndexModel::builder()
            .keys(doc! { "status": 1 })
            .options(
                IndexOptions::builder()
                    .name("status_idx".to_string())
                    .build(),
            )
            .build();

        notifications
            .create_index(status_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create status index: {}", e);
                NotificationError::from(e)
            })?;

        tracing::info!("Successfully created all MongoDB indexes");
        Ok(())
    }

    pub fn notifications(&self) -> Collection<Notification> {
        self.db.collection("notifications")
    }

    async fn find_any(&self, id: &str) -> Result<Option<Notification>, NotificationError> {
        self.notifications()
            .find_one(doc! { "_id": id }, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to find notification: {}", e);
                NotificationError::from(e)
            })
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE
    )
}

fn list_query(recipient_id: &str, filter: &ListFilter) -> Document {
    let mut query = doc! {
        "recipient_id": recipient_id,
        "status": { "$ne": NotificationStatus::Deleted.as_str() },
    };

    if let Some(status) = filter.status {
        // An explicit `deleted` filter still yields nothing, via $and.
        query.insert(
            "$and",
            vec![doc! { "status": status.as_str() }],
        );
    }

    let mut created = Document::new();
    if let Some(after) = filter.created_after {
        created.insert("$gte", BsonDateTime::from_chrono(after));
    }
    if let Some(before) = filter.created_before {
        created.insert("$lt", BsonDateTime::from_chrono(before));
    }
    if !created.is_empty() {
        query.insert("created_at", created);
    }

    query
}

#[async_trait]
impl NotificationStore for MongoNotificationStore {
    async fn create(&self, notification: &Notification) -> Result<String, NotificationError> {
        self.notifications()
            .insert_one(notification, None)
            .await
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    NotificationError::DuplicateId(notification.id.clone())
                } else {
                    tracing::error!("Failed to insert notification: {}", e);
                    NotificationError::from(e)
                }
            })?;
        Ok(notification.id.clone())
    }

    async fn get(&self, id: &str) -> Result<Notification, NotificationError> {
        match self.find_any(id).await? {
            Some(n) if !n.is_deleted() => Ok(n),
            _ => Err(NotificationError::NotFound(id.to_string())),
        }
    }

    async fn list_by_recipient(
        &self,
        recipient_id: &str,
        filter: &ListFilter,
    ) -> Result<Vec<Notification>, NotificationError> {
        let find_options = FindOptions::builder()
            .sort(doc! { "created_at": -1, "_id": -1 })
            .skip(filter.offset)
            .limit(filter.limit)
            .build();

        let cursor = self
            .notifications()
            .find(list_query(recipient_id, filter), find_options)
            .await
            .map_err(|e| {
                tracing::error!("Failed to list notifications: {}", e);
                NotificationError::from(e)
            })?;

        cursor.try_collect().await.map_err(|e| {
            tracing::error!("Failed to collect notifications: {}", e);
            NotificationError::from(e)
        })
    }

    async fn update_status(
        &self,
        id: &str,
        update: StatusUpdate,
    ) -> Result<Notification, NotificationError> {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let current = self
                .find_any(id)
                .await?
                .ok_or_else(|| NotificationError::NotFound(id.to_string()))?;

            let mut updated = current.clone();
            updated.apply(&update)?;

            let result = self
                .notifications()
                .replace_one(
                    doc! { "_id": id, "version": current.version },
                    &updated,
                    None,
                )
                .await
                .map_err(|e| {
                    tracing::error!("Failed to update notification status: {}", e);
                    NotificationError::from(e)
                })?;

            if result.matched_count == 1 {
                return Ok(updated);
            }

            tracing::debug!(
                notification_id = %id,
                attempt,
                "Concurrent status update detected, re-reading"
            );
        }

        Err(NotificationError::Storage(anyhow::anyhow!(
            "Gave up updating notification {} after {} conflicting writes",
            id,
            MAX_UPDATE_ATTEMPTS
        )))
    }

    async fn health_check(&self) -> Result<(), NotificationError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                NotificationError::from(e)
            })?;
        Ok(())
    }
}
