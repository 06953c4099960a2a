//! Store tests against a live MongoDB.
//!
//! Run with `TEST_MONGODB_URI=mongodb://localhost:27017 cargo test -- --ignored`.

use chrono::{Duration, TimeZone, Utc};
use inbox_service::models::{
    Channel, Notification, NotificationStatus, NotificationType, StatusUpdate,
};
use inbox_service::services::{ListFilter, MongoNotificationStore, NotificationStore};
use inbox_service::NotificationError;

async fn store() -> MongoNotificationStore {
    let uri = std::env::var("TEST_MONGODB_URI")
        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
    let database = format!("inbox_test_{}", uuid::Uuid::new_v4().simple());

    let store = MongoNotificationStore::connect(&uri, &database)
        .await
        .expect("Failed to connect to MongoDB");
    store
        .initialize_indexes()
        .await
        .expect("Failed to create indexes");
    store
}

fn notification(recipient: &str, offset_secs: i64) -> Notification {
    let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    Notification::new(
        recipient.to_string(),
        NotificationType::Reminder,
        vec![Channel::InApp],
        serde_json::json!({ "title": format!("t{}", offset_secs) }),
        base + Duration::seconds(offset_secs),
    )
}

#[tokio::test]
#[ignore = "requires MongoDB"]
async fn create_get_and_duplicate() {
    let store = store().await;
    let n = notification("u1", 0);

    let id = store.create(&n).await.unwrap();
    assert_eq!(id, n.id);

    let fetched = store.get(&id).await.unwrap();
    assert_eq!(fetched.status, NotificationStatus::Pending);
    assert_eq!(fetched.created_at, n.created_at);

    assert!(matches!(
        store.create(&n).await,
        Err(NotificationError::DuplicateId(_))
    ));
}

#[tokio::test]
#[ignore = "requires MongoDB"]
async fn list_is_newest_first_and_hides_deleted() {
    let store = store().await;
    let created: Vec<Notification> = (1..=3).map(|i| notification("u1", i)).collect();
    for n in &created {
        store.create(n).await.unwrap();
    }
    store.create(&notification("u2", 10)).await.unwrap();

    let listed = store
        .list_by_recipient("u1", &ListFilter::default())
        .await
        .unwrap();
    let ids: Vec<&str> = listed.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            created[2].id.as_str(),
            created[1].id.as_str(),
            created[0].id.as_str()
        ]
    );

    store
        .update_status(
            &created[1].id,
            StatusUpdate::new(NotificationStatus::Deleted, Utc::now()),
        )
        .await
        .unwrap();

    let listed = store
        .list_by_recipient("u1", &ListFilter::default().page(0, 10))
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);
    assert!(matches!(
        store.get(&created[1].id).await,
        Err(NotificationError::NotFound(_))
    ));
}

#[tokio::test]
#[ignore = "requires MongoDB"]
async fn update_status_enforces_transitions() {
    let store = store().await;
    let n = notification("u1", 0);
    store.create(&n).await.unwrap();

    let err = store
        .update_status(&n.id, StatusUpdate::new(NotificationStatus::Read, Utc::now()))
        .await
        .unwrap_err();
    assert!(matches!(err, NotificationError::InvalidTransition { .. }));

    let sent = store
        .update_status(&n.id, StatusUpdate::new(NotificationStatus::Sent, Utc::now()))
        .await
        .unwrap();
    assert_eq!(sent.version, n.version + 1);
    assert!(sent.delivered_at.is_some());

    let filtered = store
        .list_by_recipient(
            "u1",
            &ListFilter::default().with_status(NotificationStatus::Sent),
        )
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
}

#[tokio::test]
#[ignore = "requires MongoDB"]
async fn concurrent_updates_apply_once() {
    let store = store().await;
    let n = notification("u1", 0);
    store.create(&n).await.unwrap();

    let (a, b) = tokio::join!(
        store.update_status(&n.id, StatusUpdate::new(NotificationStatus::Sent, Utc::now())),
        store.update_status(&n.id, StatusUpdate::new(NotificationStatus::Failed, Utc::now())),
    );

    assert!(a.is_ok() ^ b.is_ok());
    assert_eq!(store.get(&n.id).await.unwrap().version, n.version + 1);
}
