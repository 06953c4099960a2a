//! HTTP handlers for inbox-service.

pub mod email;
pub mod health;
pub mod notifications;

pub use email::send_email;
pub use health::{health_check, metrics_endpoint, readiness_check};
pub use notifications::{
    create_notification, delete_notification, get_notification, list_notifications,
    mark_all_read, mark_read,
};
