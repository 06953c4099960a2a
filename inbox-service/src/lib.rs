//! Notification dispatch and inbox management for the pet-care app.
//!
//! Notifications are created by the [`services::DispatchCoordinator`],
//! delivered through [`services::DeliveryChannel`] adapters and read back
//! through the [`services::InboxService`]. Everything persists through a
//! [`services::NotificationStore`].

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

pub use error::NotificationError;
pub use startup::{build_router, AppState, Application};
