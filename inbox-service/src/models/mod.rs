pub mod notification;

pub use notification::{
    Channel, DeliveryAttempt, DeliveryErrorKind, Notification, NotificationStatus,
    NotificationType, StatusUpdate,
};
