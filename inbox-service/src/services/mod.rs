pub mod channels;
pub mod dispatch;
pub mod inbox;
pub mod metrics;
pub mod store;

pub use channels::{
    ChannelRegistry, DeliveryChannel, DeliveryResult, FcmPushChannel, InAppChannel,
    MockEmailChannel, MockPushChannel, ProviderError, SmtpEmailChannel,
};
pub use dispatch::{DispatchCoordinator, DispatchRequest};
pub use inbox::{InboxPage, InboxService, PageRequest};
pub use metrics::{get_metrics, init_metrics};
pub use store::{InMemoryNotificationStore, ListFilter, MongoNotificationStore, NotificationStore};
