pub mod dispatcher;
pub mod local;
pub mod platform;

pub use dispatcher::NotificationDispatcher;
pub use local::{LocalNotificationCenter, PermissionPolicy};
pub use platform::NotificationPlatform;
