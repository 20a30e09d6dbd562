pub mod call;
pub mod notification;

pub use call::{CallInput, RepeatDay, ScheduledCall, ScreenType};
pub use notification::{
    CallNotificationPayload, DeliveredNotification, NotificationBehavior, NotificationContent,
    NotificationPriority, NotificationRequest, NotificationTrigger, PendingNotification,
    PermissionStatus,
};
