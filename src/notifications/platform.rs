use anyhow::Result;
use async_trait::async_trait;

use crate::models::{NotificationRequest, PendingNotification, PermissionStatus};

/// Local-alert subsystem the dispatcher talks to.
///
/// Implementations report failures as errors; the dispatcher is the layer
/// that turns them into logged no-ops.
#[async_trait]
pub trait NotificationPlatform: Send + Sync {
    async fn permission_status(&self) -> Result<PermissionStatus>;

    /// Asks the user. Platforms do not re-prompt after a denial.
    async fn request_permission(&self) -> Result<PermissionStatus>;

    /// Registers an alert and returns its platform identifier.
    async fn schedule(&self, request: NotificationRequest) -> Result<String>;

    async fn pending(&self) -> Result<Vec<PendingNotification>>;

    async fn cancel(&self, identifier: &str) -> Result<()>;

    async fn cancel_all(&self) -> Result<()>;
}
