//! In-process notification platform backed by the SQLite database.
//!
//! Future alerts live in `pending_notifications` until their trigger passes,
//! so they survive a daemon restart. The permission decision is persisted
//! under the `notificationSettings` key.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    db::Database,
    models::{
        DeliveredNotification, NotificationRequest, NotificationTrigger, PendingNotification,
        PermissionStatus,
    },
};

use super::platform::NotificationPlatform;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub const NOTIFICATION_SETTINGS_KEY: &str = "notificationSettings";

/// How this host answers a permission request it has never seen before.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionPolicy {
    #[default]
    Grant,
    Deny,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredNotificationSettings {
    #[serde(default)]
    permission: PermissionStatus,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

pub struct LocalNotificationCenter {
    db: Database,
    policy: PermissionPolicy,
    deliveries: mpsc::UnboundedSender<DeliveredNotification>,
}

impl LocalNotificationCenter {
    pub fn new(
        db: Database,
        policy: PermissionPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<DeliveredNotification>) {
        let (deliveries, receiver) = mpsc::unbounded_channel();
        (
            Self {
                db,
                policy,
                deliveries,
            },
            receiver,
        )
    }

    async fn load_settings(&self) -> Result<StoredNotificationSettings> {
        let raw = self.db.get_item(NOTIFICATION_SETTINGS_KEY).await?;
        Ok(raw
            .map(|json| serde_json::from_str(&json).unwrap_or_default())
            .unwrap_or_default())
    }

    /// Records the user's decision, e.g. after re-granting in settings.
    pub async fn set_permission(&self, permission: PermissionStatus) -> Result<()> {
        let settings = StoredNotificationSettings {
            permission,
            updated_at: Some(Utc::now()),
        };
        let json = serde_json::to_string(&settings).context("failed to encode notification settings")?;
        self.db.set_item(NOTIFICATION_SETTINGS_KEY, json).await
    }

    /// Hands every alert whose trigger has passed to the delivery channel.
    pub async fn deliver_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.db.take_due_notifications(now).await?;
        let count = due.len();
        for pending in due {
            self.emit(pending, now);
        }
        Ok(count)
    }

    fn emit(&self, pending: PendingNotification, delivered_at: DateTime<Utc>) {
        let delivered = DeliveredNotification {
            identifier: pending.identifier,
            content: pending.content,
            trigger: pending.trigger,
            delivered_at,
        };
        if self.deliveries.send(delivered).is_err() {
            log_warn!("notification delivered with no listener attached");
        }
    }

    pub fn spawn_delivery_loop(
        self: Arc<Self>,
        every: Duration,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.deliver_due(Utc::now()).await {
                            Ok(0) => {}
                            Ok(count) => log_info!("delivered {count} scheduled notification(s)"),
                            Err(err) => log_error!("notification delivery failed: {err:?}"),
                        }
                    }
                    _ = cancel_token.cancelled() => {
                        log_info!("notification delivery loop shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl NotificationPlatform for LocalNotificationCenter {
    async fn permission_status(&self) -> Result<PermissionStatus> {
        Ok(self.load_settings().await?.permission)
    }

    async fn request_permission(&self) -> Result<PermissionStatus> {
        let current = self.load_settings().await?.permission;
        if current != PermissionStatus::Undetermined {
            return Ok(current);
        }

        let decided = match self.policy {
            PermissionPolicy::Grant => PermissionStatus::Granted,
            PermissionPolicy::Deny => PermissionStatus::Denied,
        };
        self.set_permission(decided).await?;
        Ok(decided)
    }

    async fn schedule(&self, request: NotificationRequest) -> Result<String> {
        let now = Utc::now();
        let pending = PendingNotification {
            identifier: Uuid::new_v4().to_string(),
            content: request.content,
            trigger: request.trigger,
        };
        let identifier = pending.identifier.clone();

        match pending.trigger {
            NotificationTrigger::Immediate => self.emit(pending, now),
            NotificationTrigger::At(_) => self.db.insert_pending_notification(&pending, now).await?,
        }

        Ok(identifier)
    }

    async fn pending(&self) -> Result<Vec<PendingNotification>> {
        self.db.list_pending_notifications().await
    }

    async fn cancel(&self, identifier: &str) -> Result<()> {
        self.db.delete_pending_notification(identifier).await?;
        Ok(())
    }

    async fn cancel_all(&self) -> Result<()> {
        self.db.clear_pending_notifications().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{CallNotificationPayload, NotificationContent, NotificationPriority},
        test_utils::{call_at, temp_database},
    };

    fn request(trigger: NotificationTrigger) -> NotificationRequest {
        let call = call_at("call-1", Utc::now());
        NotificationRequest {
            content: NotificationContent {
                title: call.notification_title(),
                body: "Call from 555".into(),
                data: CallNotificationPayload::for_call(&call).unwrap(),
                sound: true,
                badge: None,
                priority: NotificationPriority::High,
                silent: false,
                auto_dismiss: true,
            },
            trigger,
        }
    }

    #[tokio::test]
    async fn permission_request_follows_policy_once() {
        let (_dir, db) = temp_database();
        let (center, _rx) = LocalNotificationCenter::new(db, PermissionPolicy::Deny);

        assert_eq!(
            center.permission_status().await.unwrap(),
            PermissionStatus::Undetermined
        );
        assert_eq!(
            center.request_permission().await.unwrap(),
            PermissionStatus::Denied
        );

        center.set_permission(PermissionStatus::Granted).await.unwrap();
        assert_eq!(
            center.request_permission().await.unwrap(),
            PermissionStatus::Granted
        );
    }

    #[tokio::test]
    async fn future_alerts_wait_for_their_trigger() {
        let (_dir, db) = temp_database();
        let (center, mut rx) = LocalNotificationCenter::new(db, PermissionPolicy::Grant);
        let trigger_at = Utc::now() + chrono::Duration::minutes(10);

        let id = center
            .schedule(request(NotificationTrigger::At(trigger_at)))
            .await
            .unwrap();
        let pending = center.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].identifier, id);
        assert_eq!(pending[0].content.data.call_id, "call-1");

        assert_eq!(center.deliver_due(Utc::now()).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());

        assert_eq!(center.deliver_due(trigger_at).await.unwrap(), 1);
        let delivered = rx.try_recv().unwrap();
        assert_eq!(delivered.identifier, id);
        assert_eq!(delivered.trigger, NotificationTrigger::At(trigger_at));
        assert!(center.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn immediate_alerts_skip_the_queue() {
        let (_dir, db) = temp_database();
        let (center, mut rx) = LocalNotificationCenter::new(db, PermissionPolicy::Grant);

        center
            .schedule(request(NotificationTrigger::Immediate))
            .await
            .unwrap();
        assert!(center.pending().await.unwrap().is_empty());
        assert_eq!(rx.try_recv().unwrap().trigger, NotificationTrigger::Immediate);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (_dir, db) = temp_database();
        let (center, _rx) = LocalNotificationCenter::new(db, PermissionPolicy::Grant);
        let later = Utc::now() + chrono::Duration::hours(1);

        let id = center
            .schedule(request(NotificationTrigger::At(later)))
            .await
            .unwrap();
        center
            .schedule(request(NotificationTrigger::At(later)))
            .await
            .unwrap();

        center.cancel(&id).await.unwrap();
        center.cancel(&id).await.unwrap();
        assert_eq!(center.pending().await.unwrap().len(), 1);

        center.cancel_all().await.unwrap();
        assert!(center.pending().await.unwrap().is_empty());
    }
}
