//! Schedules, cancels and lists platform alerts for scheduled calls.
//!
//! None of these methods fail: a missed or rejected alert is never fatal to
//! the rest of the app, so every failure is logged and reduced to `None`,
//! an empty list or a no-op.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{DateTime, FixedOffset, Utc};
use log::{debug, error, info, warn};

use crate::{
    error::{EngineError, EngineResult},
    models::{
        CallNotificationPayload, NotificationBehavior, NotificationContent, NotificationPriority,
        NotificationRequest, NotificationTrigger, PendingNotification, PermissionStatus,
        ScheduledCall,
    },
};

use super::platform::NotificationPlatform;

pub struct NotificationDispatcher {
    platform: Arc<dyn NotificationPlatform>,
    behavior: NotificationBehavior,
    zone: FixedOffset,
    /// Set once a permission request is declined. Cleared only when the
    /// platform reports a re-grant; the user is never prompted again.
    denied: AtomicBool,
}

impl NotificationDispatcher {
    pub fn new(
        platform: Arc<dyn NotificationPlatform>,
        behavior: NotificationBehavior,
        zone: FixedOffset,
    ) -> Self {
        Self {
            platform,
            behavior,
            zone,
            denied: AtomicBool::new(false),
        }
    }

    pub fn behavior(&self) -> NotificationBehavior {
        self.behavior
    }

    /// Queries the permission and asks for it when still undetermined.
    /// A denial is reported here, at the point of request, and remembered.
    pub async fn request_permissions(&self) -> EngineResult<PermissionStatus> {
        let current = self
            .platform
            .permission_status()
            .await
            .map_err(|err| EngineError::DispatchFailure(format!("{err:#}")))?;
        if current.is_granted() {
            self.denied.store(false, Ordering::Release);
            return Ok(current);
        }

        let requested = self
            .platform
            .request_permission()
            .await
            .map_err(|err| EngineError::DispatchFailure(format!("{err:#}")))?;
        if requested.is_granted() {
            self.denied.store(false, Ordering::Release);
            Ok(requested)
        } else {
            if !self.denied.swap(true, Ordering::AcqRel) {
                warn!("Notification permission denied; scheduled calls will not alert until it is granted");
            }
            Err(EngineError::PermissionDenied)
        }
    }

    async fn ensure_permission(&self) -> EngineResult<()> {
        if !self.denied.load(Ordering::Acquire) {
            return self.request_permissions().await.map(|_| ());
        }

        match self.platform.permission_status().await {
            Ok(PermissionStatus::Granted) => {
                info!("Notification permission re-granted");
                self.denied.store(false, Ordering::Release);
                Ok(())
            }
            Ok(_) => Err(EngineError::PermissionDenied),
            Err(err) => Err(EngineError::DispatchFailure(format!("{err:#}"))),
        }
    }

    /// Schedules the alert for `call.scheduled_date`, replacing any pending
    /// alert for the same record. Returns `None` for calls already in the past.
    pub async fn schedule(&self, call: &ScheduledCall) -> Option<String> {
        self.schedule_occurrence(call, call.scheduled_date).await
    }

    /// Same as [`schedule`](Self::schedule) for an explicit occurrence of a
    /// repeating call.
    pub async fn schedule_occurrence(
        &self,
        call: &ScheduledCall,
        occurrence: DateTime<Utc>,
    ) -> Option<String> {
        if let Err(err) = self.ensure_permission().await {
            debug!("Not scheduling call {}: {err}", call.id);
            return None;
        }

        self.cancel(&call.id).await;

        if occurrence <= Utc::now() {
            return None;
        }

        self.submit(call, occurrence, NotificationTrigger::At(occurrence))
            .await
    }

    /// Fires an alert right away for an occurrence whose window is already open.
    pub async fn deliver_now(
        &self,
        call: &ScheduledCall,
        occurrence: DateTime<Utc>,
    ) -> Option<String> {
        if let Err(err) = self.ensure_permission().await {
            debug!("Not delivering call {}: {err}", call.id);
            return None;
        }

        self.submit(call, occurrence, NotificationTrigger::Immediate)
            .await
    }

    async fn submit(
        &self,
        call: &ScheduledCall,
        occurrence: DateTime<Utc>,
        trigger: NotificationTrigger,
    ) -> Option<String> {
        let request = match self.build_request(call, occurrence, trigger) {
            Ok(request) => request,
            Err(err) => {
                error!("Failed to build notification for call {}: {err}", call.id);
                return None;
            }
        };

        match self.platform.schedule(request).await {
            Ok(identifier) => {
                debug!("Scheduled notification {identifier} for call {}", call.id);
                Some(identifier)
            }
            Err(err) => {
                let failure = EngineError::DispatchFailure(format!("{err:#}"));
                error!("Error scheduling notification for call {}: {failure}", call.id);
                None
            }
        }
    }

    fn build_request(
        &self,
        call: &ScheduledCall,
        occurrence: DateTime<Utc>,
        trigger: NotificationTrigger,
    ) -> serde_json::Result<NotificationRequest> {
        Ok(NotificationRequest {
            content: NotificationContent {
                title: call.notification_title(),
                body: call.notification_body(occurrence, self.zone),
                data: CallNotificationPayload::for_occurrence(call, occurrence)?,
                sound: self.behavior.should_play_sound,
                badge: self.behavior.should_set_badge.then_some(1),
                priority: NotificationPriority::High,
                silent: self.behavior.is_silent(),
                // Immediate alerts stay up until the user acts on them.
                auto_dismiss: !matches!(trigger, NotificationTrigger::Immediate),
            },
            trigger,
        })
    }

    /// Cancels every pending alert for `call_id`. No-op when none exists.
    pub async fn cancel(&self, call_id: &str) {
        for pending in self.list_pending().await {
            if pending.content.data.call_id != call_id {
                continue;
            }
            if let Err(err) = self.platform.cancel(&pending.identifier).await {
                error!("Error canceling notification {}: {err:#}", pending.identifier);
            }
        }
    }

    pub async fn cancel_all(&self) {
        if let Err(err) = self.platform.cancel_all().await {
            error!("Error canceling all notifications: {err:#}");
        }
    }

    pub async fn list_pending(&self) -> Vec<PendingNotification> {
        match self.platform.pending().await {
            Ok(pending) => pending,
            Err(err) => {
                error!("Error getting scheduled notifications: {err:#}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        schedule::utc_zone,
        test_utils::{call_at, MemoryPlatform},
    };
    use chrono::Duration;

    fn dispatcher(platform: Arc<MemoryPlatform>) -> NotificationDispatcher {
        NotificationDispatcher::new(platform, NotificationBehavior::default(), utc_zone())
    }

    #[tokio::test]
    async fn scheduling_twice_leaves_one_pending_alert() {
        let platform = Arc::new(MemoryPlatform::granted());
        let dispatcher = dispatcher(platform.clone());
        let call = call_at("1", Utc::now() + Duration::minutes(10));

        assert!(dispatcher.schedule(&call).await.is_some());
        assert!(dispatcher.schedule(&call).await.is_some());

        let pending = dispatcher.list_pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].content.data.call_id, "1");
        assert_eq!(
            pending[0].trigger,
            NotificationTrigger::At(call.scheduled_date)
        );
        assert_eq!(pending[0].content.title, "Incoming Call: Caller 1");
    }

    #[tokio::test]
    async fn past_calls_are_never_scheduled() {
        let platform = Arc::new(MemoryPlatform::granted());
        let dispatcher = dispatcher(platform.clone());

        for offset in [Duration::zero(), Duration::seconds(-1), Duration::days(-3)] {
            let call = call_at("1", Utc::now() + offset);
            assert_eq!(dispatcher.schedule(&call).await, None);
        }
        assert!(dispatcher.list_pending().await.is_empty());
        assert_eq!(platform.schedule_requests(), 0);
    }

    #[tokio::test]
    async fn rescheduling_into_the_past_drops_the_old_alert() {
        let platform = Arc::new(MemoryPlatform::granted());
        let dispatcher = dispatcher(platform.clone());
        let mut call = call_at("1", Utc::now() + Duration::minutes(10));
        dispatcher.schedule(&call).await.unwrap();

        call.scheduled_date = Utc::now() - Duration::minutes(1);
        assert_eq!(dispatcher.schedule(&call).await, None);
        assert!(dispatcher.list_pending().await.is_empty());
    }

    #[tokio::test]
    async fn denied_permission_blocks_every_later_schedule() {
        let platform = Arc::new(MemoryPlatform::declining());
        let dispatcher = dispatcher(platform.clone());

        for minutes in 1..=3 {
            let call = call_at(&minutes.to_string(), Utc::now() + Duration::minutes(minutes));
            assert_eq!(dispatcher.schedule(&call).await, None);
            assert_eq!(
                dispatcher
                    .deliver_now(&call, call.scheduled_date)
                    .await,
                None
            );
        }

        assert_eq!(platform.schedule_requests(), 0);
        assert_eq!(platform.permission_requests(), 1);
        assert!(matches!(
            dispatcher.request_permissions().await,
            Err(EngineError::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn regrant_lifts_the_block() {
        let platform = Arc::new(MemoryPlatform::declining());
        let dispatcher = dispatcher(platform.clone());
        let call = call_at("1", Utc::now() + Duration::minutes(5));

        assert_eq!(dispatcher.schedule(&call).await, None);
        platform.set_permission(PermissionStatus::Granted);
        assert!(dispatcher.schedule(&call).await.is_some());
    }

    #[tokio::test]
    async fn platform_failures_become_none() {
        let platform = Arc::new(MemoryPlatform::granted());
        platform.fail_schedules(true);
        let dispatcher = dispatcher(platform.clone());
        let call = call_at("1", Utc::now() + Duration::minutes(5));

        assert_eq!(dispatcher.schedule(&call).await, None);
        assert_eq!(dispatcher.deliver_now(&call, Utc::now()).await, None);
        assert!(dispatcher.list_pending().await.is_empty());
    }

    #[tokio::test]
    async fn immediate_delivery_carries_the_payload() {
        let platform = Arc::new(MemoryPlatform::granted());
        let dispatcher = dispatcher(platform.clone());
        let call = call_at("1", Utc::now() - Duration::seconds(30));

        assert!(dispatcher.deliver_now(&call, call.scheduled_date).await.is_some());
        let delivered = platform.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].trigger, NotificationTrigger::Immediate);
        assert!(!delivered[0].content.auto_dismiss);
        assert_eq!(delivered[0].content.data.decode().unwrap(), call);
        assert_eq!(
            delivered[0].content.data.occurrence_at,
            Some(call.scheduled_date)
        );
    }

    #[tokio::test]
    async fn cancel_targets_only_the_given_call() {
        let platform = Arc::new(MemoryPlatform::granted());
        let dispatcher = dispatcher(platform.clone());
        let later = Utc::now() + Duration::hours(1);
        dispatcher.schedule(&call_at("1", later)).await.unwrap();
        dispatcher.schedule(&call_at("2", later)).await.unwrap();

        dispatcher.cancel("1").await;
        dispatcher.cancel("1").await;
        let pending = dispatcher.list_pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].content.data.call_id, "2");

        dispatcher.cancel_all().await;
        assert!(dispatcher.list_pending().await.is_empty());
    }
}
