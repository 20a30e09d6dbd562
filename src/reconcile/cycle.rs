//! The claim, fire and complete sequence shared by every driver.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use log::{debug, info, warn};

use crate::{
    error::{EngineError, EngineResult},
    models::{DeliveredNotification, NotificationTrigger, ScheduledCall},
    notifications::NotificationDispatcher,
    schedule::{due_calls_in, latest_occurrence, next_occurrence_after, DueCall},
    store::CallStore,
};

use super::{FireSource, PresentedCall};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Fired,
    /// The occurrence was claimed but could not be surfaced. It is not retried.
    Missed,
}

/// How late a scheduled alert may arrive and still be presented.
pub const DEFAULT_DELIVERY_WINDOW_SECS: i64 = 300;

#[derive(Clone)]
pub struct Reconciler {
    store: CallStore,
    dispatcher: Arc<NotificationDispatcher>,
    zone: FixedOffset,
    delivery_window: Duration,
}

impl Reconciler {
    pub fn new(store: CallStore, dispatcher: Arc<NotificationDispatcher>, zone: FixedOffset) -> Self {
        Self {
            store,
            dispatcher,
            zone,
            delivery_window: Duration::seconds(DEFAULT_DELIVERY_WINDOW_SECS),
        }
    }

    /// Alerts delivered more than `window` after their trigger are recorded
    /// as missed instead of presented.
    pub fn with_delivery_window(mut self, window: Duration) -> Self {
        self.delivery_window = window;
        self
    }

    pub fn store(&self) -> &CallStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    pub fn zone(&self) -> FixedOffset {
        self.zone
    }

    /// Walks the due calls in order and claims the first occurrence no other
    /// driver has handled. At most one occurrence is claimed per call.
    ///
    /// `records` may be a stale cache. Each candidate is checked against the
    /// persisted collection before it is claimed, so a record another process
    /// deactivated, edited or deleted is never fired.
    pub async fn claim_next(
        &self,
        records: &[ScheduledCall],
        now: DateTime<Utc>,
        lookback: Duration,
        source: FireSource,
    ) -> EngineResult<Option<DueCall>> {
        let candidates = due_calls_in(records, now, lookback, self.zone);
        if candidates.is_empty() {
            return Ok(None);
        }
        let persisted = self.store.list().await?;

        for candidate in candidates {
            let current = persisted.iter().find(|call| call.id == candidate.call.id);
            let Some(call) = current.filter(|call| {
                call.is_active
                    && latest_occurrence(call, now, self.zone) == Some(candidate.occurrence)
            }) else {
                debug!(
                    "Skipping call {}: changed or removed since it was read",
                    candidate.call.id
                );
                continue;
            };
            let due = DueCall {
                call: call.clone(),
                occurrence: candidate.occurrence,
            };

            let claimed = self
                .store
                .database()
                .claim_occurrence(&due.call.id, due.occurrence, source.as_str(), now)
                .await?;
            if claimed {
                return Ok(Some(due));
            }
            debug!(
                "Occurrence {} of call {} already handled",
                due.occurrence, due.call.id
            );
        }
        Ok(None)
    }

    /// Applies the completion policy: a fired one-shot call is deleted, a
    /// repeating call (or a missed occurrence) is stamped with
    /// `lastProcessed`, and repeating calls get their next alert armed.
    pub async fn complete(&self, due: &DueCall, outcome: FireOutcome) -> EngineResult<()> {
        let call = &due.call;

        if outcome == FireOutcome::Fired && !call.is_repeating() {
            self.store.remove(&call.id).await?;
            self.dispatcher.cancel(&call.id).await;
            info!("Call {} fired and removed", call.id);
            return Ok(());
        }

        match self.store.mark_processed(&call.id, due.occurrence).await? {
            Some(updated) if updated.is_repeating() => {
                self.arm(&updated, due.occurrence.max(Utc::now())).await;
            }
            Some(_) => {}
            None => debug!("Call {} was deleted before completion", call.id),
        }
        Ok(())
    }

    /// Schedules (or cancels) the platform alert for the record's next
    /// occurrence after `after`.
    pub async fn arm(&self, call: &ScheduledCall, after: DateTime<Utc>) -> Option<String> {
        if !call.is_active {
            self.dispatcher.cancel(&call.id).await;
            return None;
        }

        match next_occurrence_after(call, after, self.zone) {
            Some(next) => self.dispatcher.schedule_occurrence(call, next).await,
            None => {
                self.dispatcher.cancel(&call.id).await;
                None
            }
        }
    }

    /// Routes an alert delivered by the platform. Alerts that were armed for
    /// a future trigger go through the ledger, so an occurrence a driver
    /// already surfaced is not shown twice.
    pub async fn handle_delivered(
        &self,
        notification: DeliveredNotification,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<PresentedCall>> {
        let payload = &notification.content.data;
        if !payload.is_scheduled_call() {
            return Ok(None);
        }
        let call = payload.decode().map_err(|err| {
            EngineError::DispatchFailure(format!("undecodable call payload: {err}"))
        })?;

        let occurrence = match notification.trigger {
            // Immediate alerts come from a driver that already claimed the occurrence.
            NotificationTrigger::Immediate => payload.occurrence_at.unwrap_or(call.scheduled_date),
            NotificationTrigger::At(at) => {
                let claimed = self
                    .store
                    .database()
                    .claim_occurrence(&call.id, at, FireSource::Notification.as_str(), now)
                    .await?;
                if !claimed {
                    debug!("Dropping alert for call {}: occurrence already handled", call.id);
                    return Ok(None);
                }
                let due = DueCall {
                    call: call.clone(),
                    occurrence: at,
                };
                if now - at > self.delivery_window {
                    log_missed(&due, FireSource::Notification);
                    self.complete(&due, FireOutcome::Missed).await?;
                    return Ok(None);
                }
                self.complete(&due, FireOutcome::Fired).await?;
                at
            }
        };

        if notification.content.silent {
            info!("Silent alert for call {} delivered", call.id);
            return Ok(None);
        }

        Ok(Some(PresentedCall {
            call,
            occurrence,
            source: FireSource::Notification,
        }))
    }
}

pub(crate) fn log_missed(due: &DueCall, source: FireSource) {
    warn!(
        "Occurrence {} of call {} missed on the {} path",
        due.occurrence,
        due.call.id,
        source.as_str()
    );
}
