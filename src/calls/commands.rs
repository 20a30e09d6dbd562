use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::{EngineError, EngineResult},
    models::{CallInput, PendingNotification, PermissionStatus, ScheduledCall},
    notifications::NotificationPlatform,
    reconcile::{BackgroundTaskOptions, DUE_CALLS_TASK},
    schedule::next_occurrence_after,
    settings::EngineSettings,
    AppState,
};

fn not_found(call_id: &str) -> EngineError {
    EngineError::Validation(format!("no scheduled call with id {call_id}"))
}

/// Saves a new call and arms its alert.
pub async fn create_call(state: &AppState, input: CallInput) -> EngineResult<ScheduledCall> {
    let call = input.into_new_call()?;
    state.store.add(call.clone()).await?;
    state.reconciler.arm(&call, Utc::now()).await;
    Ok(call)
}

pub async fn edit_call(
    state: &AppState,
    call_id: &str,
    input: CallInput,
) -> EngineResult<ScheduledCall> {
    let existing = state
        .store
        .get(call_id)
        .await?
        .ok_or_else(|| not_found(call_id))?;
    let edited = input.apply_to(&existing)?;

    if !state.store.update(edited.clone()).await? {
        return Err(not_found(call_id));
    }
    state.reconciler.arm(&edited, Utc::now()).await;
    Ok(edited)
}

pub async fn set_call_active(
    state: &AppState,
    call_id: &str,
    is_active: bool,
) -> EngineResult<ScheduledCall> {
    let call = state
        .store
        .set_active(call_id, is_active)
        .await?
        .ok_or_else(|| not_found(call_id))?;
    state.reconciler.arm(&call, Utc::now()).await;
    Ok(call)
}

pub async fn toggle_call(state: &AppState, call_id: &str) -> EngineResult<ScheduledCall> {
    let existing = state
        .store
        .get(call_id)
        .await?
        .ok_or_else(|| not_found(call_id))?;
    set_call_active(state, call_id, !existing.is_active).await
}

pub async fn delete_call(state: &AppState, call_id: &str) -> EngineResult<bool> {
    let removed = state.store.remove(call_id).await?;
    state.reconciler.dispatcher().cancel(call_id).await;
    Ok(removed)
}

pub async fn clear_calls(state: &AppState) -> EngineResult<()> {
    state.store.clear().await?;
    state.reconciler.dispatcher().cancel_all().await;
    Ok(())
}

pub async fn list_calls(state: &AppState) -> EngineResult<Vec<ScheduledCall>> {
    state.store.list().await
}

pub async fn list_pending(state: &AppState) -> Vec<PendingNotification> {
    state.reconciler.dispatcher().list_pending().await
}

/// Records a permission decision made outside the app, e.g. a re-grant.
pub async fn set_permission(state: &AppState, permission: PermissionStatus) -> EngineResult<()> {
    state.center.set_permission(permission).await?;
    Ok(())
}

/// Applies `mutate` to the settings file. Takes effect the next time the
/// engine is opened.
pub fn update_settings<F>(state: &AppState, mutate: F) -> EngineResult<EngineSettings>
where
    F: FnOnce(&mut EngineSettings),
{
    Ok(state.settings.update(mutate)?)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub next_occurrence: Option<DateTime<Utc>>,
    pub last_processed: Option<DateTime<Utc>>,
    /// Latest occurrence recorded in the ledger, by any path.
    pub last_fired: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub data_dir: String,
    pub database: String,
    pub permission: PermissionStatus,
    pub pending_alerts: usize,
    pub processed_occurrences: usize,
    pub background_fetch: String,
    pub background_task: Option<BackgroundTaskOptions>,
    pub calls: Vec<CallSummary>,
}

pub async fn engine_status(state: &AppState, now: DateTime<Utc>) -> EngineResult<EngineStatus> {
    let zone = state.reconciler.zone();
    let mut calls = Vec::new();
    for call in state.store.list().await? {
        calls.push(CallSummary {
            next_occurrence: call
                .is_active
                .then(|| next_occurrence_after(&call, now, zone))
                .flatten(),
            last_fired: state.db.last_processed_occurrence(&call.id).await?,
            id: call.id,
            name: call.name,
            is_active: call.is_active,
            last_processed: call.last_processed,
        });
    }

    let background_task = state
        .background
        .persisted_registrations()
        .await?
        .remove(DUE_CALLS_TASK);

    Ok(EngineStatus {
        data_dir: state.data_dir.display().to_string(),
        database: state.db.path().display().to_string(),
        permission: state.center.permission_status().await?,
        pending_alerts: list_pending(state).await.len(),
        processed_occurrences: state.db.list_processed_occurrences().await?.len(),
        background_fetch: state.background.status().to_string(),
        background_task,
        calls,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Duration;

    use super::*;
    use crate::models::{NotificationTrigger, RepeatDay, ScreenType};

    fn input(at: DateTime<Utc>) -> CallInput {
        CallInput {
            name: "Mom".into(),
            number: "555-0100".into(),
            location: String::new(),
            image: String::new(),
            scheduled_date: at,
            screen_type: ScreenType::Iphone,
            repeat_days: BTreeSet::new(),
        }
    }

    fn open() -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let (state, _deliveries) = AppState::open(dir.path()).unwrap();
        (dir, state)
    }

    #[tokio::test]
    async fn create_arms_an_alert_and_delete_cancels_it() {
        let (_dir, state) = open();
        let at = Utc::now() + Duration::minutes(30);

        let call = create_call(&state, input(at)).await.unwrap();
        assert!(call.is_active);
        let pending = list_pending(&state).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].trigger, NotificationTrigger::At(at));

        assert!(delete_call(&state, &call.id).await.unwrap());
        assert!(list_pending(&state).await.is_empty());
        assert!(!delete_call(&state, &call.id).await.unwrap());
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_saving() {
        let (_dir, state) = open();
        let mut blank = input(Utc::now() + Duration::minutes(5));
        blank.number = "  ".into();

        assert!(matches!(
            create_call(&state, blank).await,
            Err(EngineError::Validation(_))
        ));
        assert!(list_calls(&state).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn edit_keeps_identity_and_moves_the_alert() {
        let (_dir, state) = open();
        let call = create_call(&state, input(Utc::now() + Duration::minutes(5)))
            .await
            .unwrap();
        set_call_active(&state, &call.id, false).await.unwrap();

        let later = Utc::now() + Duration::hours(2);
        let mut changed = input(later);
        changed.name = "Boss".into();
        let edited = edit_call(&state, &call.id, changed).await.unwrap();

        assert_eq!(edited.id, call.id);
        assert!(!edited.is_active);
        assert_eq!(edited.name, "Boss");
        // Still inactive, so nothing is armed.
        assert!(list_pending(&state).await.is_empty());

        let reactivated = toggle_call(&state, &call.id).await.unwrap();
        assert!(reactivated.is_active);
        let pending = list_pending(&state).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].trigger, NotificationTrigger::At(later));
    }

    #[tokio::test]
    async fn unknown_ids_are_validation_errors() {
        let (_dir, state) = open();
        let at = Utc::now() + Duration::minutes(5);
        assert!(matches!(
            edit_call(&state, "ghost", input(at)).await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            toggle_call(&state, "ghost").await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn past_repeating_call_arms_its_next_occurrence() {
        let (_dir, state) = open();
        let anchor = Utc::now() - Duration::days(3);
        let mut repeating = input(anchor);
        repeating.repeat_days = [
            RepeatDay::Monday,
            RepeatDay::Tuesday,
            RepeatDay::Wednesday,
            RepeatDay::Thursday,
            RepeatDay::Friday,
            RepeatDay::Saturday,
            RepeatDay::Sunday,
        ]
        .into_iter()
        .collect();

        create_call(&state, repeating).await.unwrap();
        let pending = list_pending(&state).await;
        assert_eq!(pending.len(), 1);
        let NotificationTrigger::At(at) = pending[0].trigger else {
            panic!("expected a timed alert");
        };
        assert!(at > Utc::now());
        assert!(at <= Utc::now() + Duration::days(1));
    }

    #[tokio::test]
    async fn clear_drops_calls_and_alerts() {
        let (_dir, state) = open();
        for minutes in [5, 10] {
            create_call(&state, input(Utc::now() + Duration::minutes(minutes)))
                .await
                .unwrap();
        }

        clear_calls(&state).await.unwrap();
        assert!(list_calls(&state).await.unwrap().is_empty());
        assert!(list_pending(&state).await.is_empty());
    }

    #[tokio::test]
    async fn status_reports_next_occurrences() {
        let (_dir, state) = open();
        let at = Utc::now() + Duration::minutes(15);
        let call = create_call(&state, input(at)).await.unwrap();

        let status = engine_status(&state, Utc::now()).await.unwrap();
        assert_eq!(status.permission, PermissionStatus::Granted);
        assert_eq!(status.pending_alerts, 1);
        assert_eq!(status.calls.len(), 1);
        assert_eq!(status.calls[0].id, call.id);
        assert_eq!(status.calls[0].next_occurrence, Some(at));
        assert_eq!(status.calls[0].last_fired, None);
        assert!(status.background_task.is_none());
        assert_eq!(status.background_fetch, "available");
        assert!(status.database.ends_with(crate::DB_FILE));

        state
            .db
            .claim_occurrence(&call.id, at, "foreground", at)
            .await
            .unwrap();
        let status = engine_status(&state, Utc::now()).await.unwrap();
        assert_eq!(status.calls[0].last_fired, Some(at));
        assert_eq!(status.processed_occurrences, 1);
    }

    #[tokio::test]
    async fn disabling_background_fetch_applies_on_reopen() {
        let (dir, state) = open();
        let updated = update_settings(&state, |settings| {
            settings.background.enabled = false;
            settings.ledger_retention_days = 30;
        })
        .unwrap();
        assert!(!updated.background.enabled);
        assert_eq!(
            engine_status(&state, Utc::now()).await.unwrap().background_fetch,
            "available"
        );
        drop(state);

        let (reopened, _deliveries) = AppState::open(dir.path()).unwrap();
        let status = engine_status(&reopened, Utc::now()).await.unwrap();
        assert_eq!(status.background_fetch, "denied");
        assert_eq!(reopened.settings.snapshot().ledger_retention_days, 30);
    }
}
