//! The background fetch cycle: runs without the in-memory cache, straight
//! against persisted state.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{EngineError, EngineResult};

use super::{
    cycle::{log_missed, FireOutcome},
    FireSource, Reconciler,
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum BackgroundFetchResult {
    NewData,
    NoData,
    Failed,
}

/// Work the background task host invokes on its schedule. Implementations
/// report failures through the result rather than an error.
#[async_trait]
pub trait BackgroundTask: Send + Sync {
    async fn run(&self, now: DateTime<Utc>) -> BackgroundFetchResult;
}

pub struct BackgroundCycle {
    reconciler: Reconciler,
    lookback: Duration,
    ledger_retention: Duration,
}

impl BackgroundCycle {
    pub fn new(reconciler: Reconciler, lookback: Duration, ledger_retention: Duration) -> Self {
        Self {
            reconciler,
            lookback,
            ledger_retention,
        }
    }

    pub async fn run_cycle(&self, now: DateTime<Utc>) -> EngineResult<BackgroundFetchResult> {
        log_info!("Background fetch task running...");
        let calls = self.reconciler.store().list().await?;

        match self
            .reconciler
            .store()
            .database()
            .prune_processed_occurrences(now - self.ledger_retention)
            .await
        {
            Ok(0) => {}
            Ok(pruned) => log_info!("Pruned {pruned} processed occurrence(s)"),
            Err(err) => log_warn!("Failed to prune processed occurrences: {err:?}"),
        }

        let Some(due) = self
            .reconciler
            .claim_next(&calls, now, self.lookback, FireSource::Background)
            .await?
        else {
            return Ok(BackgroundFetchResult::NoData);
        };

        log_info!("Found due call: {}", due.call.name);
        let outcome = match self
            .reconciler
            .dispatcher()
            .deliver_now(&due.call, due.occurrence)
            .await
        {
            Some(_) => FireOutcome::Fired,
            None => {
                log_missed(&due, FireSource::Background);
                FireOutcome::Missed
            }
        };
        self.reconciler.complete(&due, outcome).await?;

        Ok(match outcome {
            FireOutcome::Fired => BackgroundFetchResult::NewData,
            FireOutcome::Missed => BackgroundFetchResult::NoData,
        })
    }
}

#[async_trait]
impl BackgroundTask for BackgroundCycle {
    async fn run(&self, now: DateTime<Utc>) -> BackgroundFetchResult {
        match self.run_cycle(now).await {
            Ok(result) => result,
            Err(err) => {
                let failure = EngineError::BackgroundTaskFailure(err.to_string());
                log_error!("{failure}");
                BackgroundFetchResult::Failed
            }
        }
    }
}
