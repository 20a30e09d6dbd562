//! Periodic host for background tasks.
//!
//! Each registered task runs on its own tokio task at no less than its
//! minimum interval, bounded by a time budget. Failed invocations back off.
//! Registrations that ask to persist are written to the `backgroundTasks`
//! key so the next daemon start can restore them.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{Database, ItemWrite},
    error::{EngineError, EngineResult},
};

use super::{BackgroundFetchResult, BackgroundTask};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub const DUE_CALLS_TASK: &str = "background-fetch";
pub const BACKGROUND_TASKS_KEY: &str = "backgroundTasks";

/// Interval multiplier ceiling after consecutive failures.
const MAX_BACKOFF_FACTOR: u32 = 4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundTaskOptions {
    pub minimum_interval: Duration,
    pub persist_across_restart: bool,
    pub run_on_boot: bool,
    pub time_budget: Duration,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum BackgroundFetchStatus {
    Available,
    /// Background runs are switched off for this host.
    Denied,
}

impl fmt::Display for BackgroundFetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BackgroundFetchStatus::Available => "available",
            BackgroundFetchStatus::Denied => "denied",
        };
        f.write_str(label)
    }
}

struct RegisteredTask {
    options: BackgroundTaskOptions,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

type Registrations = BTreeMap<String, BackgroundTaskOptions>;

fn decode_registrations(raw: Option<&str>) -> anyhow::Result<Registrations> {
    match raw {
        None => Ok(Registrations::new()),
        Some(json) => serde_json::from_str(json).context("failed to decode background tasks"),
    }
}

pub(crate) fn next_backoff(current: u32, result: BackgroundFetchResult) -> u32 {
    match result {
        BackgroundFetchResult::Failed => current.saturating_mul(2).min(MAX_BACKOFF_FACTOR),
        BackgroundFetchResult::NewData | BackgroundFetchResult::NoData => 1,
    }
}

pub struct BackgroundTaskHost {
    db: Database,
    status: BackgroundFetchStatus,
    tasks: Mutex<HashMap<String, RegisteredTask>>,
}

impl BackgroundTaskHost {
    pub fn new(db: Database, status: BackgroundFetchStatus) -> Self {
        Self {
            db,
            status,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn status(&self) -> BackgroundFetchStatus {
        self.status
    }

    /// Starts `task` under `task_id`, replacing any existing registration.
    pub async fn register(
        &self,
        task_id: &str,
        task: Arc<dyn BackgroundTask>,
        options: BackgroundTaskOptions,
    ) -> EngineResult<()> {
        if self.status != BackgroundFetchStatus::Available {
            return Err(EngineError::BackgroundTaskFailure(format!(
                "background fetch is {}",
                self.status
            )));
        }

        self.stop_task(task_id).await;

        let persisted = options.persist_across_restart;
        self.write_registration(task_id, persisted.then_some(options))
            .await?;

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(task_loop(
            task_id.to_string(),
            task,
            options,
            cancel_token.clone(),
        ));
        self.tasks.lock().await.insert(
            task_id.to_string(),
            RegisteredTask {
                options,
                cancel_token,
                handle,
            },
        );

        log_info!(
            "Registered background task {task_id} every {}s",
            options.minimum_interval.as_secs()
        );
        Ok(())
    }

    /// Re-registers `task` with the options saved by an earlier process.
    /// Returns `false` when nothing was persisted for `task_id`.
    pub async fn restore(&self, task_id: &str, task: Arc<dyn BackgroundTask>) -> EngineResult<bool> {
        let Some(options) = self.persisted_registrations().await?.remove(task_id) else {
            return Ok(false);
        };
        self.register(task_id, task, options).await?;
        Ok(true)
    }

    /// Stops the task and forgets its persisted registration. When this
    /// returns, the task will not be invoked again.
    pub async fn unregister(&self, task_id: &str) -> EngineResult<bool> {
        self.write_registration(task_id, None).await?;
        let stopped = self.stop_task(task_id).await;
        if stopped {
            log_info!("Unregistered background task {task_id}");
        }
        Ok(stopped)
    }

    pub async fn is_registered(&self, task_id: &str) -> bool {
        self.tasks.lock().await.contains_key(task_id)
    }

    pub async fn registered_options(&self, task_id: &str) -> Option<BackgroundTaskOptions> {
        self.tasks
            .lock()
            .await
            .get(task_id)
            .map(|registered| registered.options)
    }

    pub async fn persisted_registrations(&self) -> EngineResult<Registrations> {
        let raw = self.db.get_item(BACKGROUND_TASKS_KEY).await?;
        Ok(decode_registrations(raw.as_deref())?)
    }

    /// Stops every running task. Persisted registrations are kept for the
    /// next start.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, RegisteredTask)> = self.tasks.lock().await.drain().collect();
        for (task_id, registered) in drained {
            join_task(&task_id, registered).await;
        }
    }

    async fn stop_task(&self, task_id: &str) -> bool {
        let removed = self.tasks.lock().await.remove(task_id);
        match removed {
            Some(registered) => {
                join_task(task_id, registered).await;
                true
            }
            None => false,
        }
    }

    async fn write_registration(
        &self,
        task_id: &str,
        options: Option<BackgroundTaskOptions>,
    ) -> EngineResult<()> {
        let task_id = task_id.to_string();
        self.db
            .modify_item(BACKGROUND_TASKS_KEY, move |raw| {
                let mut registrations = decode_registrations(raw.as_deref())?;
                let changed = match options {
                    Some(options) => registrations.insert(task_id, options) != Some(options),
                    None => registrations.remove(&task_id).is_some(),
                };
                if !changed {
                    return Ok((ItemWrite::Keep, ()));
                }
                if registrations.is_empty() {
                    return Ok((ItemWrite::Remove, ()));
                }
                let json = serde_json::to_string(&registrations)
                    .context("failed to encode background tasks")?;
                Ok((ItemWrite::Set(json), ()))
            })
            .await?;
        Ok(())
    }
}

async fn join_task(task_id: &str, registered: RegisteredTask) {
    registered.cancel_token.cancel();
    if let Err(err) = registered.handle.await {
        log_error!("Background task {task_id} failed to join: {err}");
    }
}

async fn task_loop(
    task_id: String,
    task: Arc<dyn BackgroundTask>,
    options: BackgroundTaskOptions,
    cancel_token: CancellationToken,
) {
    let mut backoff: u32 = 1;
    let mut delay = if options.run_on_boot {
        Duration::ZERO
    } else {
        options.minimum_interval
    };

    loop {
        tokio::select! {
            _ = time::sleep(delay) => {}
            _ = cancel_token.cancelled() => break,
        }

        let result = tokio::select! {
            outcome = time::timeout(options.time_budget, task.run(Utc::now())) => {
                outcome.unwrap_or_else(|_| {
                    log_warn!(
                        "Background task {task_id} exceeded its {}s budget",
                        options.time_budget.as_secs()
                    );
                    BackgroundFetchResult::Failed
                })
            }
            _ = cancel_token.cancelled() => break,
        };

        backoff = next_backoff(backoff, result);
        delay = options.minimum_interval * backoff;
        if backoff > 1 {
            log_warn!("Background task {task_id} failed, next run in {}s", delay.as_secs());
        }
    }

    log_info!("Background task {task_id} stopped");
}
