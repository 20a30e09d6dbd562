use std::{sync::Arc, time::Duration};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{error::EngineResult, models::ScheduledCall};

use super::{
    cycle::{log_missed, FireOutcome},
    FireSource, PresentedCall, Reconciler,
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

struct Ticker {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Polls the in-memory copy of the call list while the app is open and hands
/// due calls to the presentation layer.
#[derive(Clone)]
pub struct ForegroundPoller {
    reconciler: Reconciler,
    cache: Arc<RwLock<Vec<ScheduledCall>>>,
    presenter: mpsc::UnboundedSender<PresentedCall>,
    ticker: Arc<Mutex<Option<Ticker>>>,
    poll_interval: Duration,
    lookback: chrono::Duration,
}

impl ForegroundPoller {
    pub fn new(
        reconciler: Reconciler,
        presenter: mpsc::UnboundedSender<PresentedCall>,
        poll_interval: Duration,
        lookback: chrono::Duration,
    ) -> Self {
        Self {
            reconciler,
            cache: Arc::new(RwLock::new(Vec::new())),
            presenter,
            ticker: Arc::new(Mutex::new(None)),
            poll_interval,
            lookback,
        }
    }

    /// Reloads the cache from the store.
    pub async fn resync(&self) -> EngineResult<usize> {
        let calls = self.reconciler.store().list().await?;
        let count = calls.len();
        *self.cache.write().await = calls;
        Ok(count)
    }

    pub async fn cached(&self) -> Vec<ScheduledCall> {
        self.cache.read().await.clone()
    }

    /// One poll cycle against the cache. Surfaces at most one call.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> EngineResult<Option<PresentedCall>> {
        let snapshot = self.cached().await;
        let Some(due) = self
            .reconciler
            .claim_next(&snapshot, now, self.lookback, FireSource::Foreground)
            .await?
        else {
            return Ok(None);
        };

        log_info!("Call {} is due, presenting it", due.call.id);
        let presented = PresentedCall {
            call: due.call.clone(),
            occurrence: due.occurrence,
            source: FireSource::Foreground,
        };

        let outcome = if self.presenter.send(presented.clone()).is_ok() {
            FireOutcome::Fired
        } else {
            log_missed(&due, FireSource::Foreground);
            FireOutcome::Missed
        };
        self.reconciler.complete(&due, outcome).await?;
        self.resync().await?;

        Ok((outcome == FireOutcome::Fired).then_some(presented))
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        let mut ticker_guard = self.ticker.lock().await;
        if ticker_guard.is_some() {
            anyhow::bail!("foreground poller already running");
        }

        self.resync()
            .await
            .context("failed to load scheduled calls")?;

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let poller = self.clone();
        let mut revisions = self.reconciler.store().subscribe();
        let poll_interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            // First tick completes immediately, so due calls are checked on start.
            let mut interval = time::interval(poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = poller.poll_once(Utc::now()).await {
                            log_error!("Foreground poll failed: {err}");
                        }
                    }
                    changed = revisions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if let Err(err) = poller.resync().await {
                            log_error!("Failed to refresh scheduled calls: {err}");
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
            log_info!("Foreground poller stopped");
        });

        *ticker_guard = Some(Ticker {
            handle,
            cancel_token,
        });
        log_info!("Foreground poller started ({}s interval)", poll_interval.as_secs());
        Ok(())
    }

    /// Stops the poller and waits for an in-flight cycle to finish.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let Some(ticker) = self.ticker.lock().await.take() else {
            return Ok(());
        };
        ticker.cancel_token.cancel();
        ticker
            .handle
            .await
            .context("foreground poller task failed to join")
    }

    pub async fn is_running(&self) -> bool {
        self.ticker.lock().await.is_some()
    }
}
