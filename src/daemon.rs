//! Long-running mode: the foreground poller, the background task host and
//! the local notification center, all feeding one presentation channel.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    models::DeliveredNotification,
    reconcile::{
        BackgroundCycle, BackgroundFetchStatus, ForegroundPoller, PresentedCall, Reconciler,
        DUE_CALLS_TASK,
    },
    settings::debug_mode,
    AppState,
};

const DELIVERY_TICK: Duration = Duration::from_secs(1);

fn present(presented: &PresentedCall) {
    let call = &presented.call;
    println!(
        "[{}] Incoming call: {} ({}) on {} screen, via {}",
        presented
            .occurrence
            .with_timezone(&chrono::Local)
            .format("%H:%M:%S"),
        call.name,
        call.number,
        call.screen_type,
        presented.source.as_str(),
    );
}

async fn route(
    reconciler: &Reconciler,
    delivered: DeliveredNotification,
    presenter: &mpsc::UnboundedSender<PresentedCall>,
) {
    match reconciler.handle_delivered(delivered, Utc::now()).await {
        Ok(Some(presented)) => {
            if presenter.send(presented).is_err() {
                warn!("Presentation channel closed, dropping call");
            }
        }
        Ok(None) => {}
        Err(err) => error!("Failed to handle delivered notification: {err}"),
    }
}

/// Presents whatever the notification center has already emitted, without
/// waiting for more.
pub async fn drain_deliveries(
    reconciler: &Reconciler,
    mut deliveries: mpsc::UnboundedReceiver<DeliveredNotification>,
) {
    let (presenter, mut presented) = mpsc::unbounded_channel();
    while let Ok(delivered) = deliveries.try_recv() {
        route(reconciler, delivered, &presenter).await;
    }
    drop(presenter);
    while let Some(call) = presented.recv().await {
        present(&call);
    }
}

pub async fn run(
    state: AppState,
    mut deliveries: mpsc::UnboundedReceiver<DeliveredNotification>,
) -> Result<()> {
    let settings = state.settings.snapshot();
    info!("fauxcall daemon starting, data in {}", state.data_dir.display());

    if let Err(err) = state.reconciler.dispatcher().request_permissions().await {
        warn!("Alerts disabled: {err}");
    }

    let (presenter, mut presented) = mpsc::unbounded_channel::<PresentedCall>();

    let poller = ForegroundPoller::new(
        state.reconciler.clone(),
        presenter.clone(),
        settings.poll_interval(),
        settings.foreground_lookback(),
    );
    poller.start().await?;

    let cycle = Arc::new(BackgroundCycle::new(
        state.reconciler.clone(),
        settings.background_lookback(),
        settings.ledger_retention(),
    ));
    let options = settings.background_options(debug_mode());
    if state.background.status() != BackgroundFetchStatus::Available {
        info!("Background fetch is {}", state.background.status());
        if let Err(err) = state.background.unregister(DUE_CALLS_TASK).await {
            warn!("Could not forget background task: {err}");
        }
    } else {
        let restored = match state.background.restore(DUE_CALLS_TASK, cycle.clone()).await {
            Ok(restored) => restored,
            Err(err) => {
                warn!("Could not restore background task: {err}");
                false
            }
        };
        if !restored {
            if let Err(err) = state.background.register(DUE_CALLS_TASK, cycle, options).await {
                warn!("Background fetch unavailable: {err}");
            }
        }
    }

    let shutdown = CancellationToken::new();
    let delivery = state
        .center
        .clone()
        .spawn_delivery_loop(DELIVERY_TICK, shutdown.clone());

    let router = {
        let reconciler = state.reconciler.clone();
        let presenter = presenter.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    delivered = deliveries.recv() => match delivered {
                        Some(delivered) => route(&reconciler, delivered, &presenter).await,
                        None => break,
                    },
                    _ = token.cancelled() => break,
                }
            }
        })
    };
    drop(presenter);

    let presentation = tokio::spawn(async move {
        while let Some(call) = presented.recv().await {
            present(&call);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down");

    poller.stop().await?;
    state.background.shutdown().await;
    shutdown.cancel();
    delivery.await.context("delivery loop failed to join")?;
    router.await.context("notification router failed to join")?;
    // Every sender is gone once the poller and router are stopped.
    drop(poller);
    presentation
        .await
        .context("presentation task failed to join")?;
    Ok(())
}
