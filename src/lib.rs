pub mod calls;
pub mod cli;
mod daemon;
pub mod db;
pub mod error;
pub mod models;
pub mod notifications;
pub mod reconcile;
pub mod schedule;
pub mod settings;
pub mod store;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;

use cli::{Cli, Commands};
use db::Database;
use models::DeliveredNotification;
use notifications::{LocalNotificationCenter, NotificationDispatcher};
use reconcile::{BackgroundFetchStatus, BackgroundTaskHost, Reconciler};
use settings::{SettingsStore, SETTINGS_FILE};
use store::CallStore;

pub const DB_FILE: &str = "fauxcall.sqlite3";

pub struct AppState {
    pub data_dir: PathBuf,
    pub db: Database,
    pub store: CallStore,
    pub center: Arc<LocalNotificationCenter>,
    pub reconciler: Reconciler,
    pub background: BackgroundTaskHost,
    pub settings: SettingsStore,
}

impl AppState {
    /// Opens (or creates) everything under `data_dir`. The receiver yields
    /// alerts as the local notification center delivers them.
    pub fn open(
        data_dir: &Path,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<DeliveredNotification>)> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;
        let snapshot = settings.snapshot();
        let zone = snapshot.recurrence_zone();

        let db = Database::new(data_dir.join(DB_FILE))?;
        let store = CallStore::new(db.clone());
        let (center, deliveries) =
            LocalNotificationCenter::new(db.clone(), snapshot.permission_policy);
        let center = Arc::new(center);
        let dispatcher = Arc::new(NotificationDispatcher::new(
            center.clone(),
            snapshot.notification_behavior,
            zone,
        ));

        let fetch_status = if snapshot.background.enabled {
            BackgroundFetchStatus::Available
        } else {
            BackgroundFetchStatus::Denied
        };

        let state = Self {
            data_dir: data_dir.to_path_buf(),
            reconciler: Reconciler::new(store.clone(), dispatcher, zone)
                .with_delivery_window(snapshot.background_lookback()),
            background: BackgroundTaskHost::new(db.clone(), fetch_status),
            db,
            store,
            center,
            settings,
        };
        Ok((state, deliveries))
    }
}

/// `$FAUXCALL_DATA_DIR`, else `<platform data dir>/fauxcall`.
pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("FAUXCALL_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fauxcall")
}

pub fn run() {
    let cli = Cli::parse();

    // The daemon narrates at info; one-shot commands keep stderr quiet.
    let level = match cli.command {
        Commands::Run => log::LevelFilter::Info,
        _ => log::LevelFilter::Warn,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);

    let result = tokio::runtime::Runtime::new()
        .context("failed to start tokio runtime")
        .and_then(|runtime| runtime.block_on(cli::execute(cli, data_dir)));

    if let Err(err) = result {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
