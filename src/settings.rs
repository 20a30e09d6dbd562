use anyhow::{Context, Result};
use chrono::FixedOffset;
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::{
    models::NotificationBehavior, notifications::PermissionPolicy,
    reconcile::BackgroundTaskOptions,
};

pub const SETTINGS_FILE: &str = "settings.json";

/// Platform floor for background fetch intervals.
const MIN_BACKGROUND_INTERVAL_SECS: u64 = 15 * 60;

/// Ceilings applied when settings become durations.
const MAX_LOOKBACK_SECS: u64 = 7 * 24 * 60 * 60;
const MAX_LEDGER_RETENTION_DAYS: u32 = 10 * 365;

fn lookback(secs: u64) -> chrono::Duration {
    let clamped = secs.min(MAX_LOOKBACK_SECS);
    if clamped != secs {
        warn!("Lookback of {secs}s exceeds the {MAX_LOOKBACK_SECS}s ceiling");
    }
    chrono::Duration::seconds(i64::try_from(clamped).unwrap_or(i64::MAX))
}

pub fn debug_mode() -> bool {
    std::env::var("FAUXCALL_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForegroundSettings {
    pub poll_interval_secs: u64,
    pub lookback_secs: u64,
}

impl Default for ForegroundSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            lookback_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackgroundSettings {
    pub enabled: bool,
    pub minimum_interval_secs: u64,
    pub lookback_secs: u64,
    pub persist_across_restart: bool,
    pub run_on_boot: bool,
    pub time_budget_secs: u64,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            minimum_interval_secs: MIN_BACKGROUND_INTERVAL_SECS,
            lookback_secs: 300,
            persist_across_restart: true,
            run_on_boot: true,
            time_budget_secs: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    pub foreground: ForegroundSettings,
    pub background: BackgroundSettings,
    pub notification_behavior: NotificationBehavior,
    pub permission_policy: PermissionPolicy,
    pub recurrence_utc_offset_minutes: i32,
    pub ledger_retention_days: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            foreground: ForegroundSettings::default(),
            background: BackgroundSettings::default(),
            notification_behavior: NotificationBehavior::default(),
            permission_policy: PermissionPolicy::default(),
            recurrence_utc_offset_minutes: 0,
            ledger_retention_days: 14,
        }
    }
}

impl EngineSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.foreground.poll_interval_secs.max(1))
    }

    pub fn foreground_lookback(&self) -> chrono::Duration {
        lookback(self.foreground.lookback_secs)
    }

    pub fn background_lookback(&self) -> chrono::Duration {
        lookback(self.background.lookback_secs)
    }

    pub fn ledger_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(
            self.ledger_retention_days.min(MAX_LEDGER_RETENTION_DAYS),
        ))
    }

    /// Zone that weekly repeat days and alert bodies are evaluated in. Falls
    /// back to UTC when the offset is out of range.
    pub fn recurrence_zone(&self) -> FixedOffset {
        let seconds = self.recurrence_utc_offset_minutes.saturating_mul(60);
        FixedOffset::east_opt(seconds).unwrap_or_else(|| {
            warn!(
                "Ignoring out-of-range recurrence offset {} minutes",
                self.recurrence_utc_offset_minutes
            );
            crate::schedule::utc_zone()
        })
    }

    /// Registration options for the background task. Debug mode runs it as
    /// often as the foreground poller; otherwise the interval never drops
    /// below the platform floor.
    pub fn background_options(&self, debug: bool) -> BackgroundTaskOptions {
        let interval_secs = if debug {
            self.foreground.poll_interval_secs.max(1)
        } else {
            self.background
                .minimum_interval_secs
                .max(MIN_BACKGROUND_INTERVAL_SECS)
        };

        BackgroundTaskOptions {
            minimum_interval: Duration::from_secs(interval_secs),
            persist_across_restart: self.background.persist_across_restart,
            run_on_boot: self.background.run_on_boot,
            time_budget: Duration::from_secs(self.background.time_budget_secs.max(1)),
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<EngineSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Malformed {}, using defaults: {err}", path.display());
                EngineSettings::default()
            })
        } else {
            EngineSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn snapshot(&self) -> EngineSettings {
        self.read().clone()
    }

    pub fn update<F>(&self, mutate: F) -> Result<EngineSettings>
    where
        F: FnOnce(&mut EngineSettings),
    {
        let mut guard = self.write();
        let mut next = guard.clone();
        mutate(&mut next);
        self.persist(&next)?;
        *guard = next.clone();
        Ok(next)
    }

    fn persist(&self, data: &EngineSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, EngineSettings> {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, EngineSettings> {
        self.data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
