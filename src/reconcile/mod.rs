pub mod background;
pub mod cycle;
pub mod foreground;
pub mod host;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::ScheduledCall;

pub use background::{BackgroundCycle, BackgroundFetchResult, BackgroundTask};
pub use cycle::{FireOutcome, Reconciler};
pub use foreground::ForegroundPoller;
pub use host::{BackgroundFetchStatus, BackgroundTaskHost, BackgroundTaskOptions, DUE_CALLS_TASK};

/// Which path surfaced an occurrence.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FireSource {
    Foreground,
    Background,
    Notification,
}

impl FireSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FireSource::Foreground => "foreground",
            FireSource::Background => "background",
            FireSource::Notification => "notification",
        }
    }
}

/// What the presentation layer receives: enough to render the call screen
/// without touching the store.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresentedCall {
    pub call: ScheduledCall,
    pub occurrence: DateTime<Utc>,
    pub source: FireSource,
}
