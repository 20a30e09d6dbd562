//! Shared fixtures: a throwaway database, call builders and an in-memory
//! notification platform.

use std::{
    collections::BTreeMap,
    sync::Mutex,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use crate::{
    db::Database,
    models::{
        DeliveredNotification, NotificationRequest, NotificationTrigger, PendingNotification,
        PermissionStatus, ScheduledCall, ScreenType,
    },
    notifications::NotificationPlatform,
};

pub fn temp_database() -> (TempDir, Database) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Database::new(dir.path().join("fauxcall.sqlite3")).expect("database");
    (dir, db)
}

pub fn call_at(id: &str, scheduled_date: DateTime<Utc>) -> ScheduledCall {
    ScheduledCall {
        id: id.to_string(),
        name: format!("Caller {id}"),
        number: "555-0100".into(),
        location: String::new(),
        image: String::new(),
        scheduled_date,
        screen_type: ScreenType::Samsung,
        repeat_days: Default::default(),
        is_active: true,
        last_processed: None,
    }
}

#[derive(Default)]
struct MemoryState {
    permission: PermissionStatus,
    answer: PermissionStatus,
    permission_requests: usize,
    schedule_requests: usize,
    fail_schedules: bool,
    next_id: u64,
    pending: BTreeMap<String, PendingNotification>,
    delivered: Vec<DeliveredNotification>,
}

pub struct MemoryPlatform {
    state: Mutex<MemoryState>,
}

impl MemoryPlatform {
    pub fn granted() -> Self {
        Self::with(PermissionStatus::Granted, PermissionStatus::Granted)
    }

    /// Undetermined until asked, then declines.
    pub fn declining() -> Self {
        Self::with(PermissionStatus::Undetermined, PermissionStatus::Denied)
    }

    fn with(permission: PermissionStatus, answer: PermissionStatus) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                permission,
                answer,
                ..Default::default()
            }),
        }
    }

    pub fn set_permission(&self, permission: PermissionStatus) {
        self.state.lock().unwrap().permission = permission;
    }

    pub fn fail_schedules(&self, fail: bool) {
        self.state.lock().unwrap().fail_schedules = fail;
    }

    pub fn permission_requests(&self) -> usize {
        self.state.lock().unwrap().permission_requests
    }

    pub fn schedule_requests(&self) -> usize {
        self.state.lock().unwrap().schedule_requests
    }

    pub fn delivered(&self) -> Vec<DeliveredNotification> {
        self.state.lock().unwrap().delivered.clone()
    }
}

#[async_trait]
impl NotificationPlatform for MemoryPlatform {
    async fn permission_status(&self) -> Result<PermissionStatus> {
        Ok(self.state.lock().unwrap().permission)
    }

    async fn request_permission(&self) -> Result<PermissionStatus> {
        let mut state = self.state.lock().unwrap();
        state.permission_requests += 1;
        if state.permission == PermissionStatus::Undetermined {
            state.permission = state.answer;
        }
        Ok(state.permission)
    }

    async fn schedule(&self, request: NotificationRequest) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.schedule_requests += 1;
        if state.fail_schedules {
            bail!("platform rejected the request");
        }

        state.next_id += 1;
        let identifier = format!("memory-{}", state.next_id);
        match request.trigger {
            NotificationTrigger::Immediate => state.delivered.push(DeliveredNotification {
                identifier: identifier.clone(),
                content: request.content,
                trigger: request.trigger,
                delivered_at: Utc::now(),
            }),
            NotificationTrigger::At(_) => {
                state.pending.insert(
                    identifier.clone(),
                    PendingNotification {
                        identifier: identifier.clone(),
                        content: request.content,
                        trigger: request.trigger,
                    },
                );
            }
        }
        Ok(identifier)
    }

    async fn pending(&self) -> Result<Vec<PendingNotification>> {
        Ok(self.state.lock().unwrap().pending.values().cloned().collect())
    }

    async fn cancel(&self, identifier: &str) -> Result<()> {
        self.state.lock().unwrap().pending.remove(identifier);
        Ok(())
    }

    async fn cancel_all(&self) -> Result<()> {
        self.state.lock().unwrap().pending.clear();
        Ok(())
    }
}
