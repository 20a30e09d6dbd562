//! Notification data models shared by the dispatcher and the platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ScheduledCall;

pub const SCHEDULED_CALL_KIND: &str = "scheduled_call";

/// Payload attached to every scheduled-call alert. `call_data` carries the
/// whole record so presentation never has to re-read the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallNotificationPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub call_id: String,
    pub call_data: String,
    /// Occurrence the alert stands for. Absent on payloads built without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence_at: Option<DateTime<Utc>>,
}

impl CallNotificationPayload {
    pub fn for_call(call: &ScheduledCall) -> serde_json::Result<Self> {
        Ok(Self {
            kind: SCHEDULED_CALL_KIND.to_string(),
            call_id: call.id.clone(),
            call_data: serde_json::to_string(call)?,
            occurrence_at: None,
        })
    }

    pub fn for_occurrence(
        call: &ScheduledCall,
        occurrence: DateTime<Utc>,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            occurrence_at: Some(occurrence),
            ..Self::for_call(call)?
        })
    }

    pub fn is_scheduled_call(&self) -> bool {
        self.kind == SCHEDULED_CALL_KIND
    }

    /// Reconstructs the record carried by the alert.
    pub fn decode(&self) -> serde_json::Result<ScheduledCall> {
        serde_json::from_str(&self.call_data)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Default,
    #[default]
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
    pub data: CallNotificationPayload,
    pub sound: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<u32>,
    #[serde(default)]
    pub priority: NotificationPriority,
    /// Delivered without any visible alert.
    #[serde(default)]
    pub silent: bool,
    #[serde(default = "default_auto_dismiss")]
    pub auto_dismiss: bool,
}

fn default_auto_dismiss() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "at", rename_all = "camelCase")]
pub enum NotificationTrigger {
    Immediate,
    At(DateTime<Utc>),
}

impl NotificationTrigger {
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            NotificationTrigger::Immediate => None,
            NotificationTrigger::At(at) => Some(*at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub content: NotificationContent,
    pub trigger: NotificationTrigger,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingNotification {
    pub identifier: String,
    pub content: NotificationContent,
    pub trigger: NotificationTrigger,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredNotification {
    pub identifier: String,
    pub content: NotificationContent,
    pub trigger: NotificationTrigger,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Granted,
    Denied,
    #[default]
    Undetermined,
}

impl PermissionStatus {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionStatus::Granted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionStatus::Granted => "granted",
            PermissionStatus::Denied => "denied",
            PermissionStatus::Undetermined => "undetermined",
        }
    }
}

/// How an alert is presented when it arrives. Passed to the dispatcher at
/// construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationBehavior {
    pub should_show_alert: bool,
    pub should_play_sound: bool,
    pub should_set_badge: bool,
    pub should_show_banner: bool,
    pub should_show_list: bool,
}

impl Default for NotificationBehavior {
    fn default() -> Self {
        Self {
            should_show_alert: true,
            should_play_sound: true,
            should_set_badge: false,
            should_show_banner: true,
            should_show_list: true,
        }
    }
}

impl NotificationBehavior {
    pub fn is_silent(&self) -> bool {
        !(self.should_show_alert || self.should_show_banner || self.should_show_list)
    }
}
