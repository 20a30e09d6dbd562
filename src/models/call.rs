//! Scheduled-call data models.
//!
//! `ScheduledCall` is the only persisted business entity. Its JSON shape
//! (camelCase fields, ISO-8601 dates, lowercase enum tags) is the format of
//! the `scheduledCalls` blob and of the `callData` notification payload.

use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, FixedOffset, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Which incoming-call skin renders the call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScreenType {
    #[default]
    Samsung,
    Iphone,
    Pixel,
}

impl ScreenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenType::Samsung => "samsung",
            ScreenType::Iphone => "iphone",
            ScreenType::Pixel => "pixel",
        }
    }
}

impl fmt::Display for ScreenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScreenType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "samsung" => Ok(ScreenType::Samsung),
            "iphone" => Ok(ScreenType::Iphone),
            "pixel" => Ok(ScreenType::Pixel),
            other => Err(format!("unknown screen type '{other}'")),
        }
    }
}

/// Weekday tag used by `repeatDays`. Ordered monday first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RepeatDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl RepeatDay {
    pub fn weekday(self) -> Weekday {
        match self {
            RepeatDay::Monday => Weekday::Mon,
            RepeatDay::Tuesday => Weekday::Tue,
            RepeatDay::Wednesday => Weekday::Wed,
            RepeatDay::Thursday => Weekday::Thu,
            RepeatDay::Friday => Weekday::Fri,
            RepeatDay::Saturday => Weekday::Sat,
            RepeatDay::Sunday => Weekday::Sun,
        }
    }

    pub fn from_weekday(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => RepeatDay::Monday,
            Weekday::Tue => RepeatDay::Tuesday,
            Weekday::Wed => RepeatDay::Wednesday,
            Weekday::Thu => RepeatDay::Thursday,
            Weekday::Fri => RepeatDay::Friday,
            Weekday::Sat => RepeatDay::Saturday,
            Weekday::Sun => RepeatDay::Sunday,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RepeatDay::Monday => "monday",
            RepeatDay::Tuesday => "tuesday",
            RepeatDay::Wednesday => "wednesday",
            RepeatDay::Thursday => "thursday",
            RepeatDay::Friday => "friday",
            RepeatDay::Saturday => "saturday",
            RepeatDay::Sunday => "sunday",
        }
    }
}

impl FromStr for RepeatDay {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        // Accept the full tag as well as the three-letter form shown in the day picker.
        match value.trim().to_ascii_lowercase().as_str() {
            "monday" | "mon" => Ok(RepeatDay::Monday),
            "tuesday" | "tue" => Ok(RepeatDay::Tuesday),
            "wednesday" | "wed" => Ok(RepeatDay::Wednesday),
            "thursday" | "thu" => Ok(RepeatDay::Thursday),
            "friday" | "fri" => Ok(RepeatDay::Friday),
            "saturday" | "sat" => Ok(RepeatDay::Saturday),
            "sunday" | "sun" => Ok(RepeatDay::Sunday),
            other => Err(format!("unknown repeat day '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledCall {
    pub id: String,
    pub name: String,
    pub number: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub image: String,
    pub scheduled_date: DateTime<Utc>,
    #[serde(default)]
    pub screen_type: ScreenType,
    #[serde(default)]
    pub repeat_days: BTreeSet<RepeatDay>,
    pub is_active: bool,
    /// Last occurrence handled by the dispatch path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed: Option<DateTime<Utc>>,
}

impl ScheduledCall {
    pub fn is_repeating(&self) -> bool {
        !self.repeat_days.is_empty()
    }

    pub fn repeats_on(&self, weekday: Weekday) -> bool {
        self.repeat_days.contains(&RepeatDay::from_weekday(weekday))
    }

    pub fn notification_title(&self) -> String {
        format!("Incoming Call: {}", self.name)
    }

    pub fn notification_body(&self, occurrence: DateTime<Utc>, zone: FixedOffset) -> String {
        format!(
            "Call from {} at {}",
            self.number,
            occurrence.with_timezone(&zone).format("%H:%M:%S")
        )
    }
}

/// Form data for creating or editing a scheduled call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallInput {
    pub name: String,
    pub number: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub image: String,
    pub scheduled_date: DateTime<Utc>,
    #[serde(default)]
    pub screen_type: ScreenType,
    #[serde(default)]
    pub repeat_days: BTreeSet<RepeatDay>,
}

impl CallInput {
    pub fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation("caller name is required".into()));
        }
        if self.number.trim().is_empty() {
            return Err(EngineError::Validation("phone number is required".into()));
        }
        Ok(())
    }

    /// Builds a fresh, active record with a newly assigned id.
    pub fn into_new_call(self) -> EngineResult<ScheduledCall> {
        self.validate()?;
        Ok(ScheduledCall {
            id: Uuid::new_v4().to_string(),
            name: self.name.trim().to_string(),
            number: self.number.trim().to_string(),
            location: self.location,
            image: self.image,
            scheduled_date: self.scheduled_date,
            screen_type: self.screen_type,
            repeat_days: self.repeat_days,
            is_active: true,
            last_processed: None,
        })
    }

    /// Applies an edit. The record keeps its `id` and `isActive`; a changed
    /// schedule forgets the last processed occurrence.
    pub fn apply_to(self, existing: &ScheduledCall) -> EngineResult<ScheduledCall> {
        self.validate()?;
        let schedule_changed = existing.scheduled_date != self.scheduled_date
            || existing.repeat_days != self.repeat_days;

        Ok(ScheduledCall {
            id: existing.id.clone(),
            name: self.name.trim().to_string(),
            number: self.number.trim().to_string(),
            location: self.location,
            image: self.image,
            scheduled_date: self.scheduled_date,
            screen_type: self.screen_type,
            repeat_days: self.repeat_days,
            is_active: existing.is_active,
            last_processed: if schedule_changed {
                None
            } else {
                existing.last_processed
            },
        })
    }
}

impl From<&ScheduledCall> for CallInput {
    fn from(call: &ScheduledCall) -> Self {
        Self {
            name: call.name.clone(),
            number: call.number.clone(),
            location: call.location.clone(),
            image: call.image.clone(),
            scheduled_date: call.scheduled_date,
            screen_type: call.screen_type,
            repeat_days: call.repeat_days.clone(),
        }
    }
}
