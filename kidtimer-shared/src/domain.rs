use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Owner tag for system-wide activities visible to every parent.
pub const CURATED_OWNER: &str = "curated";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl TimerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerStatus::Active => "active",
            TimerStatus::Paused => "paused",
            TimerStatus::Completed => "completed",
            TimerStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TimerStatus::Completed | TimerStatus::Cancelled)
    }

    /// Whether `self -> next` is an edge of the timer lifecycle.
    /// Self-loops are only allowed for `active` (the per-second countdown).
    pub fn can_transition_to(&self, next: TimerStatus) -> bool {
        use TimerStatus::*;
        matches!(
            (self, next),
            (Active, Active)
                | (Active, Paused)
                | (Active, Completed)
                | (Active, Cancelled)
                | (Paused, Active)
                | (Paused, Cancelled)
        )
    }
}

impl fmt::Display for TimerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown timer status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for TimerStatus {
    type Err = UnknownStatus;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TimerStatus::Active),
            "paused" => Ok(TimerStatus::Paused),
            "completed" => Ok(TimerStatus::Completed),
            "cancelled" => Ok(TimerStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    pub id: String,
    pub parent_id: String,
    pub child_id: String,
    /// Minutes, fixed at creation.
    pub initial_duration: i32,
    /// Seconds left on the countdown.
    pub remaining_time: i32,
    pub status: TimerStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub activity_suggestion_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Timer {
    pub fn total_seconds(&self) -> i32 {
        seconds_for_minutes(self.initial_duration)
    }

    /// `MM:SS` rendering of the remaining time.
    pub fn remaining_display(&self) -> String {
        format_mm_ss(self.remaining_time)
    }

    pub fn is_unfinished(&self) -> bool {
        matches!(self.status, TimerStatus::Active | TimerStatus::Paused)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Child {
    pub id: String,
    pub parent_id: String,
    pub name: String,
    pub age: Option<i32>,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub parent_id: String,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub min_age: Option<i32>,
    pub max_age: Option<i32>,
    /// Estimated minutes.
    pub duration: Option<i32>,
    pub is_custom: bool,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn is_curated(&self) -> bool {
        self.parent_id == CURATED_OWNER
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// System-wide activity as listed in the server config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuratedActivity {
    pub id: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub min_age: Option<i32>,
    #[serde(default)]
    pub max_age: Option<i32>,
    #[serde(default)]
    pub duration: Option<i32>,
    #[serde(default)]
    pub image_url: Option<String>,
}

pub fn seconds_for_minutes(minutes: i32) -> i32 {
    minutes.saturating_mul(60)
}

/// Formats seconds as zero-padded `MM:SS`; minutes are not wrapped into hours.
pub fn format_mm_ss(seconds: i32) -> String {
    let seconds = seconds.max(0);
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Default display name for a new profile: the local part of the email.
pub fn display_name_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}
