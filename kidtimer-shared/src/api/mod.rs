use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{self, TimerStatus};

pub mod endpoints;
#[cfg(feature = "rest-client")]
pub mod rest;

pub const API_V1_PREFIX: &str = "/api/v1";

// Auth
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthReq {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResp {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfileDto {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<domain::UserProfile> for UserProfileDto {
    fn from(u: domain::UserProfile) -> Self {
        Self {
            uid: u.uid,
            email: u.email,
            display_name: u.display_name,
            photo_url: u.photo_url,
            created_at: u.created_at,
        }
    }
}

// Children
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildDto {
    pub id: String,
    pub parent_id: String,
    pub name: String,
    pub age: Option<i32>,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<domain::Child> for ChildDto {
    fn from(c: domain::Child) -> Self {
        Self {
            id: c.id,
            parent_id: c.parent_id,
            name: c.name,
            age: c.age,
            avatar: c.avatar,
            created_at: c.created_at,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NewChildReq {
    pub name: String,
    #[serde(default)]
    pub age: Option<i32>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateChildReq {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<i32>,
    #[serde(default)]
    pub avatar: Option<String>,
}

// Activities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityDto {
    pub id: String,
    pub parent_id: String,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub min_age: Option<i32>,
    pub max_age: Option<i32>,
    pub duration: Option<i32>,
    pub is_custom: bool,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<domain::Activity> for ActivityDto {
    fn from(a: domain::Activity) -> Self {
        Self {
            id: a.id,
            parent_id: a.parent_id,
            name: a.name,
            description: a.description,
            category: a.category,
            min_age: a.min_age,
            max_age: a.max_age,
            duration: a.duration,
            is_custom: a.is_custom,
            image_url: a.image_url,
            created_at: a.created_at,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NewActivityReq {
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

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateActivityReq {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
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

// Timers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerDto {
    pub id: String,
    pub parent_id: String,
    pub child_id: String,
    pub initial_duration: i32,
    pub remaining_time: i32,
    /// `MM:SS`
    pub remaining_display: String,
    pub status: TimerStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub activity_suggestion_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<domain::Timer> for TimerDto {
    fn from(t: domain::Timer) -> Self {
        Self {
            remaining_display: t.remaining_display(),
            id: t.id,
            parent_id: t.parent_id,
            child_id: t.child_id,
            initial_duration: t.initial_duration,
            remaining_time: t.remaining_time,
            status: t.status,
            start_time: t.start_time,
            end_time: t.end_time,
            activity_suggestion_id: t.activity_suggestion_id,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartTimerReq {
    pub child_id: String,
    pub duration_minutes: i32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TimerListQuery {
    pub child_id: Option<String>,
}

/// Broadcast on every timer transition; per-second ticks included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimerEvent {
    Started {
        parent_id: String,
        timer_id: String,
        child_id: String,
        remaining_time: i32,
    },
    Ticked {
        parent_id: String,
        timer_id: String,
        remaining_time: i32,
    },
    Paused {
        parent_id: String,
        timer_id: String,
        remaining_time: i32,
    },
    Resumed {
        parent_id: String,
        timer_id: String,
        remaining_time: i32,
    },
    Completed {
        parent_id: String,
        timer_id: String,
        child_id: String,
    },
    Cancelled {
        parent_id: String,
        timer_id: String,
    },
    /// Local state moved ahead of the stored record; retried at next checkpoint.
    SyncFailed {
        parent_id: String,
        timer_id: String,
        error: String,
    },
}

impl TimerEvent {
    pub fn parent_id(&self) -> &str {
        match self {
            TimerEvent::Started { parent_id, .. }
            | TimerEvent::Ticked { parent_id, .. }
            | TimerEvent::Paused { parent_id, .. }
            | TimerEvent::Resumed { parent_id, .. }
            | TimerEvent::Completed { parent_id, .. }
            | TimerEvent::Cancelled { parent_id, .. }
            | TimerEvent::SyncFailed { parent_id, .. } => parent_id,
        }
    }

    pub fn timer_id(&self) -> &str {
        match self {
            TimerEvent::Started { timer_id, .. }
            | TimerEvent::Ticked { timer_id, .. }
            | TimerEvent::Paused { timer_id, .. }
            | TimerEvent::Resumed { timer_id, .. }
            | TimerEvent::Completed { timer_id, .. }
            | TimerEvent::Cancelled { timer_id, .. }
            | TimerEvent::SyncFailed { timer_id, .. } => timer_id,
        }
    }

    /// SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            TimerEvent::Started { .. } => "started",
            TimerEvent::Ticked { .. } => "ticked",
            TimerEvent::Paused { .. } => "paused",
            TimerEvent::Resumed { .. } => "resumed",
            TimerEvent::Completed { .. } => "completed",
            TimerEvent::Cancelled { .. } => "cancelled",
            TimerEvent::SyncFailed { .. } => "sync_failed",
        }
    }
}

// Dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardTimerDto {
    #[serde(flatten)]
    pub timer: TimerDto,
    /// `None` when the child record no longer exists.
    pub child_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardDto {
    pub user: UserProfileDto,
    pub children: Vec<ChildDto>,
    pub activities: Vec<ActivityDto>,
    pub active_timers: Vec<DashboardTimerDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionInfoDto {
    pub version: String,
}
