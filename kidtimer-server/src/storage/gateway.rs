//! Persistence seam used by the timer engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kidtimer_shared::domain::{self, TimerStatus};

use super::{StorageError, Store};

/// A timer record that has not been stored yet; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewTimer {
    pub parent_id: String,
    pub child_id: String,
    pub initial_duration: i32,
    pub remaining_time: i32,
    pub status: TimerStatus,
    pub start_time: DateTime<Utc>,
}

impl NewTimer {
    /// Fresh countdown with the full duration remaining.
    pub fn active(
        parent_id: &str,
        child_id: &str,
        duration_minutes: i32,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            parent_id: parent_id.to_string(),
            child_id: child_id.to_string(),
            initial_duration: duration_minutes,
            remaining_time: domain::seconds_for_minutes(duration_minutes),
            status: TimerStatus::Active,
            start_time,
        }
    }
}

/// Partial timer update. `None` fields keep their stored values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimerUpdate {
    pub remaining_time: Option<i32>,
    pub status: Option<TimerStatus>,
    pub end_time: Option<DateTime<Utc>>,
    pub activity_suggestion_id: Option<String>,
    /// Apply only to an active record whose stored `remaining_time` is not
    /// already below the new value.
    pub progress_only: bool,
}

impl TimerUpdate {
    /// Countdown progress. Never overrides a pause or completion stored in
    /// the meantime, and never raises the stored remaining time.
    pub fn progress(remaining: i32) -> Self {
        Self {
            remaining_time: Some(remaining),
            progress_only: true,
            ..Default::default()
        }
    }

    pub fn status(status: TimerStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_remaining(mut self, remaining: i32) -> Self {
        self.remaining_time = Some(remaining);
        self
    }

    pub fn with_end_time(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }
}

#[async_trait]
pub trait TimerGateway: Send + Sync + 'static {
    async fn find_child(&self, child_id: &str) -> Result<Option<domain::Child>, StorageError>;

    async fn find_timer(&self, timer_id: &str) -> Result<Option<domain::Timer>, StorageError>;

    async fn create_timer(&self, new: NewTimer) -> Result<domain::Timer, StorageError>;

    async fn list_timers(
        &self,
        parent_id: &str,
        child_id: Option<&str>,
    ) -> Result<Vec<domain::Timer>, StorageError>;

    /// Returns `false` when the timer no longer exists, or when a
    /// [`TimerUpdate::progress`] write no longer applies.
    async fn update_timer(&self, timer_id: &str, update: TimerUpdate)
    -> Result<bool, StorageError>;

    async fn delete_timer(&self, timer_id: &str) -> Result<bool, StorageError>;
}

#[async_trait]
impl TimerGateway for Store {
    async fn find_child(&self, child_id: &str) -> Result<Option<domain::Child>, StorageError> {
        self.get_child(child_id).await
    }

    async fn find_timer(&self, timer_id: &str) -> Result<Option<domain::Timer>, StorageError> {
        self.get_timer(timer_id).await
    }

    async fn create_timer(&self, new: NewTimer) -> Result<domain::Timer, StorageError> {
        self.insert_timer(new).await
    }

    async fn list_timers(
        &self,
        parent_id: &str,
        child_id: Option<&str>,
    ) -> Result<Vec<domain::Timer>, StorageError> {
        Store::list_timers(self, parent_id, child_id).await
    }

    async fn update_timer(
        &self,
        timer_id: &str,
        update: TimerUpdate,
    ) -> Result<bool, StorageError> {
        self.apply_timer_update(timer_id, update).await
    }

    async fn delete_timer(&self, timer_id: &str) -> Result<bool, StorageError> {
        self.remove_timer(timer_id).await
    }
}
