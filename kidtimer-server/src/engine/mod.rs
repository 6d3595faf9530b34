//! Countdown state machine for parents' timers.
//!
//! Every active timer is driven by its own tokio task that calls
//! [`TimerEngine::tick`] once per period. The engine keeps the authoritative
//! in-process view; the gateway sees user transitions immediately and
//! per-second progress at checkpoints.

mod countdown;
#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use kidtimer_shared::api::TimerEvent;
use kidtimer_shared::domain::{Timer, TimerStatus, now_utc};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::storage::{NewTimer, StorageError, TimerGateway, TimerUpdate};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("cannot {action} a {from} timer")]
    InvalidTransition {
        from: TimerStatus,
        action: &'static str,
    },

    #[error("failed to create timer: {0}")]
    Creation(#[source] StorageError),

    #[error("persistence failure: {0}")]
    Persistence(#[from] StorageError),
}

/// Result of advancing one timer by one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running(i32),
    Completed,
    /// Unknown timer, or one that is not active.
    Idle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointStats {
    pub persisted: usize,
    pub failed: usize,
    /// Writes that no longer applied: the timer was paused, completed or
    /// removed while the checkpoint ran.
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub tick_period: Duration,
    /// Store the current `remaining_time` together with the paused status.
    pub persist_remaining_on_pause: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(1),
            persist_remaining_on_pause: true,
        }
    }
}

#[derive(Default)]
struct EngineState {
    /// Unfinished timers, plus completed ones until their completion is stored.
    timers: HashMap<String, Timer>,
    /// Running countdown per active timer.
    countdowns: HashMap<String, CancellationToken>,
    loaded_parents: HashSet<String>,
    /// Completed locally, completion not yet stored.
    pending_sync: HashSet<String>,
}

impl EngineState {
    fn owned_mut(&mut self, parent_id: &str, timer_id: &str) -> Result<&mut Timer, TimerError> {
        self.timers
            .get_mut(timer_id)
            .filter(|t| t.parent_id == parent_id)
            .ok_or_else(|| TimerError::NotFound(format!("timer {timer_id}")))
    }

    fn stop_countdown(&mut self, timer_id: &str) {
        if let Some(token) = self.countdowns.remove(timer_id) {
            token.cancel();
        }
    }

    /// Drops a completed timer whose completion is stored.
    fn evict_completed(&mut self, timer_id: &str) {
        if self
            .timers
            .get(timer_id)
            .is_some_and(|t| t.status == TimerStatus::Completed)
            && !self.pending_sync.contains(timer_id)
        {
            self.timers.remove(timer_id);
        }
    }
}

fn check_transition(
    timer: &Timer,
    next: TimerStatus,
    action: &'static str,
) -> Result<(), TimerError> {
    if timer.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(TimerError::InvalidTransition {
            from: timer.status,
            action,
        })
    }
}

struct Inner<G> {
    gateway: G,
    settings: EngineSettings,
    state: Mutex<EngineState>,
    events: broadcast::Sender<TimerEvent>,
    root: CancellationToken,
}

pub struct TimerEngine<G: TimerGateway> {
    inner: Arc<Inner<G>>,
}

impl<G: TimerGateway> Clone for TimerEngine<G> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<G: TimerGateway> TimerEngine<G> {
    pub fn new(gateway: G, settings: EngineSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                gateway,
                settings,
                state: Mutex::new(EngineState::default()),
                events,
                root: CancellationToken::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: TimerEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Hydrates the engine with a parent's stored timers on first use and
    /// starts countdowns for the active ones.
    pub async fn load_parent(&self, parent_id: &str) -> Result<(), TimerError> {
        if self.inner.state.lock().await.loaded_parents.contains(parent_id) {
            return Ok(());
        }
        let stored = self.inner.gateway.list_timers(parent_id, None).await?;

        let mut st = self.inner.state.lock().await;
        if !st.loaded_parents.insert(parent_id.to_string()) {
            return Ok(());
        }
        let mut resumed = 0usize;
        for timer in stored.into_iter().filter(|t| !t.status.is_terminal()) {
            let id = timer.id.clone();
            // A local copy wins over the stored one.
            let local = st.timers.entry(id.clone()).or_insert(timer);
            if local.status == TimerStatus::Active {
                self.register_countdown(&mut st, &id);
                resumed += 1;
            }
        }
        debug!(parent_id, resumed, "parent timers loaded");
        Ok(())
    }

    /// Timers of a parent ordered by creation, optionally for one child.
    /// Stored history is overlaid with the live local state.
    pub async fn list(
        &self,
        parent_id: &str,
        child_id: Option<&str>,
    ) -> Result<Vec<Timer>, TimerError> {
        self.load_parent(parent_id).await?;
        let stored = self.inner.gateway.list_timers(parent_id, child_id).await?;
        let mut merged: HashMap<String, Timer> =
            stored.into_iter().map(|t| (t.id.clone(), t)).collect();
        {
            let st = self.inner.state.lock().await;
            for timer in st
                .timers
                .values()
                .filter(|t| t.parent_id == parent_id)
                .filter(|t| child_id.is_none_or(|c| t.child_id == c))
            {
                merged.insert(timer.id.clone(), timer.clone());
            }
            // Cancelled while the stored list was read.
            merged.retain(|_, t| t.status != TimerStatus::Cancelled);
        }
        let mut out: Vec<Timer> = merged.into_values().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    pub async fn start(
        &self,
        parent_id: &str,
        child_id: &str,
        duration_minutes: i32,
    ) -> Result<Timer, TimerError> {
        if duration_minutes < 1 {
            return Err(TimerError::Validation(
                "Duration must be at least 1 minute.".into(),
            ));
        }
        self.load_parent(parent_id).await?;
        self.inner
            .gateway
            .find_child(child_id)
            .await?
            .filter(|c| c.parent_id == parent_id)
            .ok_or_else(|| TimerError::NotFound(format!("child {child_id}")))?;

        let timer = self
            .inner
            .gateway
            .create_timer(NewTimer::active(
                parent_id,
                child_id,
                duration_minutes,
                now_utc(),
            ))
            .await
            .map_err(TimerError::Creation)?;

        {
            let mut st = self.inner.state.lock().await;
            st.timers.insert(timer.id.clone(), timer.clone());
            self.register_countdown(&mut st, &timer.id);
        }
        info!(timer_id = %timer.id, child_id, duration_minutes, "timer started");
        self.emit(TimerEvent::Started {
            parent_id: parent_id.to_string(),
            timer_id: timer.id.clone(),
            child_id: child_id.to_string(),
            remaining_time: timer.remaining_time,
        });
        Ok(timer)
    }

    /// Stops the countdown. Pausing a paused timer returns it unchanged.
    pub async fn pause(&self, parent_id: &str, timer_id: &str) -> Result<Timer, TimerError> {
        self.ensure_tracked(parent_id, timer_id, "pause").await?;
        let (previous, paused) = {
            let mut st = self.inner.state.lock().await;
            let timer = st.owned_mut(parent_id, timer_id)?;
            if timer.status == TimerStatus::Paused {
                return Ok(timer.clone());
            }
            check_transition(timer, TimerStatus::Paused, "pause")?;
            let previous = timer.clone();
            timer.status = TimerStatus::Paused;
            timer.updated_at = now_utc();
            let paused = timer.clone();
            st.stop_countdown(timer_id);
            (previous, paused)
        };

        let mut update = TimerUpdate::status(TimerStatus::Paused);
        if self.inner.settings.persist_remaining_on_pause {
            update = update.with_remaining(paused.remaining_time);
        }
        if let Err(e) = self.persist(timer_id, update).await {
            self.roll_back(previous, TimerStatus::Paused).await;
            return Err(e);
        }
        info!(timer_id, remaining = paused.remaining_time, "timer paused");
        self.emit(TimerEvent::Paused {
            parent_id: parent_id.to_string(),
            timer_id: timer_id.to_string(),
            remaining_time: paused.remaining_time,
        });
        Ok(paused)
    }

    /// Restarts the countdown from the last local value. Resuming an active
    /// timer returns it unchanged.
    pub async fn resume(&self, parent_id: &str, timer_id: &str) -> Result<Timer, TimerError> {
        self.ensure_tracked(parent_id, timer_id, "resume").await?;
        let (previous, resumed) = {
            let mut st = self.inner.state.lock().await;
            let timer = st.owned_mut(parent_id, timer_id)?;
            if timer.status == TimerStatus::Active {
                return Ok(timer.clone());
            }
            check_transition(timer, TimerStatus::Active, "resume")?;
            let previous = timer.clone();
            timer.status = TimerStatus::Active;
            timer.updated_at = now_utc();
            let resumed = timer.clone();
            self.register_countdown(&mut st, timer_id);
            (previous, resumed)
        };

        let update = TimerUpdate::status(TimerStatus::Active).with_remaining(resumed.remaining_time);
        if let Err(e) = self.persist(timer_id, update).await {
            self.roll_back(previous, TimerStatus::Active).await;
            return Err(e);
        }
        info!(timer_id, remaining = resumed.remaining_time, "timer resumed");
        self.emit(TimerEvent::Resumed {
            parent_id: parent_id.to_string(),
            timer_id: timer_id.to_string(),
            remaining_time: resumed.remaining_time,
        });
        Ok(resumed)
    }

    /// Deletes the timer record. Only active or paused timers can be cancelled.
    pub async fn cancel(&self, parent_id: &str, timer_id: &str) -> Result<(), TimerError> {
        self.ensure_tracked(parent_id, timer_id, "cancel").await?;
        let previous = {
            let mut st = self.inner.state.lock().await;
            let timer = st.owned_mut(parent_id, timer_id)?;
            check_transition(timer, TimerStatus::Cancelled, "cancel")?;
            let previous = timer.clone();
            timer.status = TimerStatus::Cancelled;
            st.stop_countdown(timer_id);
            previous
        };

        if let Err(e) = self.inner.gateway.delete_timer(timer_id).await {
            warn!(timer_id, error = %e, "timer delete failed; restoring");
            self.roll_back(previous, TimerStatus::Cancelled).await;
            return Err(e.into());
        }
        {
            let mut st = self.inner.state.lock().await;
            st.timers.remove(timer_id);
            st.pending_sync.remove(timer_id);
        }
        info!(timer_id, "timer cancelled");
        self.emit(TimerEvent::Cancelled {
            parent_id: parent_id.to_string(),
            timer_id: timer_id.to_string(),
        });
        Ok(())
    }

    /// Advances one active timer by one second.
    pub async fn tick(&self, timer_id: &str) -> TickOutcome {
        self.advance(timer_id, None).await
    }

    async fn advance(&self, timer_id: &str, guard: Option<&CancellationToken>) -> TickOutcome {
        let expired = {
            let mut st = self.inner.state.lock().await;
            // A countdown stopped while waiting for the lock must not tick.
            if guard.is_some_and(|g| g.is_cancelled()) {
                return TickOutcome::Idle;
            }
            let Some(timer) = st.timers.get_mut(timer_id) else {
                return TickOutcome::Idle;
            };
            if timer.status != TimerStatus::Active {
                return TickOutcome::Idle;
            }
            let now = now_utc();
            timer.updated_at = now;
            if timer.remaining_time > 1 {
                timer.remaining_time -= 1;
                let remaining = timer.remaining_time;
                let parent_id = timer.parent_id.clone();
                drop(st);
                self.emit(TimerEvent::Ticked {
                    parent_id,
                    timer_id: timer_id.to_string(),
                    remaining_time: remaining,
                });
                return TickOutcome::Running(remaining);
            }
            timer.remaining_time = 0;
            timer.status = TimerStatus::Completed;
            timer.end_time = Some(now);
            let expired = timer.clone();
            st.stop_countdown(timer_id);
            expired
        };
        self.on_expire(expired).await;
        TickOutcome::Completed
    }

    /// Stores the completed transition. A failed write leaves the timer
    /// completed locally and queues it for the next checkpoint.
    async fn on_expire(&self, timer: Timer) {
        info!(timer_id = %timer.id, child_id = %timer.child_id, "timer completed");
        self.emit(TimerEvent::Completed {
            parent_id: timer.parent_id.clone(),
            timer_id: timer.id.clone(),
            child_id: timer.child_id.clone(),
        });
        // Activity suggestions would attach here via `activity_suggestion_id`.
        match self
            .inner
            .gateway
            .update_timer(&timer.id, completion_update(&timer))
            .await
        {
            Ok(stored) => {
                if !stored {
                    debug!(timer_id = %timer.id, "completed timer no longer stored");
                }
                self.inner.state.lock().await.evict_completed(&timer.id);
            }
            Err(e) => {
                warn!(timer_id = %timer.id, error = %e, "completion not stored; will retry");
                self.inner
                    .state
                    .lock()
                    .await
                    .pending_sync
                    .insert(timer.id.clone());
                self.emit(TimerEvent::SyncFailed {
                    parent_id: timer.parent_id,
                    timer_id: timer.id,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Stores the remaining time of every active timer and retries
    /// completions that previously failed to store.
    pub async fn checkpoint(&self) -> CheckpointStats {
        let (active, pending) = {
            let mut st = self.inner.state.lock().await;
            let active: Vec<(String, i32)> = st
                .timers
                .values()
                .filter(|t| t.status == TimerStatus::Active)
                .map(|t| (t.id.clone(), t.remaining_time))
                .collect();
            let pending: Vec<Timer> = std::mem::take(&mut st.pending_sync)
                .into_iter()
                .filter_map(|id| st.timers.get(&id).cloned())
                .collect();
            (active, pending)
        };

        let mut stats = CheckpointStats::default();
        for (id, remaining) in active {
            match self
                .inner
                .gateway
                .update_timer(&id, TimerUpdate::progress(remaining))
                .await
            {
                Ok(true) => stats.persisted += 1,
                Ok(false) => stats.skipped += 1,
                Err(e) => {
                    warn!(timer_id = %id, error = %e, "checkpoint write failed");
                    stats.failed += 1;
                }
            }
        }
        for timer in pending {
            match self
                .inner
                .gateway
                .update_timer(&timer.id, completion_update(&timer))
                .await
            {
                Ok(stored) => {
                    if stored {
                        stats.persisted += 1;
                    } else {
                        stats.skipped += 1;
                    }
                    self.inner.state.lock().await.evict_completed(&timer.id);
                }
                Err(e) => {
                    warn!(timer_id = %timer.id, error = %e, "completion retry failed");
                    stats.failed += 1;
                    self.inner.state.lock().await.pending_sync.insert(timer.id);
                }
            }
        }
        if stats.persisted + stats.failed + stats.skipped > 0 {
            debug!(
                persisted = stats.persisted,
                failed = stats.failed,
                skipped = stats.skipped,
                "checkpoint"
            );
        }
        stats
    }

    /// Runs [`Self::checkpoint`] every `every` until [`Self::shutdown`].
    pub fn spawn_checkpointer(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        let stop = self.inner.root.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {
                        engine.checkpoint().await;
                    }
                }
            }
        })
    }

    /// Stops every countdown and stores the final remaining times.
    pub async fn shutdown(&self) -> CheckpointStats {
        self.inner.root.cancel();
        {
            let mut st = self.inner.state.lock().await;
            for (_, token) in st.countdowns.drain() {
                token.cancel();
            }
        }
        self.checkpoint().await
    }

    /// Loads the parent and checks that `timer_id` is one of its live
    /// timers. Completed timers already evicted report their stored state.
    async fn ensure_tracked(
        &self,
        parent_id: &str,
        timer_id: &str,
        action: &'static str,
    ) -> Result<(), TimerError> {
        self.load_parent(parent_id).await?;
        let tracked = self
            .inner
            .state
            .lock()
            .await
            .timers
            .get(timer_id)
            .is_some_and(|t| t.parent_id == parent_id);
        if tracked {
            return Ok(());
        }
        match self.inner.gateway.find_timer(timer_id).await? {
            Some(stored) if stored.parent_id == parent_id && stored.status.is_terminal() => {
                Err(TimerError::InvalidTransition {
                    from: stored.status,
                    action,
                })
            }
            _ => Err(TimerError::NotFound(format!("timer {timer_id}"))),
        }
    }

    async fn persist(&self, timer_id: &str, update: TimerUpdate) -> Result<(), TimerError> {
        match self.inner.gateway.update_timer(timer_id, update).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                // Removed behind our back; drop the local copy as well.
                let mut st = self.inner.state.lock().await;
                st.stop_countdown(timer_id);
                st.timers.remove(timer_id);
                Err(TimerError::NotFound(format!("timer {timer_id}")))
            }
            Err(e) => {
                warn!(timer_id, error = %e, "timer update failed; rolling back");
                Err(e.into())
            }
        }
    }

    /// Restores `previous` if the timer is still in the state the failed
    /// transition left it in.
    async fn roll_back(&self, previous: Timer, attempted: TimerStatus) {
        let mut st = self.inner.state.lock().await;
        let id = previous.id.clone();
        let Some(current) = st.timers.get_mut(&id) else {
            return;
        };
        if current.status != attempted {
            return;
        }
        let restore_active = previous.status == TimerStatus::Active;
        *current = previous;
        if restore_active {
            self.register_countdown(&mut st, &id);
        } else {
            st.stop_countdown(&id);
        }
    }

    /// Starts a countdown unless one is already running for `timer_id`.
    fn register_countdown(&self, st: &mut EngineState, timer_id: &str) {
        if st.countdowns.contains_key(timer_id) {
            return;
        }
        let token = self.inner.root.child_token();
        st.countdowns.insert(timer_id.to_string(), token.clone());
        countdown::spawn(self.clone(), timer_id.to_string(), token);
    }
}

fn completion_update(timer: &Timer) -> TimerUpdate {
    let update = TimerUpdate::status(TimerStatus::Completed).with_remaining(0);
    match timer.end_time {
        Some(end) => update.with_end_time(end),
        None => update,
    }
}
