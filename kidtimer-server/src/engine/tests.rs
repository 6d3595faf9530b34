use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};
use kidtimer_shared::api::TimerEvent;
use kidtimer_shared::domain::{Child, Timer, TimerStatus, now_utc};

use super::*;
use crate::storage::{NewTimer, StorageError, TimerGateway, TimerUpdate};

#[derive(Default)]
struct MemoryState {
    children: HashMap<String, Child>,
    timers: HashMap<String, Timer>,
    next_id: u32,
    fail_creates: bool,
    fail_updates: bool,
    fail_deletes: bool,
}

/// In-memory gateway with switchable write failures.
#[derive(Clone, Default)]
struct MemoryGateway {
    state: Arc<StdMutex<MemoryState>>,
}

fn injected() -> StorageError {
    StorageError::InvalidInput("injected failure".into())
}

impl MemoryGateway {
    fn with_children(children: &[(&str, &str)]) -> Self {
        let gw = Self::default();
        {
            let mut st = gw.state.lock().unwrap();
            for (parent, id) in children {
                st.children.insert(
                    id.to_string(),
                    Child {
                        id: id.to_string(),
                        parent_id: parent.to_string(),
                        name: format!("kid {id}"),
                        age: None,
                        avatar: None,
                        created_at: now_utc(),
                    },
                );
            }
        }
        gw
    }

    fn stored(&self, id: &str) -> Option<Timer> {
        self.state.lock().unwrap().timers.get(id).cloned()
    }

    fn set_fail_updates(&self, fail: bool) {
        self.state.lock().unwrap().fail_updates = fail;
    }

    fn insert_timer(&self, timer: Timer) {
        self.state
            .lock()
            .unwrap()
            .timers
            .insert(timer.id.clone(), timer);
    }
}

#[async_trait]
impl TimerGateway for MemoryGateway {
    async fn find_child(&self, child_id: &str) -> Result<Option<Child>, StorageError> {
        Ok(self.state.lock().unwrap().children.get(child_id).cloned())
    }

    async fn find_timer(&self, timer_id: &str) -> Result<Option<Timer>, StorageError> {
        Ok(self.stored(timer_id))
    }

    async fn create_timer(&self, new: NewTimer) -> Result<Timer, StorageError> {
        let mut st = self.state.lock().unwrap();
        if st.fail_creates {
            return Err(injected());
        }
        st.next_id += 1;
        let now = now_utc();
        let timer = Timer {
            id: format!("t{}", st.next_id),
            parent_id: new.parent_id,
            child_id: new.child_id,
            initial_duration: new.initial_duration,
            remaining_time: new.remaining_time,
            status: new.status,
            start_time: new.start_time,
            end_time: None,
            activity_suggestion_id: None,
            created_at: now,
            updated_at: now,
        };
        st.timers.insert(timer.id.clone(), timer.clone());
        Ok(timer)
    }

    async fn list_timers(
        &self,
        parent_id: &str,
        child_id: Option<&str>,
    ) -> Result<Vec<Timer>, StorageError> {
        let st = self.state.lock().unwrap();
        Ok(st
            .timers
            .values()
            .filter(|t| t.parent_id == parent_id)
            .filter(|t| child_id.is_none_or(|c| t.child_id == c))
            .cloned()
            .collect())
    }

    async fn update_timer(&self, timer_id: &str, update: TimerUpdate) -> Result<bool, StorageError> {
        let mut st = self.state.lock().unwrap();
        if st.fail_updates {
            return Err(injected());
        }
        let Some(t) = st.timers.get_mut(timer_id) else {
            return Ok(false);
        };
        if update.progress_only
            && (t.status != TimerStatus::Active
                || update.remaining_time.is_some_and(|r| r > t.remaining_time))
        {
            return Ok(false);
        }
        if let Some(r) = update.remaining_time {
            t.remaining_time = r;
        }
        if let Some(s) = update.status {
            t.status = s;
        }
        if let Some(e) = update.end_time {
            t.end_time = Some(e);
        }
        t.updated_at = now_utc();
        Ok(true)
    }

    async fn delete_timer(&self, timer_id: &str) -> Result<bool, StorageError> {
        let mut st = self.state.lock().unwrap();
        if st.fail_deletes {
            return Err(injected());
        }
        Ok(st.timers.remove(timer_id).is_some())
    }
}

/// Holds progress writes until released, so a checkpoint can be caught
/// mid-flight.
#[derive(Clone)]
struct GatedGateway {
    inner: MemoryGateway,
    held: Arc<Notify>,
    release: Arc<Semaphore>,
}

impl GatedGateway {
    fn new(inner: MemoryGateway) -> Self {
        Self {
            inner,
            held: Arc::new(Notify::new()),
            release: Arc::new(Semaphore::new(0)),
        }
    }
}

#[async_trait]
impl TimerGateway for GatedGateway {
    async fn find_child(&self, child_id: &str) -> Result<Option<Child>, StorageError> {
        self.inner.find_child(child_id).await
    }

    async fn find_timer(&self, timer_id: &str) -> Result<Option<Timer>, StorageError> {
        self.inner.find_timer(timer_id).await
    }

    async fn create_timer(&self, new: NewTimer) -> Result<Timer, StorageError> {
        self.inner.create_timer(new).await
    }

    async fn list_timers(
        &self,
        parent_id: &str,
        child_id: Option<&str>,
    ) -> Result<Vec<Timer>, StorageError> {
        self.inner.list_timers(parent_id, child_id).await
    }

    async fn update_timer(&self, timer_id: &str, update: TimerUpdate) -> Result<bool, StorageError> {
        if update.progress_only {
            self.held.notify_one();
            self.release.acquire().await.unwrap().forget();
        }
        self.inner.update_timer(timer_id, update).await
    }

    async fn delete_timer(&self, timer_id: &str) -> Result<bool, StorageError> {
        self.inner.delete_timer(timer_id).await
    }
}

/// Engine whose background countdowns never fire during a test, so ticks
/// are driven by hand.
fn manual_engine<G: TimerGateway>(gw: G) -> TimerEngine<G> {
    TimerEngine::new(
        gw,
        EngineSettings {
            tick_period: Duration::from_secs(3600),
            ..Default::default()
        },
    )
}

async fn tick_n<G: TimerGateway>(engine: &TimerEngine<G>, id: &str, n: usize) -> TickOutcome {
    let mut last = TickOutcome::Idle;
    for _ in 0..n {
        last = engine.tick(id).await;
    }
    last
}

#[tokio::test]
async fn one_minute_timer_completes_after_sixty_ticks() {
    let gw = MemoryGateway::with_children(&[("p1", "c1")]);
    let engine = manual_engine(gw.clone());
    let timer = engine.start("p1", "c1", 1).await.unwrap();
    assert_eq!(timer.remaining_time, 60);
    assert_eq!(timer.status, TimerStatus::Active);

    assert_eq!(tick_n(&engine, &timer.id, 59).await, TickOutcome::Running(1));
    assert_eq!(engine.tick(&timer.id).await, TickOutcome::Completed);
    assert_eq!(engine.tick(&timer.id).await, TickOutcome::Idle);

    let stored = gw.stored(&timer.id).unwrap();
    assert_eq!(stored.status, TimerStatus::Completed);
    assert_eq!(stored.remaining_time, 0);
    assert!(stored.end_time.is_some());

    let local = engine.list("p1", None).await.unwrap();
    assert_eq!(local[0].status, TimerStatus::Completed);
    assert_eq!(local[0].remaining_display(), "00:00");
}

#[tokio::test]
async fn pause_and_resume_continue_from_local_value() {
    let gw = MemoryGateway::with_children(&[("p1", "c1")]);
    let engine = manual_engine(gw.clone());
    let timer = engine.start("p1", "c1", 15).await.unwrap();

    assert_eq!(tick_n(&engine, &timer.id, 5).await, TickOutcome::Running(895));
    let paused = engine.pause("p1", &timer.id).await.unwrap();
    assert_eq!(paused.status, TimerStatus::Paused);
    assert_eq!(paused.remaining_time, 895);

    let stored = gw.stored(&timer.id).unwrap();
    assert_eq!(stored.status, TimerStatus::Paused);
    assert_eq!(stored.remaining_time, 895);

    // Ticks racing a pause are ignored.
    assert_eq!(engine.tick(&timer.id).await, TickOutcome::Idle);

    let resumed = engine.resume("p1", &timer.id).await.unwrap();
    assert_eq!(resumed.status, TimerStatus::Active);
    assert_eq!(tick_n(&engine, &timer.id, 10).await, TickOutcome::Running(885));
}

#[tokio::test]
async fn pause_keeps_stored_remaining_when_disabled() {
    let gw = MemoryGateway::with_children(&[("p1", "c1")]);
    let engine = TimerEngine::new(
        gw.clone(),
        EngineSettings {
            tick_period: Duration::from_secs(3600),
            persist_remaining_on_pause: false,
        },
    );
    let timer = engine.start("p1", "c1", 2).await.unwrap();
    tick_n(&engine, &timer.id, 3).await;
    engine.pause("p1", &timer.id).await.unwrap();

    let stored = gw.stored(&timer.id).unwrap();
    assert_eq!(stored.status, TimerStatus::Paused);
    assert_eq!(stored.remaining_time, 120);
}

#[tokio::test]
async fn cancelling_one_timer_leaves_the_other_running() {
    let gw = MemoryGateway::with_children(&[("p1", "c1"), ("p1", "c2")]);
    let engine = manual_engine(gw.clone());
    let a = engine.start("p1", "c1", 5).await.unwrap();
    let b = engine.start("p1", "c2", 5).await.unwrap();

    for _ in 0..3 {
        engine.tick(&a.id).await;
        engine.tick(&b.id).await;
    }
    engine.cancel("p1", &a.id).await.unwrap();
    assert!(gw.stored(&a.id).is_none());
    assert_eq!(engine.tick(&a.id).await, TickOutcome::Idle);

    assert_eq!(engine.tick(&b.id).await, TickOutcome::Running(296));
    let remaining = engine.list("p1", None).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, b.id);
    assert_eq!(engine.list("p1", Some("c1")).await.unwrap().len(), 0);
}

#[tokio::test]
async fn start_validates_duration_and_child_ownership() {
    let gw = MemoryGateway::with_children(&[("p1", "c1"), ("p2", "c2")]);
    let engine = manual_engine(gw.clone());

    assert!(matches!(
        engine.start("p1", "c1", 0).await,
        Err(TimerError::Validation(_))
    ));
    assert!(matches!(
        engine.start("p1", "nope", 5).await,
        Err(TimerError::NotFound(_))
    ));
    assert!(matches!(
        engine.start("p1", "c2", 5).await,
        Err(TimerError::NotFound(_))
    ));

    gw.state.lock().unwrap().fail_creates = true;
    assert!(matches!(
        engine.start("p1", "c1", 5).await,
        Err(TimerError::Creation(_))
    ));
}

#[tokio::test]
async fn transitions_respect_state_machine_and_ownership() {
    let gw = MemoryGateway::with_children(&[("p1", "c1")]);
    let engine = manual_engine(gw.clone());
    let timer = engine.start("p1", "c1", 1).await.unwrap();

    // Another parent cannot see the timer.
    assert!(matches!(
        engine.pause("p2", &timer.id).await,
        Err(TimerError::NotFound(_))
    ));

    assert_eq!(
        engine.resume("p1", &timer.id).await.unwrap().status,
        TimerStatus::Active
    );
    engine.pause("p1", &timer.id).await.unwrap();
    assert_eq!(
        engine.pause("p1", &timer.id).await.unwrap().status,
        TimerStatus::Paused
    );
    engine.resume("p1", &timer.id).await.unwrap();

    tick_n(&engine, &timer.id, 60).await;
    for result in [
        engine.pause("p1", &timer.id).await.map(|_| ()),
        engine.resume("p1", &timer.id).await.map(|_| ()),
        engine.cancel("p1", &timer.id).await,
    ] {
        assert!(matches!(
            result,
            Err(TimerError::InvalidTransition {
                from: TimerStatus::Completed,
                ..
            })
        ));
    }
}

#[tokio::test]
async fn failed_writes_roll_back_user_transitions() {
    let gw = MemoryGateway::with_children(&[("p1", "c1")]);
    let engine = manual_engine(gw.clone());
    let timer = engine.start("p1", "c1", 1).await.unwrap();
    engine.tick(&timer.id).await;

    gw.set_fail_updates(true);
    assert!(matches!(
        engine.pause("p1", &timer.id).await,
        Err(TimerError::Persistence(_))
    ));
    let local = &engine.list("p1", None).await.unwrap()[0];
    assert_eq!(local.status, TimerStatus::Active);
    assert_eq!(engine.tick(&timer.id).await, TickOutcome::Running(58));

    gw.state.lock().unwrap().fail_deletes = true;
    assert!(matches!(
        engine.cancel("p1", &timer.id).await,
        Err(TimerError::Persistence(_))
    ));
    assert_eq!(
        engine.list("p1", None).await.unwrap()[0].status,
        TimerStatus::Active
    );
    assert!(gw.stored(&timer.id).is_some());
}

#[tokio::test]
async fn failed_completion_is_retried_by_checkpoint() {
    let gw = MemoryGateway::with_children(&[("p1", "c1")]);
    let engine = manual_engine(gw.clone());
    let mut events = engine.subscribe();
    let timer = engine.start("p1", "c1", 1).await.unwrap();

    gw.set_fail_updates(true);
    assert_eq!(tick_n(&engine, &timer.id, 60).await, TickOutcome::Completed);
    assert_eq!(gw.stored(&timer.id).unwrap().status, TimerStatus::Active);

    let mut saw_sync_failure = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, TimerEvent::SyncFailed { .. }) {
            saw_sync_failure = true;
        }
    }
    assert!(saw_sync_failure);

    let stats = engine.checkpoint().await;
    assert_eq!(stats.failed, 1);

    gw.set_fail_updates(false);
    let stats = engine.checkpoint().await;
    assert_eq!(
        stats,
        CheckpointStats {
            persisted: 1,
            failed: 0,
            skipped: 0
        }
    );
    assert!(engine.inner.state.lock().await.timers.is_empty());
    let stored = gw.stored(&timer.id).unwrap();
    assert_eq!(stored.status, TimerStatus::Completed);
    assert_eq!(stored.remaining_time, 0);
}

#[tokio::test]
async fn checkpoint_stores_progress_of_active_timers() {
    let gw = MemoryGateway::with_children(&[("p1", "c1")]);
    let engine = manual_engine(gw.clone());
    let timer = engine.start("p1", "c1", 3).await.unwrap();
    tick_n(&engine, &timer.id, 20).await;
    assert_eq!(gw.stored(&timer.id).unwrap().remaining_time, 180);

    let stats = engine.shutdown().await;
    assert_eq!(stats.persisted, 1);
    let stored = gw.stored(&timer.id).unwrap();
    assert_eq!(stored.remaining_time, 160);
    assert_eq!(stored.status, TimerStatus::Active);
}

#[tokio::test]
async fn stored_timers_are_loaded_once_per_parent() {
    let gw = MemoryGateway::with_children(&[("p1", "c1")]);
    let now = now_utc();
    gw.insert_timer(Timer {
        id: "old".into(),
        parent_id: "p1".into(),
        child_id: "c1".into(),
        initial_duration: 1,
        remaining_time: 30,
        status: TimerStatus::Active,
        start_time: now,
        end_time: None,
        activity_suggestion_id: None,
        created_at: now,
        updated_at: now,
    });
    let engine = manual_engine(gw.clone());

    assert_eq!(engine.tick("old").await, TickOutcome::Idle);
    let listed = engine.list("p1", Some("c1")).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(engine.tick("old").await, TickOutcome::Running(29));

    // Reloading must not clobber local progress.
    engine.load_parent("p1").await.unwrap();
    assert_eq!(engine.list("p1", None).await.unwrap()[0].remaining_time, 29);
    assert!(engine.list("p2", None).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn countdown_task_drives_timer_to_completion() {
    let gw = MemoryGateway::with_children(&[("p1", "c1")]);
    let engine = TimerEngine::new(gw.clone(), EngineSettings::default());
    let mut events = engine.subscribe();
    let timer = engine.start("p1", "c1", 1).await.unwrap();

    let mut ticks = 0;
    loop {
        match events.recv().await.unwrap() {
            TimerEvent::Ticked { .. } => ticks += 1,
            TimerEvent::Completed { timer_id, .. } => {
                assert_eq!(timer_id, timer.id);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(ticks, 59);
    // Completion is stored right after the event is emitted.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gw.stored(&timer.id).unwrap().status, TimerStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn paused_countdown_does_not_advance() {
    let gw = MemoryGateway::with_children(&[("p1", "c1")]);
    let engine = TimerEngine::new(gw.clone(), EngineSettings::default());
    let timer = engine.start("p1", "c1", 1).await.unwrap();

    tokio::time::sleep(Duration::from_millis(5500)).await;
    let paused = engine.pause("p1", &timer.id).await.unwrap();
    assert_eq!(paused.remaining_time, 55);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(engine.list("p1", None).await.unwrap()[0].remaining_time, 55);

    engine.resume("p1", &timer.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(engine.list("p1", None).await.unwrap()[0].remaining_time, 53);
}

#[tokio::test]
async fn checkpoint_does_not_undo_a_pause() {
    let mem = MemoryGateway::with_children(&[("p1", "c1")]);
    let gw = GatedGateway::new(mem.clone());
    let engine = manual_engine(gw.clone());
    let timer = engine.start("p1", "c1", 15).await.unwrap();

    // Checkpoint lands before the pause.
    tick_n(&engine, &timer.id, 5).await;
    let checkpoint = tokio::spawn({
        let engine = engine.clone();
        async move { engine.checkpoint().await }
    });
    gw.held.notified().await;
    gw.release.add_permits(1);
    assert_eq!(checkpoint.await.unwrap().persisted, 1);
    tick_n(&engine, &timer.id, 5).await;
    engine.pause("p1", &timer.id).await.unwrap();
    let stored = mem.stored(&timer.id).unwrap();
    assert_eq!((stored.status, stored.remaining_time), (TimerStatus::Paused, 890));

    // Pause and resume land while an older snapshot is in flight.
    engine.resume("p1", &timer.id).await.unwrap();
    tick_n(&engine, &timer.id, 5).await;
    let checkpoint = tokio::spawn({
        let engine = engine.clone();
        async move { engine.checkpoint().await }
    });
    gw.held.notified().await;
    tick_n(&engine, &timer.id, 5).await;
    engine.pause("p1", &timer.id).await.unwrap();
    gw.release.add_permits(1);
    let stats = checkpoint.await.unwrap();
    assert_eq!((stats.persisted, stats.skipped), (0, 1));
    let stored = mem.stored(&timer.id).unwrap();
    assert_eq!((stored.status, stored.remaining_time), (TimerStatus::Paused, 880));

    engine.resume("p1", &timer.id).await.unwrap();
    let checkpoint = tokio::spawn({
        let engine = engine.clone();
        async move { engine.checkpoint().await }
    });
    gw.held.notified().await;
    tick_n(&engine, &timer.id, 2).await;
    engine.pause("p1", &timer.id).await.unwrap();
    engine.resume("p1", &timer.id).await.unwrap();
    gw.release.add_permits(1);
    checkpoint.await.unwrap();
    let stored = mem.stored(&timer.id).unwrap();
    assert_eq!((stored.status, stored.remaining_time), (TimerStatus::Active, 878));
}

#[tokio::test]
async fn checkpoint_does_not_undo_a_completion() {
    let mem = MemoryGateway::with_children(&[("p1", "c1")]);
    let gw = GatedGateway::new(mem.clone());
    let engine = manual_engine(gw.clone());
    let timer = engine.start("p1", "c1", 1).await.unwrap();

    tick_n(&engine, &timer.id, 10).await;
    let checkpoint = tokio::spawn({
        let engine = engine.clone();
        async move { engine.checkpoint().await }
    });
    gw.held.notified().await;
    assert_eq!(tick_n(&engine, &timer.id, 50).await, TickOutcome::Completed);
    gw.release.add_permits(1);
    let stats = checkpoint.await.unwrap();
    assert_eq!(stats.skipped, 1);

    let stored = mem.stored(&timer.id).unwrap();
    assert_eq!(stored.status, TimerStatus::Completed);
    assert_eq!(stored.remaining_time, 0);
}

#[tokio::test]
async fn checkpoint_skips_timers_removed_meanwhile() {
    let gw = MemoryGateway::with_children(&[("p1", "c1")]);
    let engine = manual_engine(gw.clone());
    let timer = engine.start("p1", "c1", 5).await.unwrap();
    engine.tick(&timer.id).await;
    gw.state.lock().unwrap().timers.clear();

    let stats = engine.checkpoint().await;
    assert_eq!(
        stats,
        CheckpointStats {
            persisted: 0,
            failed: 0,
            skipped: 1
        }
    );
}

#[tokio::test]
async fn stored_completions_leave_memory_but_stay_listed() {
    let gw = MemoryGateway::with_children(&[("p1", "c1")]);
    let engine = manual_engine(gw.clone());
    let done = engine.start("p1", "c1", 1).await.unwrap();
    let running = engine.start("p1", "c1", 2).await.unwrap();
    tick_n(&engine, &done.id, 60).await;

    {
        let st = engine.inner.state.lock().await;
        assert!(!st.timers.contains_key(&done.id));
        assert!(st.timers.contains_key(&running.id));
    }
    let listed = engine.list("p1", Some("c1")).await.unwrap();
    let ids: Vec<_> = listed.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&done.id.as_str()));
    assert_eq!(
        listed.iter().find(|t| t.id == done.id).unwrap().status,
        TimerStatus::Completed
    );

    // A fresh engine does not hydrate finished timers.
    let restarted = manual_engine(gw.clone());
    restarted.load_parent("p1").await.unwrap();
    assert!(!restarted.inner.state.lock().await.timers.contains_key(&done.id));
    assert!(matches!(
        restarted.cancel("p1", &done.id).await,
        Err(TimerError::InvalidTransition {
            from: TimerStatus::Completed,
            ..
        })
    ));
    assert!(matches!(
        restarted.cancel("p2", &done.id).await,
        Err(TimerError::NotFound(_))
    ));
}
