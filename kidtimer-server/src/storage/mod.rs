pub mod gateway;
pub mod models;
pub mod schema;

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use kidtimer_shared::domain::{self, CURATED_OWNER, CuratedActivity};
use models::{ActivityChanges, ChildChanges, NewActivity, NewChild, NewSession, NewUser};
use tracing::trace;

pub use gateway::{NewTimer, TimerGateway, TimerUpdate};

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A stored row could not be mapped back to a domain record.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, StorageError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<T, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            f(&mut conn)
        })
        .await?
    }

    /// Upserts the system-wide activities listed in the config.
    pub async fn seed_curated_activities(
        &self,
        curated: &[CuratedActivity],
    ) -> Result<(), StorageError> {
        use schema::activities;

        let curated_owned = curated.to_owned();
        self.with_conn(move |conn| {
            let now = Utc::now().naive_utc();
            for a in &curated_owned {
                let row = NewActivity {
                    id: &a.id,
                    parent_id: CURATED_OWNER,
                    name: &a.name,
                    description: a.description.as_deref(),
                    category: &a.category,
                    min_age: a.min_age,
                    max_age: a.max_age,
                    duration: a.duration,
                    is_custom: false,
                    image_url: a.image_url.as_deref(),
                    created_at: now,
                };
                diesel::insert_into(activities::table)
                    .values(&row)
                    .on_conflict(activities::id)
                    .do_update()
                    .set((
                        activities::name.eq(row.name),
                        activities::description.eq(row.description),
                        activities::category.eq(row.category),
                        activities::min_age.eq(row.min_age),
                        activities::max_age.eq(row.max_age),
                        activities::duration.eq(row.duration),
                        activities::image_url.eq(row.image_url),
                    ))
                    .execute(conn)?;
            }
            Ok(())
        })
        .await
    }

    // User profiles

    /// Creates the profile on first sight of `uid`; an existing profile is
    /// returned untouched.
    pub async fn ensure_user_profile(
        &self,
        uid: &str,
        email: &str,
    ) -> Result<domain::UserProfile, StorageError> {
        use schema::users::dsl as u;
        let uid_owned = uid.to_string();
        let email_owned = email.to_string();
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| -> Result<domain::UserProfile, StorageError> {
                let existing = u::users
                    .filter(u::uid.eq(&uid_owned))
                    .first::<models::User>(conn)
                    .optional()?;
                if let Some(user) = existing {
                    return Ok(user.into_domain());
                }
                let display_name = domain::display_name_from_email(&email_owned);
                let row = NewUser {
                    uid: &uid_owned,
                    email: &email_owned,
                    display_name: &display_name,
                    created_at: Utc::now().naive_utc(),
                };
                diesel::insert_into(u::users).values(&row).execute(conn)?;
                trace!(uid = %uid_owned, "user profile created");
                Ok(u::users
                    .filter(u::uid.eq(&uid_owned))
                    .first::<models::User>(conn)?
                    .into_domain())
            })
        })
        .await
    }

    pub async fn get_user_profile(
        &self,
        uid: &str,
    ) -> Result<Option<domain::UserProfile>, StorageError> {
        use schema::users::dsl as u;
        let uid_owned = uid.to_string();
        self.with_conn(move |conn| {
            Ok(u::users
                .filter(u::uid.eq(&uid_owned))
                .first::<models::User>(conn)
                .optional()?
                .map(models::User::into_domain))
        })
        .await
    }

    // Children

    pub async fn add_child(
        &self,
        parent_id: &str,
        name: &str,
        age: Option<i32>,
        avatar: Option<&str>,
    ) -> Result<domain::Child, StorageError> {
        use schema::children::dsl as c;
        let parent_owned = parent_id.to_string();
        let name_owned = name.to_string();
        let avatar_owned = avatar.map(|s| s.to_string());
        self.with_conn(move |conn| {
            let new_id = uuid::Uuid::new_v4().to_string();
            let row = NewChild {
                id: &new_id,
                parent_id: &parent_owned,
                name: &name_owned,
                age,
                avatar: avatar_owned.as_deref(),
                created_at: Utc::now().naive_utc(),
            };
            diesel::insert_into(c::children).values(&row).execute(conn)?;
            Ok(c::children
                .filter(c::id.eq(&new_id))
                .first::<models::Child>(conn)?
                .into_domain())
        })
        .await
    }

    pub async fn list_children(&self, parent_id: &str) -> Result<Vec<domain::Child>, StorageError> {
        use schema::children::dsl as c;
        let parent_owned = parent_id.to_string();
        self.with_conn(move |conn| {
            Ok(c::children
                .filter(c::parent_id.eq(&parent_owned))
                .order((c::name.asc(), c::created_at.asc()))
                .load::<models::Child>(conn)?
                .into_iter()
                .map(models::Child::into_domain)
                .collect())
        })
        .await
    }

    pub async fn get_child(&self, child_id: &str) -> Result<Option<domain::Child>, StorageError> {
        use schema::children::dsl as c;
        let child_owned = child_id.to_string();
        self.with_conn(move |conn| {
            Ok(c::children
                .filter(c::id.eq(&child_owned))
                .first::<models::Child>(conn)
                .optional()?
                .map(models::Child::into_domain))
        })
        .await
    }

    /// Returns the updated record, or `None` when the child does not exist.
    pub async fn update_child(
        &self,
        child_id: &str,
        changes: ChildChanges,
    ) -> Result<Option<domain::Child>, StorageError> {
        use schema::children::dsl as c;
        let child_owned = child_id.to_string();
        self.with_conn(move |conn| {
            if !changes.is_empty() {
                diesel::update(c::children.filter(c::id.eq(&child_owned)))
                    .set(&changes)
                    .execute(conn)?;
            }
            Ok(c::children
                .filter(c::id.eq(&child_owned))
                .first::<models::Child>(conn)
                .optional()?
                .map(models::Child::into_domain))
        })
        .await
    }

    pub async fn delete_child(&self, child_id: &str) -> Result<bool, StorageError> {
        use schema::children::dsl as c;
        let child_owned = child_id.to_string();
        self.with_conn(move |conn| {
            let deleted = diesel::delete(c::children.filter(c::id.eq(&child_owned))).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    // Activities

    #[allow(clippy::too_many_arguments)]
    pub async fn add_activity(
        &self,
        parent_id: &str,
        name: &str,
        category: &str,
        description: Option<&str>,
        min_age: Option<i32>,
        max_age: Option<i32>,
        duration: Option<i32>,
        image_url: Option<&str>,
    ) -> Result<domain::Activity, StorageError> {
        use schema::activities::dsl as a;
        let parent_owned = parent_id.to_string();
        let name_owned = name.to_string();
        let category_owned = category.to_string();
        let description_owned = description.map(|s| s.to_string());
        let image_owned = image_url.map(|s| s.to_string());
        self.with_conn(move |conn| {
            let new_id = uuid::Uuid::new_v4().to_string();
            let row = NewActivity {
                id: &new_id,
                parent_id: &parent_owned,
                name: &name_owned,
                description: description_owned.as_deref(),
                category: &category_owned,
                min_age,
                max_age,
                duration,
                is_custom: parent_owned != CURATED_OWNER,
                image_url: image_owned.as_deref(),
                created_at: Utc::now().naive_utc(),
            };
            diesel::insert_into(a::activities).values(&row).execute(conn)?;
            Ok(a::activities
                .filter(a::id.eq(&new_id))
                .first::<models::Activity>(conn)?
                .into_domain())
        })
        .await
    }

    /// With an owner, returns that owner's activities plus the curated ones;
    /// without, returns everything.
    pub async fn list_activities(
        &self,
        parent_id: Option<&str>,
    ) -> Result<Vec<domain::Activity>, StorageError> {
        use schema::activities::dsl as a;
        let parent_owned = parent_id.map(|s| s.to_string());
        self.with_conn(move |conn| {
            let mut query = a::activities.into_boxed();
            if let Some(p) = parent_owned {
                query = query.filter(a::parent_id.eq_any(vec![p, CURATED_OWNER.to_string()]));
            }
            Ok(query
                .order((a::name.asc(), a::created_at.asc()))
                .load::<models::Activity>(conn)?
                .into_iter()
                .map(models::Activity::into_domain)
                .collect())
        })
        .await
    }

    pub async fn get_activity(
        &self,
        activity_id: &str,
    ) -> Result<Option<domain::Activity>, StorageError> {
        use schema::activities::dsl as a;
        let activity_owned = activity_id.to_string();
        self.with_conn(move |conn| {
            Ok(a::activities
                .filter(a::id.eq(&activity_owned))
                .first::<models::Activity>(conn)
                .optional()?
                .map(models::Activity::into_domain))
        })
        .await
    }

    pub async fn update_activity(
        &self,
        activity_id: &str,
        changes: ActivityChanges,
    ) -> Result<Option<domain::Activity>, StorageError> {
        use schema::activities::dsl as a;
        let activity_owned = activity_id.to_string();
        self.with_conn(move |conn| {
            if !changes.is_empty() {
                diesel::update(a::activities.filter(a::id.eq(&activity_owned)))
                    .set(&changes)
                    .execute(conn)?;
            }
            Ok(a::activities
                .filter(a::id.eq(&activity_owned))
                .first::<models::Activity>(conn)
                .optional()?
                .map(models::Activity::into_domain))
        })
        .await
    }

    pub async fn delete_activity(&self, activity_id: &str) -> Result<bool, StorageError> {
        use schema::activities::dsl as a;
        let activity_owned = activity_id.to_string();
        self.with_conn(move |conn| {
            let deleted =
                diesel::delete(a::activities.filter(a::id.eq(&activity_owned))).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    // Timers

    pub async fn insert_timer(&self, new: NewTimer) -> Result<domain::Timer, StorageError> {
        use models::NewTimerRow;
        use schema::timers::dsl as t;
        if new.initial_duration < 1 {
            return Err(StorageError::InvalidInput(format!(
                "initial_duration must be >= 1, got {}",
                new.initial_duration
            )));
        }
        self.with_conn(move |conn| {
            let new_id = uuid::Uuid::new_v4().to_string();
            let now = Utc::now().naive_utc();
            let row = NewTimerRow {
                id: &new_id,
                parent_id: &new.parent_id,
                child_id: &new.child_id,
                initial_duration: new.initial_duration,
                remaining_time: new.remaining_time,
                status: new.status.as_str(),
                start_time: new.start_time.naive_utc(),
                created_at: now,
                updated_at: now,
            };
            diesel::insert_into(t::timers).values(&row).execute(conn)?;
            trace!(timer_id = %new_id, child_id = %new.child_id, "timer row inserted");
            t::timers
                .filter(t::id.eq(&new_id))
                .first::<models::Timer>(conn)?
                .into_domain()
        })
        .await
    }

    pub async fn list_timers(
        &self,
        parent_id: &str,
        child_id: Option<&str>,
    ) -> Result<Vec<domain::Timer>, StorageError> {
        use schema::timers::dsl as t;
        let parent_owned = parent_id.to_string();
        let child_owned = child_id.map(|s| s.to_string());
        self.with_conn(move |conn| {
            let mut query = t::timers
                .filter(t::parent_id.eq(parent_owned))
                .into_boxed();
            if let Some(cid) = child_owned {
                query = query.filter(t::child_id.eq(cid));
            }
            query
                .order(t::created_at.asc())
                .load::<models::Timer>(conn)?
                .into_iter()
                .map(models::Timer::into_domain)
                .collect()
        })
        .await
    }

    pub async fn get_timer(&self, timer_id: &str) -> Result<Option<domain::Timer>, StorageError> {
        use schema::timers::dsl as t;
        let timer_owned = timer_id.to_string();
        self.with_conn(move |conn| {
            t::timers
                .filter(t::id.eq(&timer_owned))
                .first::<models::Timer>(conn)
                .optional()?
                .map(models::Timer::into_domain)
                .transpose()
        })
        .await
    }

    /// Applies `update` and refreshes `updated_at`. Returns `false` when no
    /// row matched.
    pub async fn apply_timer_update(
        &self,
        timer_id: &str,
        update: TimerUpdate,
    ) -> Result<bool, StorageError> {
        use models::TimerChanges;
        use schema::timers::dsl as t;
        if let Some(r) = update.remaining_time
            && r < 0
        {
            return Err(StorageError::InvalidInput(format!(
                "remaining_time must be >= 0, got {r}"
            )));
        }
        let timer_owned = timer_id.to_string();
        self.with_conn(move |conn| {
            let changes = TimerChanges {
                remaining_time: update.remaining_time,
                status: update.status.map(|s| s.as_str().to_string()),
                end_time: update.end_time.map(|e| e.naive_utc()),
                activity_suggestion_id: update.activity_suggestion_id,
                updated_at: Utc::now().naive_utc(),
            };
            let target = t::timers.filter(t::id.eq(&timer_owned));
            let updated = if update.progress_only {
                let floor = update.remaining_time.unwrap_or(0);
                diesel::update(
                    target
                        .filter(t::status.eq(domain::TimerStatus::Active.as_str()))
                        .filter(t::remaining_time.ge(floor)),
                )
                .set(&changes)
                .execute(conn)?
            } else {
                diesel::update(target).set(&changes).execute(conn)?
            };
            Ok(updated > 0)
        })
        .await
    }

    pub async fn remove_timer(&self, timer_id: &str) -> Result<bool, StorageError> {
        use schema::timers::dsl as t;
        let timer_owned = timer_id.to_string();
        self.with_conn(move |conn| {
            let deleted = diesel::delete(t::timers.filter(t::id.eq(&timer_owned))).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    // Session helpers for JWT inactivity windows
    pub async fn create_session(&self, jti_: &str, uid_: &str) -> Result<(), StorageError> {
        use schema::sessions;
        let j = jti_.to_string();
        let u = uid_.to_string();
        self.with_conn(move |conn| {
            let new = NewSession { jti: &j, uid: &u };
            diesel::insert_into(sessions::table)
                .values(&new)
                .on_conflict_do_nothing()
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Touch session atomically, but only if it hasn't expired.
    /// Returns `true` if the session was found and updated, `false` otherwise.
    pub async fn touch_session_with_cutoff(
        &self,
        jti_: &str,
        cutoff: NaiveDateTime,
    ) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let j = jti_.to_string();
        self.with_conn(move |conn| {
            let now = Utc::now().naive_utc();
            let updated =
                diesel::update(sessions.filter(jti.eq(&j)).filter(last_used_at.ge(cutoff)))
                    .set(last_used_at.eq(now))
                    .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }
}

fn utc(naive: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)
}

impl models::User {
    fn into_domain(self) -> domain::UserProfile {
        domain::UserProfile {
            uid: self.uid,
            email: self.email,
            display_name: self.display_name,
            photo_url: self.photo_url,
            created_at: utc(self.created_at),
        }
    }
}

impl models::Child {
    fn into_domain(self) -> domain::Child {
        domain::Child {
            id: self.id,
            parent_id: self.parent_id,
            name: self.name,
            age: self.age,
            avatar: self.avatar,
            created_at: utc(self.created_at),
        }
    }
}

impl models::Activity {
    fn into_domain(self) -> domain::Activity {
        domain::Activity {
            id: self.id,
            parent_id: self.parent_id,
            name: self.name,
            description: self.description,
            category: self.category,
            min_age: self.min_age,
            max_age: self.max_age,
            duration: self.duration,
            is_custom: self.is_custom,
            image_url: self.image_url,
            created_at: utc(self.created_at),
        }
    }
}

impl models::Timer {
    fn into_domain(self) -> Result<domain::Timer, StorageError> {
        let status = self
            .status
            .parse::<domain::TimerStatus>()
            .map_err(|e| StorageError::InvalidRecord(format!("timer {}: {e}", self.id)))?;
        let timer = domain::Timer {
            id: self.id,
            parent_id: self.parent_id,
            child_id: self.child_id,
            initial_duration: self.initial_duration,
            remaining_time: self.remaining_time,
            status,
            start_time: utc(self.start_time),
            end_time: self.end_time.map(utc),
            activity_suggestion_id: self.activity_suggestion_id,
            created_at: utc(self.created_at),
            updated_at: utc(self.updated_at),
        };
        if !(0..=timer.total_seconds()).contains(&timer.remaining_time) {
            return Err(StorageError::InvalidRecord(format!(
                "timer {}: remaining_time {} outside 0..={}",
                timer.id,
                timer.remaining_time,
                timer.total_seconds()
            )));
        }
        Ok(timer)
    }
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    Ok(())
}
