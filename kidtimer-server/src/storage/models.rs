use crate::storage::schema::{activities, children, sessions, timers, users};
use chrono::NaiveDateTime;
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = users)]
#[diesel(primary_key(uid))]
pub struct User {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub uid: &'a str,
    pub email: &'a str,
    pub display_name: &'a str,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = children)]
pub struct Child {
    pub id: String,
    pub parent_id: String,
    pub name: String,
    pub age: Option<i32>,
    pub avatar: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = children)]
pub struct NewChild<'a> {
    pub id: &'a str,
    pub parent_id: &'a str,
    pub name: &'a str,
    pub age: Option<i32>,
    pub avatar: Option<&'a str>,
    pub created_at: NaiveDateTime,
}

/// `None` fields are skipped by Diesel, which gives partial-update semantics.
#[derive(Debug, Default, Clone, AsChangeset)]
#[diesel(table_name = children)]
pub struct ChildChanges {
    pub name: Option<String>,
    pub age: Option<i32>,
    pub avatar: Option<String>,
}

impl ChildChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.age.is_none() && self.avatar.is_none()
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = activities)]
pub struct Activity {
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
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = activities)]
pub struct NewActivity<'a> {
    pub id: &'a str,
    pub parent_id: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub category: &'a str,
    pub min_age: Option<i32>,
    pub max_age: Option<i32>,
    pub duration: Option<i32>,
    pub is_custom: bool,
    pub image_url: Option<&'a str>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Default, Clone, AsChangeset)]
#[diesel(table_name = activities)]
pub struct ActivityChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub min_age: Option<i32>,
    pub max_age: Option<i32>,
    pub duration: Option<i32>,
    pub image_url: Option<String>,
}

impl ActivityChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.min_age.is_none()
            && self.max_age.is_none()
            && self.duration.is_none()
            && self.image_url.is_none()
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = timers)]
pub struct Timer {
    pub id: String,
    pub parent_id: String,
    pub child_id: String,
    pub initial_duration: i32,
    pub remaining_time: i32,
    pub status: String,
    pub start_time: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
    pub activity_suggestion_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = timers)]
pub struct NewTimerRow<'a> {
    pub id: &'a str,
    pub parent_id: &'a str,
    pub child_id: &'a str,
    pub initial_duration: i32,
    pub remaining_time: i32,
    pub status: &'a str,
    pub start_time: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = timers)]
pub struct TimerChanges {
    pub remaining_time: Option<i32>,
    pub status: Option<String>,
    pub end_time: Option<NaiveDateTime>,
    pub activity_suggestion_id: Option<String>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = sessions)]
#[diesel(primary_key(jti))]
pub struct Session {
    pub jti: String,
    pub uid: String,
    pub issued_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub jti: &'a str,
    pub uid: &'a str,
}
