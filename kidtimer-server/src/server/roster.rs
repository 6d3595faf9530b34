//! Children and activity catalog handlers.

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
};
use kidtimer_shared::api::{
    ActivityDto, ChildDto, NewActivityReq, NewChildReq, UpdateActivityReq, UpdateChildReq,
};

use super::{AppError, AppState, acl, auth::AuthCtx};
use crate::storage::models::{ActivityChanges, ChildChanges};

const CHILD_NAME_REQUIRED: &str = "Child name is required.";
const ACTIVITY_FIELDS_REQUIRED: &str = "Activity name and category are required.";

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

fn validate_age(age: Option<i32>) -> Result<(), AppError> {
    match age {
        Some(a) if a < 0 => Err(AppError::bad_request("age must not be negative")),
        _ => Ok(()),
    }
}

fn validate_activity_bounds(
    min_age: Option<i32>,
    max_age: Option<i32>,
    duration: Option<i32>,
) -> Result<(), AppError> {
    validate_age(min_age)?;
    validate_age(max_age)?;
    if let (Some(lo), Some(hi)) = (min_age, max_age)
        && lo > hi
    {
        return Err(AppError::bad_request("min_age must not exceed max_age"));
    }
    if let Some(d) = duration
        && d < 1
    {
        return Err(AppError::bad_request("duration must be at least 1 minute"));
    }
    Ok(())
}

fn trimmed(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string())
}

pub async fn api_list_children(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<ChildDto>>, AppError> {
    let rows = state.store.list_children(auth.parent_id()).await?;
    Ok(Json(rows.into_iter().map(ChildDto::from).collect()))
}

pub async fn api_add_child(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<NewChildReq>,
) -> Result<(StatusCode, Json<ChildDto>), AppError> {
    if is_blank(&body.name) {
        return Err(AppError::bad_request(CHILD_NAME_REQUIRED));
    }
    validate_age(body.age)?;
    let child = state
        .store
        .add_child(
            auth.parent_id(),
            body.name.trim(),
            body.age,
            body.avatar.as_deref(),
        )
        .await?;
    tracing::info!(child_id = %child.id, "child added");
    Ok((StatusCode::CREATED, Json(child.into())))
}

pub async fn api_update_child(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
    Json(body): Json<UpdateChildReq>,
) -> Result<Json<ChildDto>, AppError> {
    acl::owned_child(&state, &auth, &id).await?;
    if body.name.as_deref().is_some_and(is_blank) {
        return Err(AppError::bad_request(CHILD_NAME_REQUIRED));
    }
    validate_age(body.age)?;
    let changes = ChildChanges {
        name: trimmed(body.name),
        age: body.age,
        avatar: body.avatar,
    };
    let child = state
        .store
        .update_child(&id, changes)
        .await?
        .ok_or_else(|| AppError::not_found(format!("child not found: {id}")))?;
    Ok(Json(child.into()))
}

pub async fn api_delete_child(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    acl::owned_child(&state, &auth, &id).await?;
    if !state.store.delete_child(&id).await? {
        return Err(AppError::not_found(format!("child not found: {id}")));
    }
    tracing::info!(child_id = %id, "child deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn api_list_activities(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<ActivityDto>>, AppError> {
    let rows = state.store.list_activities(Some(auth.parent_id())).await?;
    Ok(Json(rows.into_iter().map(ActivityDto::from).collect()))
}

pub async fn api_add_activity(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<NewActivityReq>,
) -> Result<(StatusCode, Json<ActivityDto>), AppError> {
    if is_blank(&body.name) || is_blank(&body.category) {
        return Err(AppError::bad_request(ACTIVITY_FIELDS_REQUIRED));
    }
    validate_activity_bounds(body.min_age, body.max_age, body.duration)?;
    let activity = state
        .store
        .add_activity(
            auth.parent_id(),
            body.name.trim(),
            body.category.trim(),
            body.description.as_deref(),
            body.min_age,
            body.max_age,
            body.duration,
            body.image_url.as_deref(),
        )
        .await?;
    tracing::info!(activity_id = %activity.id, "activity added");
    Ok((StatusCode::CREATED, Json(activity.into())))
}

pub async fn api_update_activity(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
    Json(body): Json<UpdateActivityReq>,
) -> Result<Json<ActivityDto>, AppError> {
    let current = acl::writable_activity(&state, &auth, &id).await?;
    if body.name.as_deref().is_some_and(is_blank) || body.category.as_deref().is_some_and(is_blank)
    {
        return Err(AppError::bad_request(ACTIVITY_FIELDS_REQUIRED));
    }
    // Bounds are checked against the merged record.
    validate_activity_bounds(
        body.min_age.or(current.min_age),
        body.max_age.or(current.max_age),
        body.duration.or(current.duration),
    )?;
    let changes = ActivityChanges {
        name: trimmed(body.name),
        description: body.description,
        category: trimmed(body.category),
        min_age: body.min_age,
        max_age: body.max_age,
        duration: body.duration,
        image_url: body.image_url,
    };
    let activity = state
        .store
        .update_activity(&id, changes)
        .await?
        .ok_or_else(|| AppError::not_found(format!("activity not found: {id}")))?;
    Ok(Json(activity.into()))
}

pub async fn api_delete_activity(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    acl::writable_activity(&state, &auth, &id).await?;
    if !state.store.delete_activity(&id).await? {
        return Err(AppError::not_found(format!("activity not found: {id}")));
    }
    tracing::info!(activity_id = %id, "activity deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_bounds() {
        assert!(validate_activity_bounds(Some(3), Some(8), Some(20)).is_ok());
        assert!(validate_activity_bounds(None, None, None).is_ok());
        assert!(validate_activity_bounds(Some(9), Some(8), None).is_err());
        assert!(validate_activity_bounds(None, None, Some(0)).is_err());
        assert!(validate_activity_bounds(Some(-1), None, None).is_err());
    }
}
