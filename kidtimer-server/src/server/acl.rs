//! Ownership rules for roster and catalog records.
//!
//! Records owned by another parent are reported as missing so ids do not
//! leak across accounts. Curated activities are visible to everyone and
//! writable by no one.

use kidtimer_shared::domain::{Activity, Child};

use super::{AppError, AppState, auth::AuthCtx};

fn check_child(parent_id: &str, child: &Child) -> Result<(), AppError> {
    if child.parent_id == parent_id {
        Ok(())
    } else {
        tracing::warn!(parent_id, child_id = %child.id, "ACL: child owned by another parent");
        Err(AppError::not_found(format!("child not found: {}", child.id)))
    }
}

fn check_activity_write(parent_id: &str, activity: &Activity) -> Result<(), AppError> {
    if activity.is_curated() {
        tracing::warn!(parent_id, activity_id = %activity.id, "ACL: curated activity is read-only");
        return Err(AppError::forbidden());
    }
    if activity.parent_id != parent_id {
        tracing::warn!(parent_id, activity_id = %activity.id, "ACL: activity owned by another parent");
        return Err(AppError::not_found(format!(
            "activity not found: {}",
            activity.id
        )));
    }
    Ok(())
}

pub async fn owned_child(state: &AppState, auth: &AuthCtx, id: &str) -> Result<Child, AppError> {
    let child = state
        .store
        .get_child(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("child not found: {id}")))?;
    check_child(auth.parent_id(), &child)?;
    Ok(child)
}

pub async fn writable_activity(
    state: &AppState,
    auth: &AuthCtx,
    id: &str,
) -> Result<Activity, AppError> {
    let activity = state
        .store
        .get_activity(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("activity not found: {id}")))?;
    check_activity_write(auth.parent_id(), &activity)?;
    Ok(activity)
}
