use std::collections::HashMap;

use axum::{
    Json,
    extract::{Extension, State},
};
use kidtimer_shared::api::{DashboardDto, DashboardTimerDto};
use kidtimer_shared::domain::{Activity, Child, Timer, UserProfile};

use super::{AppError, AppState, auth::AuthCtx};

/// Activities shown on the dashboard.
const DASHBOARD_ACTIVITIES: usize = 3;

pub async fn api_dashboard(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<DashboardDto>, AppError> {
    let parent_id = auth.parent_id();
    let user = state
        .store
        .ensure_user_profile(parent_id, &auth.claims.email)
        .await?;
    let children = state.store.list_children(parent_id).await?;
    let activities = state.store.list_activities(Some(parent_id)).await?;
    let timers = state.engine.list(parent_id, None).await?;
    Ok(Json(build(user, children, activities, timers)))
}

fn build(
    user: UserProfile,
    children: Vec<Child>,
    activities: Vec<Activity>,
    timers: Vec<Timer>,
) -> DashboardDto {
    let names: HashMap<&str, &str> = children
        .iter()
        .map(|c| (c.id.as_str(), c.name.as_str()))
        .collect();
    let active_timers = timers
        .into_iter()
        .filter(Timer::is_unfinished)
        .map(|t| DashboardTimerDto {
            child_name: names.get(t.child_id.as_str()).map(|n| n.to_string()),
            timer: t.into(),
        })
        .collect();
    DashboardDto {
        user: user.into(),
        children: children.into_iter().map(Into::into).collect(),
        activities: activities
            .into_iter()
            .take(DASHBOARD_ACTIVITIES)
            .map(Into::into)
            .collect(),
        active_timers,
    }
}
