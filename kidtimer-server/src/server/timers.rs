use std::convert::Infallible;

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt, future};
use kidtimer_shared::api::{StartTimerReq, TimerDto, TimerEvent, TimerListQuery};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

use super::{AppError, AppState, auth::AuthCtx};

pub async fn api_list_timers(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Query(q): Query<TimerListQuery>,
) -> Result<Json<Vec<TimerDto>>, AppError> {
    let timers = state
        .engine
        .list(auth.parent_id(), q.child_id.as_deref())
        .await?;
    Ok(Json(timers.into_iter().map(TimerDto::from).collect()))
}

pub async fn api_start_timer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Json(body): Json<StartTimerReq>,
) -> Result<(StatusCode, Json<TimerDto>), AppError> {
    let timer = state
        .engine
        .start(auth.parent_id(), &body.child_id, body.duration_minutes)
        .await?;
    Ok((StatusCode::CREATED, Json(timer.into())))
}

pub async fn api_pause_timer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<Json<TimerDto>, AppError> {
    let timer = state.engine.pause(auth.parent_id(), &id).await?;
    Ok(Json(timer.into()))
}

pub async fn api_resume_timer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<Json<TimerDto>, AppError> {
    let timer = state.engine.resume(auth.parent_id(), &id).await?;
    Ok(Json(timer.into()))
}

pub async fn api_cancel_timer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.engine.cancel(auth.parent_id(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Server-sent events for the signed-in parent's timers.
pub async fn api_timer_events(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let parent_id = auth.parent_id().to_string();
    // Make sure the parent's running timers are ticking before we listen.
    state.engine.load_parent(&parent_id).await?;
    let rx = state.engine.subscribe();
    tracing::debug!(uid = %parent_id, "sse: subscriber attached");

    let stream = BroadcastStream::new(rx)
        .filter_map(move |item| future::ready(to_sse(&parent_id, item)))
        .take_until(state.shutdown_token().cancelled_owned());
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse(
    parent_id: &str,
    item: Result<TimerEvent, BroadcastStreamRecvError>,
) -> Option<Result<Event, Infallible>> {
    match item {
        Ok(ev) if ev.parent_id() == parent_id => match Event::default().event(ev.kind()).json_data(&ev) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                tracing::warn!(error = %e, "sse: failed to encode event");
                None
            }
        },
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            tracing::warn!(skipped = n, "sse: subscriber lagged");
            None
        }
    }
}
