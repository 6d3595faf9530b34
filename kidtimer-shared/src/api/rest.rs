//! Minimal REST client helpers for consumers (clients).

use super::endpoints as ep;
use super::*;
use once_cell::sync::Lazy;
use std::time::Duration;

pub use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("http: {0}")]
    Http(String),
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("serde: {0}")]
    Serde(String),
}

impl RestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .tcp_keepalive(Some(Duration::from_secs(180)))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(180))
        .timeout(Duration::from_secs(60))
        .build()
        .expect("failed to build HTTP client")
});

fn mk_client() -> reqwest::Client {
    HTTP_CLIENT.clone()
}

async fn handle_json<T: for<'de> serde::Deserialize<'de>>(
    res: reqwest::Response,
) -> Result<T, RestError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(RestError::Status {
            status: status.as_u16(),
            body,
        });
    }
    res.json::<T>()
        .await
        .map_err(|e| RestError::Serde(e.to_string()))
}

async fn handle_empty(res: reqwest::Response) -> Result<(), RestError> {
    if res.status().is_success() {
        Ok(())
    } else {
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        Err(RestError::Status { status, body })
    }
}

async fn send(req: reqwest::RequestBuilder) -> Result<reqwest::Response, RestError> {
    req.send().await.map_err(|e| RestError::Http(e.to_string()))
}

pub async fn login(base: &str, req: &AuthReq) -> Result<AuthResp, RestError> {
    let res = send(mk_client().post(ep::auth_login(base)).json(req)).await?;
    handle_json(res).await
}

pub async fn server_version(base: &str) -> Result<VersionInfoDto, RestError> {
    let res = send(mk_client().get(ep::version(base))).await?;
    handle_json(res).await
}

pub async fn me(base: &str, bearer: &str) -> Result<UserProfileDto, RestError> {
    let res = send(mk_client().get(ep::me(base)).bearer_auth(bearer)).await?;
    handle_json(res).await
}

pub async fn dashboard(base: &str, bearer: &str) -> Result<DashboardDto, RestError> {
    let res = send(mk_client().get(ep::dashboard(base)).bearer_auth(bearer)).await?;
    handle_json(res).await
}

pub async fn list_children(base: &str, bearer: &str) -> Result<Vec<ChildDto>, RestError> {
    let res = send(mk_client().get(ep::children(base)).bearer_auth(bearer)).await?;
    handle_json(res).await
}

pub async fn add_child(base: &str, bearer: &str, req: &NewChildReq) -> Result<ChildDto, RestError> {
    let res = send(
        mk_client()
            .post(ep::children(base))
            .bearer_auth(bearer)
            .json(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn update_child(
    base: &str,
    bearer: &str,
    child_id: &str,
    req: &UpdateChildReq,
) -> Result<ChildDto, RestError> {
    let res = send(
        mk_client()
            .put(ep::child(base, child_id))
            .bearer_auth(bearer)
            .json(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn delete_child(base: &str, bearer: &str, child_id: &str) -> Result<(), RestError> {
    let res = send(
        mk_client()
            .delete(ep::child(base, child_id))
            .bearer_auth(bearer),
    )
    .await?;
    handle_empty(res).await
}

pub async fn list_activities(base: &str, bearer: &str) -> Result<Vec<ActivityDto>, RestError> {
    let res = send(mk_client().get(ep::activities(base)).bearer_auth(bearer)).await?;
    handle_json(res).await
}

pub async fn add_activity(
    base: &str,
    bearer: &str,
    req: &NewActivityReq,
) -> Result<ActivityDto, RestError> {
    let res = send(
        mk_client()
            .post(ep::activities(base))
            .bearer_auth(bearer)
            .json(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn update_activity(
    base: &str,
    bearer: &str,
    activity_id: &str,
    req: &UpdateActivityReq,
) -> Result<ActivityDto, RestError> {
    let res = send(
        mk_client()
            .put(ep::activity(base, activity_id))
            .bearer_auth(bearer)
            .json(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn delete_activity(
    base: &str,
    bearer: &str,
    activity_id: &str,
) -> Result<(), RestError> {
    let res = send(
        mk_client()
            .delete(ep::activity(base, activity_id))
            .bearer_auth(bearer),
    )
    .await?;
    handle_empty(res).await
}

pub async fn list_timers(
    base: &str,
    bearer: &str,
    child_id: Option<&str>,
) -> Result<Vec<TimerDto>, RestError> {
    let url = match child_id {
        Some(cid) => ep::timers_for_child(base, cid),
        None => ep::timers(base),
    };
    let res = send(mk_client().get(url).bearer_auth(bearer)).await?;
    handle_json(res).await
}

pub async fn start_timer(
    base: &str,
    bearer: &str,
    req: &StartTimerReq,
) -> Result<TimerDto, RestError> {
    let res = send(
        mk_client()
            .post(ep::timers(base))
            .bearer_auth(bearer)
            .json(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn pause_timer(base: &str, bearer: &str, timer_id: &str) -> Result<TimerDto, RestError> {
    let res = send(
        mk_client()
            .post(ep::timer_pause(base, timer_id))
            .bearer_auth(bearer),
    )
    .await?;
    handle_json(res).await
}

pub async fn resume_timer(
    base: &str,
    bearer: &str,
    timer_id: &str,
) -> Result<TimerDto, RestError> {
    let res = send(
        mk_client()
            .post(ep::timer_resume(base, timer_id))
            .bearer_auth(bearer),
    )
    .await?;
    handle_json(res).await
}

pub async fn cancel_timer(base: &str, bearer: &str, timer_id: &str) -> Result<(), RestError> {
    let res = send(
        mk_client()
            .delete(ep::timer(base, timer_id))
            .bearer_auth(bearer),
    )
    .await?;
    handle_empty(res).await
}
