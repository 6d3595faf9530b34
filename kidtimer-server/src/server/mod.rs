mod acl;
pub mod auth;
mod config;
mod dashboard;
mod roster;
mod timers;

use crate::engine::{TimerEngine, TimerError};
use crate::server::auth::AuthCtx;
use crate::storage::{StorageError, Store};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Extension, State},
    http::{Method, StatusCode, header},
    routing::{get, post, put},
};
use bcrypt::verify;
pub use config::{AppConfig, ConfigError, TimerConfig, UserConfig};
use kidtimer_shared::api;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

pub type Engine = TimerEngine<Store>;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    pub engine: Engine,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store) -> Self {
        let engine = TimerEngine::new(store.clone(), config.timers.engine_settings());
        Self {
            config,
            store,
            engine,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelled when the server starts shutting down; ends open event streams.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route("/api/v1/me", get(api_me))
        .route("/api/v1/dashboard", get(dashboard::api_dashboard))
        .route(
            "/api/v1/children",
            get(roster::api_list_children).post(roster::api_add_child),
        )
        .route(
            "/api/v1/children/{id}",
            put(roster::api_update_child).delete(roster::api_delete_child),
        )
        .route(
            "/api/v1/activities",
            get(roster::api_list_activities).post(roster::api_add_activity),
        )
        .route(
            "/api/v1/activities/{id}",
            put(roster::api_update_activity).delete(roster::api_delete_activity),
        )
        .route(
            "/api/v1/timers",
            get(timers::api_list_timers).post(timers::api_start_timer),
        )
        .route("/api/v1/timers/events", get(timers::api_timer_events))
        .route(
            "/api/v1/timers/{id}",
            axum::routing::delete(timers::api_cancel_timer),
        )
        .route("/api/v1/timers/{id}/pause", post(timers::api_pause_timer))
        .route("/api/v1/timers/{id}/resume", post(timers::api_resume_timer))
        .with_state(state.clone())
        .layer(middleware::from_fn(set_auth_span_fields))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            uid = tracing::field::Empty,
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/v1/version", get(api_version))
        .route("/api/v1/auth/login", post(api_auth_login))
        .merge(private)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured
    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn api_version() -> Json<api::VersionInfoDto> {
    Json(api::VersionInfoDto {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let path = req.uri().path().to_string();
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("SAMEORIGIN"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("same-origin"),
    );

    // Disable caching for API and health endpoints
    if path == "/healthz" || path.starts_with("/api/") {
        headers.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
    }

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        Span::current().record("uid", tracing::field::display(auth.parent_id()));
    }
    Ok(next.run(req).await)
}

async fn api_auth_login(
    State(state): State<AppState>,
    Json(body): Json<api::AuthReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let user = state
        .config
        .find_user_by_email(&body.email)
        .ok_or_else(|| {
            tracing::warn!(email=%body.email, "login: unknown email");
            AppError::unauthorized()
        })?;
    if !verify(&body.password, &user.password_hash).map_err(|e| {
        tracing::error!(email=%body.email, error=%e, "login: bcrypt verify failed");
        AppError::internal(e)
    })? {
        tracing::warn!(email=%body.email, "login: invalid password");
        return Err(AppError::unauthorized());
    }
    state
        .store
        .ensure_user_profile(&user.uid, &user.email)
        .await?;
    let token = auth::issue_jwt_for_user(&state, &user.uid, &user.email).await?;
    tracing::info!(uid = %user.uid, "login: token issued");
    Ok(Json(api::AuthResp { token }))
}

async fn api_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::UserProfileDto>, AppError> {
    let profile = state
        .store
        .ensure_user_profile(auth.parent_id(), &auth.claims.email)
        .await?;
    Ok(Json(profile.into()))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    Conflict(String),
    /// Storage failed; the request may be retried.
    Unavailable(String),
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn unauthorized() -> Self {
        Self::Unauthorized
    }
    fn forbidden() -> Self {
        Self::Forbidden
    }
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidInput(m) => AppError::BadRequest(m),
            StorageError::Database(_) | StorageError::Pool(_) | StorageError::Task(_) => {
                AppError::Unavailable(e.to_string())
            }
            StorageError::Migration(_) | StorageError::InvalidRecord(_) => AppError::internal(e),
        }
    }
}

impl From<TimerError> for AppError {
    fn from(e: TimerError) -> Self {
        match e {
            TimerError::Validation(m) => AppError::BadRequest(m),
            TimerError::NotFound(_) => AppError::NotFound(e.to_string()),
            TimerError::InvalidTransition { .. } => AppError::Conflict(e.to_string()),
            TimerError::Creation(_) | TimerError::Persistence(_) => {
                AppError::Unavailable(e.to_string())
            }
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".into(),
                "unauthorized",
                None,
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".into(), "forbidden", None),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m, "conflict", None),
            AppError::Unavailable(m) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "storage unavailable, try again".into(),
                "unavailable",
                Some(m),
            ),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::warn!(status = %status, kind = kind, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg });
        (status, body).into_response()
    }
}
