use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use statehold_kernel::{KernelError, NewSession, SessionPatch};
use statehold_store::StoreError;

use crate::error::HostError;
use crate::http::HttpState;
use crate::modes::daemon::ControlMsg;

pub fn router() -> Router<HttpState> {
    Router::new()
        .route("/health", get(health))
        .route("/state", get(state_get))
        .route("/sessions", get(sessions_list).post(sessions_create))
        .route(
            "/sessions/{id}",
            get(session_get).put(session_update).delete(session_delete),
        )
        .route("/events", get(events_tail))
        .route("/crash", post(crash))
}

#[derive(Debug)]
pub enum ApiError {
    Host(HostError),
    Invalid(String),
}

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::Invalid(msg.into())
    }
}

impl From<HostError> for ApiError {
    fn from(err: HostError) -> Self {
        ApiError::Host(err)
    }
}

impl From<KernelError> for ApiError {
    fn from(err: KernelError) -> Self {
        ApiError::Host(HostError::Kernel(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Invalid(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ApiError::Host(HostError::Kernel(err) | HostError::Boot(err)) => kernel_status(err),
            ApiError::Host(HostError::Transition { .. }) => (StatusCode::CONFLICT, "invalid_phase"),
            ApiError::Host(HostError::Http(_) | HostError::Control(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        let message = match self {
            ApiError::Invalid(msg) => msg,
            ApiError::Host(err) => err.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(code, "{message}");
        }
        let body = serde_json::json!({ "code": code, "message": message });
        (status, Json(body)).into_response()
    }
}

fn kernel_status(err: &KernelError) -> (StatusCode, &'static str) {
    match err {
        KernelError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        KernelError::Store(StoreError::NotFound { .. }) => (StatusCode::NOT_FOUND, "not_found"),
        KernelError::Store(StoreError::Corrupt { .. }) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "corrupt_record")
        }
        KernelError::Store(StoreError::Unavailable { .. }) | KernelError::EventLog { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
        }
        KernelError::Store(StoreError::Encode { .. }) | KernelError::EventEncode(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        }
    }
}

// Store calls below are synchronous and contain no await point, so a caller
// that disconnects mid-request either sees the rename committed or not started.

async fn health(State(state): State<HttpState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.ctx.health()?))
}

async fn state_get(State(state): State<HttpState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.ctx.state()?))
}

async fn sessions_create(
    State(state): State<HttpState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let input: NewSession = parse_body(&body)?;
    let session = state.ctx.sessions().create(input)?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn sessions_list(State(state): State<HttpState>) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.ctx.sessions().list()?;
    Ok(Json(serde_json::json!({
        "count": sessions.len(),
        "sessions": sessions,
    })))
}

async fn session_get(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.ctx.sessions().get(&id)?))
}

async fn session_update(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let patch: SessionPatch = parse_body(&body)?;
    Ok(Json(state.ctx.sessions().update(&id, patch)?))
}

async fn session_delete(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.ctx.sessions().delete(&id)?;
    Ok(Json(serde_json::json!({ "status": "deleted", "id": id })))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    limit: Option<usize>,
}

async fn events_tail(
    State(state): State<HttpState>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let tail = state.ctx.event_tail(query.limit)?;
    Ok(Json(serde_json::json!({
        "count": tail.total,
        "events": tail.events,
    })))
}

/// Record the crash, hand control to the daemon loop and never answer: the
/// process exits underneath this request and the caller sees the connection
/// drop.
async fn crash(State(state): State<HttpState>) -> Result<Response, ApiError> {
    let counters = state.ctx.trigger_crash()?;
    state
        .control_tx
        .send(ControlMsg::Crash {
            crash_count: counters.crash_count,
        })
        .await
        .map_err(|_| HostError::Control("crash recorded but the control loop is gone".into()))?;
    std::future::pending().await
}

/// An empty body means "all defaults".
fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("decode json: {e}")))
}
