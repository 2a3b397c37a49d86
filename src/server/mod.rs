//! HTTP/JSON surface of the device flow.
//!
//! [`router`] carries the two endpoints the CLI talks to. The approval
//! endpoints in [`approval_router`] act for an already-authenticated human
//! and must only be mounted behind the identity layer that vouches for them.

pub mod error;

pub use error::ApiError;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::KeygateConfig;
use crate::device::{
    ApprovalView, ApproveRequest, DeviceAuthService, ErrorCode, PollOutcome, PollRequest,
    PollResponse, StartRequest,
};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DeviceAuthService>,
}

/// Public endpoints: `POST /device/start`, `POST /device/poll`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/device/start", post(start))
        .route("/device/poll", post(poll))
        .with_state(state)
}

/// Approval endpoints: `GET /device/approve/{user_code}`, `POST /device/approve`.
pub fn approval_router(state: AppState) -> Router {
    Router::new()
        .route("/device/approve", post(approve))
        .route("/device/approve/{user_code}", get(lookup))
        .with_state(state)
}

/// Bind `config.bind` and serve until `shutdown` fires.
pub async fn serve(
    config: &KeygateConfig,
    service: Arc<DeviceAuthService>,
    with_approval: bool,
    shutdown: CancellationToken,
) -> crate::error::Result<()> {
    let state = AppState { service };
    let mut app = router(state.clone());
    if with_approval {
        app = app.merge(approval_router(state));
    }

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(addr = %listener.local_addr()?, with_approval, "keygate listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Store calls may hit the filesystem; keep them off the async workers.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&DeviceAuthService) -> Result<T, ApiError> + Send + 'static,
{
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || f(&service)).await?
}

fn bad_request(rejection: JsonRejection) -> ApiError {
    tracing::debug!(error = %rejection, "rejected request body");
    ApiError::Domain(StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest)
}

async fn start(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    // An empty body is an anonymous start.
    let request: StartRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StartRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|err| {
            tracing::debug!(error = %err, "rejected start body");
            ApiError::Domain(StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest)
        })?
    };
    let started = blocking(&state, move |svc| {
        Ok(svc.start(request.client_name.as_deref())?)
    })
    .await?;
    Ok(Json(started).into_response())
}

async fn poll(
    State(state): State<AppState>,
    body: Result<Json<PollRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Ok(Json(request)) = body else {
        // Malformed bodies are answered like unknown codes.
        return Ok(poll_response(PollOutcome::InvalidCode));
    };
    let outcome = blocking(&state, move |svc| Ok(svc.poll(&request.device_code)?)).await?;
    Ok(poll_response(outcome))
}

fn poll_response(outcome: PollOutcome) -> Response {
    let status = match outcome {
        PollOutcome::InvalidCode => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };
    (status, Json(PollResponse::from(outcome))).into_response()
}

async fn approve(
    State(state): State<AppState>,
    body: Result<Json<ApproveRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(bad_request)?;
    let approved = blocking(&state, move |svc| Ok(svc.approve(&request.user_code)?)).await?;
    Ok(Json(approved).into_response())
}

#[derive(Serialize)]
struct LookupBody {
    user_code: String,
    client_name: Option<String>,
    status: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

impl From<ApprovalView> for LookupBody {
    fn from(view: ApprovalView) -> Self {
        Self {
            user_code: view.user_code,
            client_name: view.client_name,
            status: view.status.to_string(),
            expires_at: view.expires_at,
        }
    }
}

async fn lookup(
    State(state): State<AppState>,
    Path(user_code): Path<String>,
) -> Result<Response, ApiError> {
    let view = blocking(&state, move |svc| Ok(svc.lookup(&user_code)?)).await?;
    match view {
        Some(view) => Ok(Json(LookupBody::from(view)).into_response()),
        None => Err(ApiError::Domain(
            StatusCode::NOT_FOUND,
            ErrorCode::UnknownUserCode,
        )),
    }
}
