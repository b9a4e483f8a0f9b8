//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the orchestrator for business logic.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::{
    body::Bytes,
    extract::{connect_info::ConnectInfo, DefaultBodyLimit, Path, Query, Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::response::{api_created, api_error, api_success};
use crate::api::AppState;
use crate::error::{BroadcastError, BroadcastResult};
use crate::protocol_constants::{MAX_UPLOAD_BYTES, SERVICE_ID};
use crate::services::model::default_language;
use crate::services::{BroadcastRequest, JobParams, JobType, PowerSwitch};

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

/// Targets as a single (possibly comma-separated) string or a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TargetList {
    One(String),
    Many(Vec<String>),
}

impl From<TargetList> for Vec<String> {
    fn from(targets: TargetList) -> Self {
        match targets {
            TargetList::One(token) => vec![token],
            TargetList::Many(tokens) => tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePreviewRequest {
    #[serde(rename = "type")]
    job_type: JobType,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    upload_id: Option<String>,
    targets: TargetList,
    #[serde(default)]
    end_targets: Option<TargetList>,
    #[serde(default)]
    auto_restore: Option<bool>,
}

impl CreatePreviewRequest {
    fn into_request(self) -> BroadcastResult<BroadcastRequest> {
        let params = match self.job_type {
            JobType::Text => {
                let text = self
                    .text
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        BroadcastError::InvalidRequest("text broadcasts need non-empty text".into())
                    })?;
                JobParams::Text {
                    text,
                    language: self.language.unwrap_or_else(default_language),
                }
            }
            JobType::Audio => {
                let upload_id = self.upload_id.filter(|id| !id.is_empty()).ok_or_else(|| {
                    BroadcastError::InvalidRequest("audio broadcasts need an uploadId".into())
                })?;
                JobParams::Audio { upload_id }
            }
        };

        Ok(BroadcastRequest {
            params,
            targets: self.targets.into(),
            end_targets: self.end_targets.map(Into::into),
            auto_restore: self.auto_restore,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PowerRequest {
    targets: TargetList,
    power: PowerSwitch,
}

#[derive(Debug, Deserialize)]
struct RestoreToggle {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    name: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
///
/// The router must be served with `ConnectInfo<SocketAddr>` for the client
/// allow-list to see peer addresses.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/devices", get(list_devices))
        .route("/api/groups", get(list_groups))
        .route("/api/devices/power", post(set_power))
        .route("/api/devices/all-off", post(all_off))
        .route("/api/devices/sync", post(sync_devices))
        .route(
            "/api/uploads",
            post(upload_audio).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/previews", get(list_previews).post(create_preview))
        .route("/api/previews/{id}", get(get_preview))
        .route("/api/previews/{id}/approve", post(approve_preview))
        .route("/api/previews/{id}/reject", post(reject_preview))
        .route("/api/queue", get(queue_status))
        .route("/api/queue/{id}", axum::routing::delete(remove_queued_job))
        .route(
            "/api/restore",
            get(restore_info)
                .put(set_restore_enabled)
                .delete(clear_restore_backups),
        )
        .route("/api/events", get(event_stream))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            client_allow_list,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Admission
// ─────────────────────────────────────────────────────────────────────────────

/// Whether a client address passes the allow-list.
///
/// An empty list admits everyone. Loopback clients are always admitted.
fn is_admitted(allowed: &[IpAddr], client: IpAddr) -> bool {
    let client = client.to_canonical();
    allowed.is_empty()
        || client.is_loopback()
        || allowed.iter().any(|ip| ip.to_canonical() == client)
}

async fn client_allow_list(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let admitted = is_admitted(&state.config.read().allowed_ips, remote_addr.ip());
    if admitted {
        return next.run(request).await;
    }
    log::warn!(
        "[HTTP] Rejected {} {} from {}",
        request.method(),
        request.uri().path(),
        remote_addr
    );
    BroadcastError::Forbidden(format!("client {} is not allowed", remote_addr.ip()))
        .into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe with a short engine summary.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let queue = state.orchestrator.queue_status();
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "devices": state.orchestrator.device_states().len(),
        "pendingPreviews": state.orchestrator.list_previews().len(),
        "queue": {
            "isPlaying": queue.is_playing,
            "pending": queue.pending.len()
        }
    }))
}

async fn not_found() -> impl IntoResponse {
    api_error(StatusCode::NOT_FOUND, "not_found", "No such route")
}

// ─────────────────────────────────────────────────────────────────────────────
// Devices
// ─────────────────────────────────────────────────────────────────────────────

async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    api_success(state.orchestrator.device_states())
}

async fn list_groups(State(state): State<AppState>) -> impl IntoResponse {
    api_success(state.orchestrator.groups())
}

async fn set_power(
    State(state): State<AppState>,
    Json(payload): Json<PowerRequest>,
) -> BroadcastResult<impl IntoResponse> {
    let targets: Vec<String> = payload.targets.into();
    let report = state
        .orchestrator
        .set_power(&targets, payload.power.into())
        .await?;
    Ok(api_success(report))
}

async fn all_off(State(state): State<AppState>) -> BroadcastResult<impl IntoResponse> {
    Ok(api_success(state.orchestrator.all_off().await?))
}

async fn sync_devices(State(state): State<AppState>) -> BroadcastResult<impl IntoResponse> {
    Ok(api_success(state.orchestrator.sync_devices().await?))
}

// ─────────────────────────────────────────────────────────────────────────────
// Previews
// ─────────────────────────────────────────────────────────────────────────────

/// Stores a raw audio body for a later audio preview.
async fn upload_audio(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> BroadcastResult<impl IntoResponse> {
    let name = query.name.unwrap_or_else(|| "upload".to_string());
    let upload_id = state.orchestrator.upload_audio(&name, body).await?;
    Ok(api_created(json!({ "uploadId": upload_id })))
}

async fn create_preview(
    State(state): State<AppState>,
    Json(payload): Json<CreatePreviewRequest>,
) -> BroadcastResult<impl IntoResponse> {
    let request = payload.into_request()?;
    let preview = state.orchestrator.create_preview(request).await?;
    Ok(api_created(preview))
}

async fn list_previews(State(state): State<AppState>) -> impl IntoResponse {
    api_success(state.orchestrator.list_previews())
}

async fn get_preview(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> BroadcastResult<impl IntoResponse> {
    Ok(api_success(state.orchestrator.get_preview(&id)?))
}

async fn approve_preview(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> BroadcastResult<impl IntoResponse> {
    Ok(api_success(state.orchestrator.approve_preview(&id)?))
}

async fn reject_preview(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> BroadcastResult<impl IntoResponse> {
    let preview = state.orchestrator.reject_preview(&id).await?;
    Ok(api_success(json!({
        "previewId": preview.id,
        "status": preview.status
    })))
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue and Restore
// ─────────────────────────────────────────────────────────────────────────────

async fn queue_status(State(state): State<AppState>) -> impl IntoResponse {
    api_success(state.orchestrator.queue_status())
}

async fn remove_queued_job(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> BroadcastResult<impl IntoResponse> {
    let job = state.orchestrator.remove_queued_job(&id).await?;
    Ok(api_success(json!({ "jobId": job.id, "removed": true })))
}

async fn restore_info(State(state): State<AppState>) -> impl IntoResponse {
    api_success(state.orchestrator.restore_info())
}

async fn set_restore_enabled(
    State(state): State<AppState>,
    Json(payload): Json<RestoreToggle>,
) -> impl IntoResponse {
    api_success(state.orchestrator.set_restore_enabled(payload.enabled))
}

async fn clear_restore_backups(State(state): State<AppState>) -> impl IntoResponse {
    let cleared = state.orchestrator.clear_restore_backups();
    api_success(json!({ "cleared": cleared }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Streams engine events as server-sent events named by event type.
///
/// Slow clients that fall behind the channel skip the missed events.
async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.event_bridge.subscribe()).filter_map(|msg| async move {
        match msg {
            Ok(event) => match Event::default().event(event.name()).json_data(&event) {
                Ok(sse) => Some(Ok(sse)),
                Err(e) => {
                    log::warn!("[SSE] Failed to encode {}: {}", event.name(), e);
                    None
                }
            },
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                log::warn!("[SSE] Client lagged, skipped {} events", skipped);
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
