//! Local control API of a peer agent, bound to loopback by the node.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use p2pshare_agent::{AgentStatus, DownloadProgress, PeerAgent};
use p2pshare_files::ScanReport;
use p2pshare_types::{FileRecord, HealthStatus, SearchResponse};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ApiError;

#[derive(Clone)]
pub struct ControlState {
    pub agent: Arc<PeerAgent>,
    /// Signalled once `/exit` has unregistered the agent.
    pub exit: Arc<Notify>,
    pub default_search_limit: i64,
    pub started_at: Instant,
}

impl ControlState {
    pub fn new(agent: Arc<PeerAgent>, exit: Arc<Notify>, default_search_limit: i64) -> Self {
        Self {
            agent,
            exit,
            default_search_limit,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ControlSearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlDownloadRequest {
    pub name: String,
    pub hash: String,
    #[serde(default)]
    pub peer_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadStarted {
    pub name: String,
    pub hash: String,
}

pub fn control_router(state: ControlState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/catalog", get(handle_catalog))
        .route("/scan", post(handle_scan))
        .route("/search", post(handle_search))
        .route("/download", post(handle_download))
        .route("/downloads", get(handle_downloads))
        .route("/exit", post(handle_exit))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_status(State(state): State<ControlState>) -> Json<AgentStatus> {
    Json(state.agent.status())
}

async fn handle_catalog(State(state): State<ControlState>) -> Json<Vec<FileRecord>> {
    Json(state.agent.catalog())
}

async fn handle_scan(State(state): State<ControlState>) -> Result<Json<ScanReport>, ApiError> {
    Ok(Json(state.agent.refresh().await?))
}

async fn handle_search(
    State(state): State<ControlState>,
    Json(request): Json<ControlSearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let limit = request.limit.unwrap_or(state.default_search_limit);
    Ok(Json(state.agent.search(&request.query, limit).await?))
}

async fn handle_download(
    State(state): State<ControlState>,
    Json(request): Json<ControlDownloadRequest>,
) -> Result<(StatusCode, Json<DownloadStarted>), ApiError> {
    // The task reports its own outcome through the agent's status message.
    let _task = state.agent.spawn_download(
        &request.name,
        &request.hash,
        request.peer_id.as_deref(),
    )?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DownloadStarted {
            name: request.name,
            hash: request.hash,
        }),
    ))
}

async fn handle_downloads(
    State(state): State<ControlState>,
) -> Json<BTreeMap<String, DownloadProgress>> {
    Json(state.agent.downloads())
}

async fn handle_exit(State(state): State<ControlState>) -> StatusCode {
    info!("Exit requested through control API");
    state.agent.shutdown().await;
    state.exit.notify_one();
    StatusCode::OK
}

async fn handle_health(State(state): State<ControlState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: format!("{:?}", state.agent.state()).to_lowercase(),
        node_id: state.agent.peer_id().to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
