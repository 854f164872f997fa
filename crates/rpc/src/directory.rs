//! HTTP surface of the directory service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use p2pshare_directory::DirectoryService;
use p2pshare_types::{
    HealthStatus, IndexStats, Peer, PeerIdRequest, PeerStatus, SearchRequest, SearchResponse,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::error::ApiError;

#[derive(Clone)]
pub struct DirectoryState {
    pub service: Arc<DirectoryService>,
    pub node_id: String,
}

/// Routes of the directory API. Serve it with connect info so `/register`
/// can see the caller's address.
pub fn directory_router(service: Arc<DirectoryService>, node_id: impl Into<String>) -> Router {
    let state = DirectoryState {
        service,
        node_id: node_id.into(),
    };
    Router::new()
        .route("/register", post(handle_register))
        .route("/unregister", post(handle_unregister))
        .route("/heartbeat", post(handle_heartbeat))
        .route("/search", post(handle_search))
        .route("/stats", get(handle_stats))
        .route("/peers", get(handle_peers))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_register(
    State(state): State<DirectoryState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(peer): Json<Peer>,
) -> Result<StatusCode, ApiError> {
    let peer = peer.with_address(remote.ip().to_string());
    info!(
        "Registering peer {} from {} with {} files",
        peer.id,
        remote,
        peer.files.len()
    );
    state.service.register(peer).await?;
    Ok(StatusCode::OK)
}

async fn handle_unregister(
    State(state): State<DirectoryState>,
    Json(request): Json<PeerIdRequest>,
) -> Result<StatusCode, ApiError> {
    if state.service.unregister(request.peer_id.clone()).await? {
        info!("Peer {} unregistered", request.peer_id);
    }
    Ok(StatusCode::OK)
}

async fn handle_heartbeat(
    State(state): State<DirectoryState>,
    Json(request): Json<PeerIdRequest>,
) -> Result<StatusCode, ApiError> {
    let known = state.service.heartbeat(request.peer_id.clone()).await?;
    debug!("Heartbeat from {} (known: {})", request.peer_id, known);
    Ok(StatusCode::OK)
}

async fn handle_search(
    State(state): State<DirectoryState>,
    Json(request): Json<SearchRequest>,
) -> Json<SearchResponse> {
    Json(state.service.search(&request))
}

async fn handle_stats(State(state): State<DirectoryState>) -> Json<IndexStats> {
    Json(state.service.stats())
}

async fn handle_peers(State(state): State<DirectoryState>) -> Json<Vec<PeerStatus>> {
    Json(state.service.peers())
}

async fn handle_health(State(state): State<DirectoryState>) -> Json<HealthStatus> {
    let status = if state.service.is_running() {
        "ok"
    } else {
        "stopping"
    };
    Json(HealthStatus {
        status: status.to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.service.uptime().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
