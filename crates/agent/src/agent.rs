//! Per-process peer state: catalog, registration lifecycle, downloads and
//! heartbeats.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use p2pshare_files::{resolve_shared_path, CatalogScanner, PathError, ScanReport};
use p2pshare_types::{FileRecord, Peer, PeerId, SearchRequest, SearchResponse};
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::{check_status, DirectoryApi, HttpDirectoryClient};
use crate::config::AgentConfig;
use crate::downloads::{DownloadGuard, DownloadProgress, DownloadTracker};
use crate::error::AgentError;

/// Registration lifecycle of an agent.
///
/// "Downloading" is not a separate state; it is reported through
/// [`AgentStatus::downloading`] while the agent is `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Unregistered,
    Registering,
    Active,
    Unregistering,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub peer_id: PeerId,
    pub state: AgentState,
    pub downloading: bool,
    /// Outcome of the most recent user-visible operation.
    pub message: String,
    pub shared_files: usize,
    pub active_downloads: usize,
}

pub struct PeerAgent {
    config: AgentConfig,
    directory: Arc<dyn DirectoryApi>,
    http: Client,
    scanner: CatalogScanner,
    catalog: RwLock<Vec<FileRecord>>,
    state: RwLock<AgentState>,
    message: RwLock<String>,
    downloads: DownloadTracker,
    last_search: RwLock<Option<SearchResponse>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    /// Held across scan, catalog update and `/register` so registrations
    /// leave in the order their catalogs were built.
    registration: AsyncMutex<()>,
}

impl PeerAgent {
    /// Agent talking to the directory over HTTP.
    pub fn new(config: AgentConfig) -> Result<Arc<Self>, AgentError> {
        let directory = HttpDirectoryClient::new(&config.directory_url, config.http_timeout)?;
        Self::with_directory(config, Arc::new(directory))
    }

    pub fn with_directory(
        config: AgentConfig,
        directory: Arc<dyn DirectoryApi>,
    ) -> Result<Arc<Self>, AgentError> {
        config.validate()?;
        let http = Client::builder().timeout(config.http_timeout).build()?;
        let scanner = CatalogScanner::new(config.shared_dir.clone());

        Ok(Arc::new(Self {
            config,
            directory,
            http,
            scanner,
            catalog: RwLock::new(Vec::new()),
            state: RwLock::new(AgentState::Unregistered),
            message: RwLock::new(String::new()),
            downloads: DownloadTracker::new(),
            last_search: RwLock::new(None),
            heartbeat_task: Mutex::new(None),
            registration: AsyncMutex::new(()),
        }))
    }

    pub fn peer_id(&self) -> &str {
        &self.config.peer_id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn state(&self) -> AgentState {
        *self.state.read()
    }

    pub fn status(&self) -> AgentStatus {
        let active_downloads = self.downloads.len();
        let state = self.state();
        AgentStatus {
            peer_id: self.config.peer_id.clone(),
            state,
            downloading: state == AgentState::Active && active_downloads > 0,
            message: self.message.read().clone(),
            shared_files: self.catalog.read().len(),
            active_downloads,
        }
    }

    pub fn catalog(&self) -> Vec<FileRecord> {
        self.catalog.read().clone()
    }

    pub fn downloads(&self) -> BTreeMap<String, DownloadProgress> {
        self.downloads.snapshot()
    }

    pub fn download_progress(&self, hash: &str) -> Option<DownloadProgress> {
        self.downloads.progress(hash)
    }

    pub fn last_search(&self) -> Option<SearchResponse> {
        self.last_search.read().clone()
    }

    fn set_message(&self, message: impl Into<String>) {
        *self.message.write() = message.into();
    }

    /// Create the working directories, scan, register and start heartbeats.
    ///
    /// Failure of this first registration is returned to the caller, which
    /// is expected to treat it as fatal.
    pub async fn start(&self) -> Result<(), AgentError> {
        tokio::fs::create_dir_all(&self.config.shared_dir).await?;
        tokio::fs::create_dir_all(&self.config.download_dir).await?;

        self.scan().await?;
        self.register().await?;
        self.spawn_heartbeat_loop();

        info!(
            "Peer {} active, serving {} on port {}",
            self.config.peer_id,
            self.config.shared_dir.display(),
            self.config.transfer_port
        );
        Ok(())
    }

    /// Rebuild the catalog from the shared directory.
    pub async fn scan(&self) -> Result<ScanReport, AgentError> {
        let _serial = self.registration.lock().await;
        self.scan_catalog().await
    }

    async fn scan_catalog(&self) -> Result<ScanReport, AgentError> {
        let scanner = self.scanner.clone();
        let peer_id = self.config.peer_id.clone();
        let report = tokio::task::spawn_blocking(move || scanner.scan(&peer_id))
            .await
            .map_err(|err| AgentError::Io(std::io::Error::other(err)))??;

        *self.catalog.write() = report.files.clone();
        self.set_message(format!("Found {} files in shared directory", report.files.len()));
        Ok(report)
    }

    /// Send the current catalog to the directory.
    ///
    /// Fails with [`AgentError::NotRegistered`] once shutdown has begun.
    pub async fn register(&self) -> Result<(), AgentError> {
        let _serial = self.registration.lock().await;
        self.register_catalog().await
    }

    fn ensure_not_stopping(&self) -> Result<(), AgentError> {
        match self.state() {
            AgentState::Unregistering | AgentState::Stopped => Err(AgentError::NotRegistered),
            _ => Ok(()),
        }
    }

    async fn register_catalog(&self) -> Result<(), AgentError> {
        let first = {
            let mut state = self.state.write();
            match *state {
                AgentState::Unregistering | AgentState::Stopped => {
                    return Err(AgentError::NotRegistered);
                }
                AgentState::Unregistered => {
                    *state = AgentState::Registering;
                    true
                }
                _ => false,
            }
        };

        let peer = Peer::new(
            self.config.peer_id.clone(),
            self.config.transfer_port,
            self.catalog(),
        );
        match self.directory.register(&peer).await {
            Ok(()) => {
                if first {
                    *self.state.write() = AgentState::Active;
                }
                self.set_message(format!(
                    "Registered {} files with directory",
                    peer.files.len()
                ));
                debug!("Registered {} files as {}", peer.files.len(), peer.id);
                Ok(())
            }
            Err(err) => {
                if first {
                    *self.state.write() = AgentState::Unregistered;
                }
                self.set_message(format!("Registration failed: {err}"));
                Err(err)
            }
        }
    }

    /// Rescan and re-register, as after new content lands in the shared dir.
    pub async fn refresh(&self) -> Result<ScanReport, AgentError> {
        let _serial = self.registration.lock().await;
        self.ensure_not_stopping()?;
        let report = self.scan_catalog().await?;
        self.register_catalog().await?;
        Ok(report)
    }

    pub async fn search(&self, query: &str, limit: i64) -> Result<SearchResponse, AgentError> {
        let request = SearchRequest {
            query: query.to_string(),
            limit,
            from_peer: self.config.peer_id.clone(),
        };
        let response = self.directory.search(&request).await?;
        self.set_message(format!(
            "Search for {:?} returned {} files",
            query,
            response.files.len()
        ));
        *self.last_search.write() = Some(response.clone());
        Ok(response)
    }

    pub async fn heartbeat(&self) -> Result<(), AgentError> {
        if self.state() != AgentState::Active {
            return Err(AgentError::NotRegistered);
        }
        self.directory.heartbeat(&self.config.peer_id).await
    }

    fn spawn_heartbeat_loop(&self) {
        let directory = self.directory.clone();
        let peer_id = self.config.peer_id.clone();
        let period = self.config.heartbeat_interval;

        *self.heartbeat_task.lock() = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            // The first tick completes immediately; registration just happened.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = directory.heartbeat(&peer_id).await {
                    warn!("Heartbeat to directory failed: {}", err);
                }
            }
        }));
    }

    /// Fetch `name` (digest `hash`) from `peer` and publish it locally.
    ///
    /// At most one download per digest runs at a time; a concurrent request
    /// for the same digest fails with [`AgentError::DuplicateTransfer`].
    pub async fn download(
        &self,
        name: &str,
        hash: &str,
        peer: &Peer,
    ) -> Result<PathBuf, AgentError> {
        let guard = self.begin_download(name, hash)?;
        self.run_download(guard, name, peer).await
    }

    /// Download `file` from the first host in its `peer_ids` that appears in
    /// `peers` and is not this agent.
    pub async fn download_result(
        &self,
        file: &FileRecord,
        peers: &BTreeMap<PeerId, Peer>,
    ) -> Result<PathBuf, AgentError> {
        let peer = self.pick_host(file, peers, None)?;
        self.download(&file.name, &file.hash, &peer).await
    }

    /// Start a download from the last search result on a background task.
    ///
    /// The duplicate check happens before this returns, so callers learn
    /// about a conflicting transfer synchronously.
    pub fn spawn_download(
        self: &Arc<Self>,
        name: &str,
        hash: &str,
        peer_id: Option<&str>,
    ) -> Result<JoinHandle<Result<PathBuf, AgentError>>, AgentError> {
        let search = self
            .last_search()
            .ok_or_else(|| AgentError::UnknownFile(name.to_string()))?;
        let file = search
            .files
            .iter()
            .find(|file| file.name == name && file.hash == hash)
            .ok_or_else(|| AgentError::UnknownFile(name.to_string()))?;
        let peer = self.pick_host(file, &search.peers, peer_id)?;

        let guard = self.begin_download(name, hash)?;
        let agent = self.clone();
        let name = name.to_string();
        Ok(tokio::spawn(async move {
            let result = agent.run_download(guard, &name, &peer).await;
            if let Err(err) = &result {
                warn!("Download of {} failed: {}", name, err);
            }
            result
        }))
    }

    fn pick_host(
        &self,
        file: &FileRecord,
        peers: &BTreeMap<PeerId, Peer>,
        preferred: Option<&str>,
    ) -> Result<Peer, AgentError> {
        if let Some(peer_id) = preferred {
            return peers
                .get(peer_id)
                .filter(|_| file.peer_ids.iter().any(|id| id == peer_id))
                .cloned()
                .ok_or_else(|| AgentError::UnknownPeer(peer_id.to_string()));
        }
        file.peer_ids
            .iter()
            .filter(|id| **id != self.config.peer_id)
            .find_map(|id| peers.get(id))
            .cloned()
            .ok_or_else(|| {
                AgentError::UnknownPeer(file.peer_ids.first().cloned().unwrap_or_default())
            })
    }

    fn begin_download(&self, name: &str, hash: &str) -> Result<DownloadGuard, AgentError> {
        self.ensure_not_stopping()?;
        // Validate the name before claiming the digest.
        destination(&self.config.download_dir, name)?;
        self.downloads.begin(hash, name)
    }

    async fn run_download(
        &self,
        guard: DownloadGuard,
        name: &str,
        peer: &Peer,
    ) -> Result<PathBuf, AgentError> {
        let target = destination(&self.config.download_dir, name)?;
        self.set_message(format!("Downloading {} from {}", name, peer.id));

        match self.transfer(&guard, name, peer, &target).await {
            Ok(bytes) => {
                guard.finish();
                info!("Downloaded {} ({} bytes) from {}", name, bytes, peer.id);
            }
            Err(err) => {
                drop(guard);
                self.set_message(format!("Download of {name} failed: {err}"));
                return Err(err);
            }
        }

        self.publish(name, &target).await;
        Ok(target)
    }

    /// Stream the file into `target`, returning the bytes written. A partial
    /// file is left behind on failure.
    async fn transfer(
        &self,
        guard: &DownloadGuard,
        name: &str,
        peer: &Peer,
        target: &Path,
    ) -> Result<u64, AgentError> {
        let url = file_url(peer, name)?;
        debug!("Fetching {}", url);
        let response = self.http.get(url).send().await?;
        let mut response = check_status("/file", response).await?;

        let total = response.content_length();
        guard.set_total(total);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(target).await?;

        while let Some(chunk) = response.chunk().await? {
            for piece in chunk.chunks(self.config.chunk_size) {
                file.write_all(piece).await?;
                guard.advance(piece.len());
            }
        }
        file.flush().await?;

        let received = guard.bytes();
        if let Some(expected) = total {
            if received != expected {
                return Err(AgentError::Incomplete { expected, received });
            }
        }
        Ok(received)
    }

    /// Copy a finished download into the shared directory and re-register.
    /// Failures are reported through the status message only.
    async fn publish(&self, name: &str, downloaded: &Path) {
        let shared = match destination(&self.config.shared_dir, name) {
            Ok(shared) => shared,
            Err(err) => {
                warn!("Cannot publish {}: {}", name, err);
                return;
            }
        };

        if !same_file(&shared, downloaded).await {
            if let Some(parent) = shared.parent() {
                if let Err(err) = tokio::fs::create_dir_all(parent).await {
                    warn!("Cannot create {}: {}", parent.display(), err);
                }
            }
            if let Err(err) = tokio::fs::copy(downloaded, &shared).await {
                warn!("Copy of {} into shared directory failed: {}", name, err);
                self.set_message(format!(
                    "Downloaded {name}, but sharing it failed: {err}"
                ));
                return;
            }
        }

        match self.refresh().await {
            Ok(_) => self.set_message(format!("Downloaded {name} and now sharing it")),
            Err(AgentError::NotRegistered) => {
                debug!("Agent is stopping; not announcing {}", name);
            }
            Err(err) => {
                warn!("Re-registration after download failed: {}", err);
                self.set_message(format!(
                    "Downloaded {name}, but re-registration failed: {err}"
                ));
            }
        }
    }

    /// Stop heartbeats and leave the directory.
    ///
    /// Waits for an in-flight registration to finish first, so it cannot
    /// reach the directory after the unregistration.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.heartbeat_task.lock().take() {
            handle.abort();
        }
        let _serial = self.registration.lock().await;

        let was_registered = {
            let mut state = self.state.write();
            if *state == AgentState::Stopped {
                return;
            }
            let was_registered = *state == AgentState::Active;
            *state = AgentState::Unregistering;
            was_registered
        };

        if was_registered {
            if let Err(err) = self.directory.unregister(&self.config.peer_id).await {
                warn!("Failed to unregister from directory: {}", err);
            }
        }
        *self.state.write() = AgentState::Stopped;
        self.set_message("Stopped");
        info!("Peer {} stopped", self.config.peer_id);
    }
}

/// Map a relative file name onto `root`, rejecting unsafe names.
fn destination(root: &Path, name: &str) -> Result<PathBuf, AgentError> {
    resolve_shared_path(root, name).map_err(|err| match err {
        PathError::Io(io) => AgentError::Io(io),
        rejected => AgentError::InvalidFileName(rejected.to_string()),
    })
}

/// True when both paths exist and resolve to the same file, which happens
/// when the download and shared directories coincide.
async fn same_file(a: &Path, b: &Path) -> bool {
    match (
        tokio::fs::canonicalize(a).await,
        tokio::fs::canonicalize(b).await,
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// `GET /file?name=...` on the peer's transfer endpoint.
pub fn file_url(peer: &Peer, name: &str) -> Result<Url, AgentError> {
    let host = if peer.address.is_empty() {
        "127.0.0.1"
    } else {
        peer.address.as_str()
    };
    let base = match host.parse::<IpAddr>() {
        Ok(ip) => format!("http://{}", SocketAddr::new(ip, peer.port)),
        Err(_) => format!("http://{}:{}", host, peer.port),
    };

    let mut url = Url::parse(&base)?;
    url.set_path("/file");
    url.query_pairs_mut().append_pair("name", name);
    Ok(url)
}
