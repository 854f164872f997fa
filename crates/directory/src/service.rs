//! Directory service: serialized mutations over the index plus the periodic
//! liveness sweep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use p2pshare_types::{IndexStats, Peer, PeerId, PeerStatus, SearchRequest, SearchResponse};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use crate::config::DirectoryConfig;
use crate::error::DirectoryError;
use crate::index::DirectoryIndex;

enum Command {
    Register {
        peer: Peer,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        peer_id: PeerId,
        ack: oneshot::Sender<bool>,
    },
    Heartbeat {
        peer_id: PeerId,
        ack: oneshot::Sender<bool>,
    },
}

/// Reject registrations that would put unusable records into the index.
pub fn validate_registration(peer: &Peer) -> Result<(), DirectoryError> {
    if peer.id.trim().is_empty() {
        return Err(DirectoryError::InvalidPeer("peer id is empty".into()));
    }
    if peer.port == 0 {
        return Err(DirectoryError::InvalidPeer(format!(
            "peer {} advertised port 0",
            peer.id
        )));
    }
    for file in &peer.files {
        if file.name.is_empty() {
            return Err(DirectoryError::InvalidPeer(format!(
                "peer {} listed a file with an empty name",
                peer.id
            )));
        }
        if file.hash.is_empty() {
            return Err(DirectoryError::InvalidPeer(format!(
                "file {} from peer {} has no digest",
                file.name, peer.id
            )));
        }
    }
    Ok(())
}

/// Owns the [`DirectoryIndex`] and the tasks that mutate and sweep it.
///
/// Register, unregister and heartbeat commands funnel through one bounded
/// queue drained by a single task, so commands from the same caller apply in
/// the order they were sent. Reads go straight to the index.
pub struct DirectoryService {
    config: DirectoryConfig,
    index: Arc<DirectoryIndex>,
    commands: mpsc::Sender<Command>,
    is_running: Arc<RwLock<bool>>,
    command_task: Mutex<Option<JoinHandle<()>>>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
    started_at: Instant,
}

impl DirectoryService {
    /// Validate `config` and spawn the command and sweep tasks on the
    /// current tokio runtime.
    pub fn start(config: DirectoryConfig) -> Result<Arc<Self>, DirectoryError> {
        config.validate()?;

        let index = Arc::new(DirectoryIndex::new());
        let (commands, receiver) = mpsc::channel(config.queue_capacity);
        let is_running = Arc::new(RwLock::new(true));

        let service = Arc::new(Self {
            config,
            index,
            commands,
            is_running,
            command_task: Mutex::new(None),
            sweep_task: Mutex::new(None),
            started_at: Instant::now(),
        });
        service.spawn_command_loop(receiver);
        service.spawn_sweep_loop();

        info!(
            "Directory service started (sweep every {:?}, timeout {:?})",
            service.config.sweep_interval, service.config.liveness_timeout
        );
        Ok(service)
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<DirectoryIndex> {
        &self.index
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_running(&self) -> bool {
        *self.is_running.read()
    }

    fn spawn_command_loop(&self, mut receiver: mpsc::Receiver<Command>) {
        let index = self.index.clone();
        *self.command_task.lock() = Some(tokio::spawn(async move {
            while let Some(command) = receiver.recv().await {
                match command {
                    Command::Register { peer, ack } => {
                        index.register_peer(peer);
                        let _ = ack.send(());
                    }
                    Command::Unregister { peer_id, ack } => {
                        let known = index.unregister_peer(&peer_id);
                        if !known {
                            debug!("Unregister for unknown peer {}", peer_id);
                        }
                        let _ = ack.send(known);
                    }
                    Command::Heartbeat { peer_id, ack } => {
                        let known = index.touch(&peer_id);
                        if !known {
                            debug!("Heartbeat from unknown peer {}", peer_id);
                        }
                        let _ = ack.send(known);
                    }
                }
            }
        }));
    }

    fn spawn_sweep_loop(&self) {
        let index = self.index.clone();
        let is_running = self.is_running.clone();
        let timeout = self.config.liveness_timeout;
        let period = self.config.sweep_interval;

        *self.sweep_task.lock() = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                if !*is_running.read() {
                    break;
                }
                let reclaimed = index.reclaim_stale(timeout);
                if !reclaimed.is_empty() {
                    info!("Liveness sweep reclaimed {} peers", reclaimed.len());
                }
            }
        }));
    }

    async fn dispatch<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, DirectoryError> {
        if !self.is_running() {
            return Err(DirectoryError::ServiceStopped);
        }
        let (ack, done) = oneshot::channel();
        self.commands
            .send(build(ack))
            .await
            .map_err(|_| DirectoryError::ServiceStopped)?;
        done.await.map_err(|_| DirectoryError::ServiceStopped)
    }

    /// Validate and apply a registration. Resolves once the index reflects it.
    pub async fn register(&self, peer: Peer) -> Result<(), DirectoryError> {
        validate_registration(&peer)?;
        self.dispatch(|ack| Command::Register { peer, ack }).await
    }

    /// Returns whether the peer was registered.
    pub async fn unregister(&self, peer_id: PeerId) -> Result<bool, DirectoryError> {
        self.dispatch(|ack| Command::Unregister { peer_id, ack })
            .await
    }

    /// Returns whether the peer was registered.
    pub async fn heartbeat(&self, peer_id: PeerId) -> Result<bool, DirectoryError> {
        self.dispatch(|ack| Command::Heartbeat { peer_id, ack })
            .await
    }

    pub fn search(&self, request: &SearchRequest) -> SearchResponse {
        let response = self.index.search_by_name(&request.query, request.limit);
        debug!(
            "Search {:?} from {} matched {} files",
            request.query,
            if request.from_peer.is_empty() {
                "anonymous"
            } else {
                request.from_peer.as_str()
            },
            response.files.len()
        );
        response
    }

    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }

    pub fn peers(&self) -> Vec<PeerStatus> {
        self.index.peers_with_status(self.config.online_window)
    }

    /// Stop the command and sweep tasks. Later mutations fail with
    /// [`DirectoryError::ServiceStopped`].
    pub fn shutdown(&self) {
        {
            let mut running = self.is_running.write();
            if !*running {
                return;
            }
            *running = false;
        }

        if let Some(handle) = self.command_task.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.sweep_task.lock().take() {
            handle.abort();
        }
        info!("Directory service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2pshare_types::FileRecord;

    fn peer(id: &str, names: &[&str]) -> Peer {
        let files = names
            .iter()
            .map(|name| FileRecord::new(*name, format!("hash-{name}"), 1))
            .collect();
        Peer::new(id, 9000, files).with_address("10.0.0.1")
    }

    #[tokio::test]
    async fn register_is_visible_once_acknowledged() {
        let service = DirectoryService::start(DirectoryConfig::default()).unwrap();
        service.register(peer("a", &["doc.txt"])).await.unwrap();

        let hits = service.search(&SearchRequest {
            query: "doc".into(),
            limit: 0,
            from_peer: "b".into(),
        });
        assert_eq!(hits.files.len(), 1);
        assert_eq!(hits.peers["a"].address, "10.0.0.1");
        service.shutdown();
    }

    #[tokio::test]
    async fn same_peer_commands_apply_in_send_order() {
        let service = DirectoryService::start(DirectoryConfig::default()).unwrap();
        let (first, second) = tokio::join!(
            service.register(peer("a", &["one", "two"])),
            service.register(peer("a", &["two"]))
        );
        first.unwrap();
        second.unwrap();

        let stats = service.stats();
        assert_eq!(stats.peer_count, 1);
        assert_eq!(stats.total_file_refs, 1);
        assert!(service.heartbeat("a".into()).await.unwrap());
        assert!(service.unregister("a".into()).await.unwrap());
        assert!(!service.heartbeat("a".into()).await.unwrap());
        service.shutdown();
    }

    #[tokio::test]
    async fn invalid_registrations_are_rejected_before_the_index() {
        let service = DirectoryService::start(DirectoryConfig::default()).unwrap();

        let mut bad_port = peer("a", &["x"]);
        bad_port.port = 0;
        assert!(matches!(
            service.register(bad_port).await,
            Err(DirectoryError::InvalidPeer(_))
        ));
        assert!(service.register(peer("", &["x"])).await.is_err());
        assert!(service.register(peer("a", &[""])).await.is_err());

        let mut no_hash = peer("a", &["x"]);
        no_hash.files[0].hash.clear();
        assert!(service.register(no_hash).await.is_err());

        assert_eq!(service.stats(), IndexStats::default());
        service.shutdown();
    }

    #[tokio::test]
    async fn commands_after_shutdown_fail() {
        let service = DirectoryService::start(DirectoryConfig::default()).unwrap();
        service.shutdown();
        assert!(!service.is_running());
        assert!(matches!(
            service.register(peer("a", &["x"])).await,
            Err(DirectoryError::ServiceStopped)
        ));
        assert!(matches!(
            service.heartbeat("a".into()).await,
            Err(DirectoryError::ServiceStopped)
        ));
    }

    #[tokio::test]
    async fn sweep_reclaims_silent_peers() {
        let config = DirectoryConfig {
            sweep_interval: Duration::from_millis(20),
            liveness_timeout: Duration::from_millis(60),
            ..DirectoryConfig::default()
        };
        let service = DirectoryService::start(config).unwrap();
        service.register(peer("quiet", &["q"])).await.unwrap();
        service.register(peer("chatty", &["c"])).await.unwrap();

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            service.heartbeat("chatty".into()).await.unwrap();
        }

        assert!(!service.index().contains_peer("quiet"));
        assert!(service.index().contains_peer("chatty"));
        assert!(service
            .search(&SearchRequest {
                query: "q".into(),
                limit: 0,
                from_peer: String::new(),
            })
            .files
            .is_empty());
        service.shutdown();
    }

    #[test]
    fn start_rejects_invalid_config() {
        let config = DirectoryConfig {
            queue_capacity: 0,
            ..DirectoryConfig::default()
        };
        assert!(matches!(
            DirectoryService::start(config),
            Err(DirectoryError::InvalidConfig(_))
        ));
    }
}
