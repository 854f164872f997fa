//! Peer agent for p2pshare.
//!
//! A [`PeerAgent`] keeps the local catalog in sync with the shared
//! directory, registers it with the directory service, heartbeats, and
//! downloads content from other peers with at most one transfer per digest.

pub mod agent;
pub mod client;
pub mod config;
pub mod downloads;
pub mod error;

pub use agent::{file_url, AgentState, AgentStatus, PeerAgent};
pub use client::{normalize_base_url, DirectoryApi, HttpDirectoryClient};
pub use config::{generate_peer_id, AgentConfig, DEFAULT_CHUNK_SIZE};
pub use downloads::{DownloadGuard, DownloadProgress, DownloadTracker};
pub use error::AgentError;
