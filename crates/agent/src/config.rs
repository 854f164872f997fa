use std::path::PathBuf;
use std::time::Duration;

use p2pshare_types::PeerId;
use uuid::Uuid;

use crate::error::AgentError;

/// Default size of the pieces a download is written in.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Fresh `peer-xxxxxxxx` identifier.
pub fn generate_peer_id() -> PeerId {
    let id = Uuid::new_v4().simple().to_string();
    format!("peer-{}", &id[..8])
}

/// Peer agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub peer_id: PeerId,
    /// Base URL of the directory, e.g. `http://127.0.0.1:8080`.
    pub directory_url: String,
    pub shared_dir: PathBuf,
    pub download_dir: PathBuf,
    /// Port other peers reach the transfer endpoint on.
    pub transfer_port: u16,
    pub heartbeat_interval: Duration,
    /// Timeout applied to every outbound HTTP call.
    pub http_timeout: Duration,
    pub chunk_size: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            peer_id: generate_peer_id(),
            directory_url: "http://127.0.0.1:8080".to_string(),
            shared_dir: PathBuf::from("./shared"),
            download_dir: PathBuf::from("./downloads"),
            transfer_port: 8081,
            heartbeat_interval: Duration::from_secs(60),
            http_timeout: Duration::from_secs(30),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.peer_id.trim().is_empty() {
            return Err(AgentError::InvalidConfig("peer id cannot be empty".into()));
        }
        if self.directory_url.trim().is_empty() {
            return Err(AgentError::InvalidConfig(
                "directory url cannot be empty".into(),
            ));
        }
        if self.transfer_port == 0 {
            return Err(AgentError::InvalidConfig(
                "transfer port must be non-zero".into(),
            ));
        }
        if self.heartbeat_interval.is_zero() || self.http_timeout.is_zero() {
            return Err(AgentError::InvalidConfig(
                "heartbeat interval and HTTP timeout must be non-zero".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(AgentError::InvalidConfig(
                "chunk size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_have_expected_shape() {
        let id = generate_peer_id();
        assert!(id.starts_with("peer-"));
        assert_eq!(id.len(), 13);
        assert!(id[5..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_peer_id());
    }

    #[test]
    fn validate_rejects_zero_values() {
        assert!(AgentConfig::default().validate().is_ok());

        let config = AgentConfig {
            transfer_port: 0,
            ..AgentConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AgentError::InvalidConfig(_))
        ));

        let config = AgentConfig {
            chunk_size: 0,
            ..AgentConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
