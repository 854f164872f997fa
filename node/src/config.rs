use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, File as ConfigFile};
use p2pshare_agent::{generate_peer_id, AgentConfig, DEFAULT_CHUNK_SIZE};
use p2pshare_directory::{DirectoryConfig, MIN_MISSED_INTERVALS};

/// Which process this node runs as; selects the default config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Directory,
    Peer,
}

impl Role {
    fn default_config_path(self) -> PathBuf {
        match self {
            Role::Directory => PathBuf::from("config/directory.toml"),
            Role::Peer => PathBuf::from("config/peer.toml"),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Directory => f.write_str("directory"),
            Role::Peer => f.write_str("peer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub role: Role,
    pub config_path: Option<PathBuf>,

    // Directory
    pub directory_host: String,
    pub directory_port: u16,
    pub sweep_interval_secs: u64,
    pub liveness_timeout_secs: u64,
    pub queue_capacity: usize,

    // Peer
    pub peer_id: String,
    pub directory_url: String,
    pub shared_dir: PathBuf,
    pub download_dir: PathBuf,
    pub transfer_host: String,
    pub transfer_port: u16,
    pub control_host: String,
    pub control_port: u16,
    pub heartbeat_interval_secs: u64,
    pub http_timeout_secs: u64,
    pub chunk_size: usize,
    pub search_limit: i64,

    // Logging
    pub log_level: String,
    pub log_format: String,
}

impl NodeConfig {
    /// Layer the optional TOML file under `P2PSHARE_*` environment variables.
    pub fn load(role: Role, config_path_override: Option<&str>) -> Result<Self> {
        let resolved_path = if let Some(path) = config_path_override {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path)
        } else {
            let path = role.default_config_path();
            if path.exists() {
                Some(path)
            } else {
                None
            }
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(config::Environment::with_prefix("P2PSHARE"));
        let config = builder.build()?;

        let peer_id = get_string_value(&config, &["peer_id", "peer.id"])
            .unwrap_or_else(generate_peer_id);

        Ok(Self {
            role,
            config_path: resolved_path,

            directory_host: get_string_value(&config, &["directory_host", "directory.host"])
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            directory_port: get_parsed(&config, &["directory_port", "directory.port"], 8080)?,
            sweep_interval_secs: get_parsed(
                &config,
                &["sweep_interval_secs", "directory.sweep_interval_secs"],
                60,
            )?,
            liveness_timeout_secs: get_parsed(
                &config,
                &["liveness_timeout_secs", "directory.liveness_timeout_secs"],
                300,
            )?,
            queue_capacity: get_parsed(
                &config,
                &["queue_capacity", "directory.queue_capacity"],
                100,
            )?,

            peer_id,
            directory_url: get_string_value(&config, &["directory_url", "peer.directory_url"])
                .unwrap_or_else(|| "http://127.0.0.1:8080".to_string()),
            shared_dir: get_string_value(&config, &["shared_dir", "peer.shared_dir"])
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./shared")),
            download_dir: get_string_value(&config, &["download_dir", "peer.download_dir"])
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./downloads")),
            transfer_host: get_string_value(&config, &["peer_host", "peer.host"])
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            transfer_port: get_parsed(&config, &["peer_port", "peer.port"], 8081)?,
            control_host: get_string_value(&config, &["control_host", "peer.control_host"])
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            control_port: get_parsed(&config, &["control_port", "peer.control_port"], 8090)?,
            heartbeat_interval_secs: get_parsed(
                &config,
                &["heartbeat_interval_secs", "peer.heartbeat_interval_secs"],
                60,
            )?,
            http_timeout_secs: get_parsed(
                &config,
                &["http_timeout_secs", "peer.http_timeout_secs"],
                30,
            )?,
            chunk_size: get_parsed(
                &config,
                &["chunk_size", "peer.chunk_size"],
                DEFAULT_CHUNK_SIZE,
            )?,
            search_limit: get_parsed(&config, &["search_limit", "peer.search_limit"], 50)?,

            log_level: get_string_value(&config, &["log_level", "log.level"])
                .unwrap_or_else(|| "info".to_string()),
            log_format: get_string_value(&config, &["log_format", "log.format"])
                .unwrap_or_else(|| "pretty".to_string()),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.log_format.as_str(), "pretty" | "compact") {
            anyhow::bail!(
                "LOG_FORMAT must be 'pretty' or 'compact', got '{}'",
                self.log_format
            );
        }
        match self.role {
            Role::Directory => {
                if self.directory_port == 0 {
                    anyhow::bail!("DIRECTORY_PORT must be greater than zero");
                }
                self.directory_config()
                    .validate()
                    .context("invalid directory settings")?;
            }
            Role::Peer => {
                if self.peer_id.trim().is_empty() {
                    anyhow::bail!("PEER_ID must not be empty");
                }
                if self.directory_url.trim().is_empty() {
                    anyhow::bail!("DIRECTORY_URL must not be empty");
                }
                if self.transfer_port == 0 || self.control_port == 0 {
                    anyhow::bail!("PEER_PORT and CONTROL_PORT must be greater than zero");
                }
                if self.transfer_port == self.control_port {
                    anyhow::bail!("PEER_PORT and CONTROL_PORT must be different values");
                }
                if self.search_limit < 0 {
                    anyhow::bail!("SEARCH_LIMIT must not be negative");
                }
                if self
                    .heartbeat_interval_secs
                    .saturating_mul(u64::from(MIN_MISSED_INTERVALS))
                    > self.liveness_timeout_secs
                {
                    anyhow::bail!(
                        "HEARTBEAT_INTERVAL_SECS ({}) must fit {} times into LIVENESS_TIMEOUT_SECS ({})",
                        self.heartbeat_interval_secs,
                        MIN_MISSED_INTERVALS,
                        self.liveness_timeout_secs
                    );
                }
                self.agent_config()
                    .validate()
                    .context("invalid peer settings")?;
            }
        }
        Ok(())
    }

    pub fn directory_listen_addr(&self) -> String {
        format!("{}:{}", self.directory_host, self.directory_port)
    }

    pub fn transfer_listen_addr(&self) -> String {
        format!("{}:{}", self.transfer_host, self.transfer_port)
    }

    pub fn control_listen_addr(&self) -> String {
        format!("{}:{}", self.control_host, self.control_port)
    }

    pub fn directory_config(&self) -> DirectoryConfig {
        let liveness_timeout = Duration::from_secs(self.liveness_timeout_secs);
        DirectoryConfig {
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            liveness_timeout,
            online_window: liveness_timeout,
            queue_capacity: self.queue_capacity,
        }
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            peer_id: self.peer_id.clone(),
            directory_url: self.directory_url.clone(),
            shared_dir: self.shared_dir.clone(),
            download_dir: self.download_dir.clone(),
            transfer_port: self.transfer_port,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            chunk_size: self.chunk_size,
        }
    }
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_parsed<T>(config: &Config, keys: &[&str], default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let Some(raw) = get_string_value(config, keys) else {
        return Ok(default);
    };
    raw.parse::<T>()
        .map_err(|err| anyhow::anyhow!("invalid value '{}' for {}: {}", raw, keys[0], err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn fixture_config(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("config")
            .join(name)
    }

    #[test]
    fn directory_fixture_loads() {
        let path = fixture_config("directory.toml");
        let config = NodeConfig::load(Role::Directory, Some(path.to_str().unwrap())).unwrap();

        assert_eq!(config.directory_port, 8080);
        assert_eq!(config.sweep_interval_secs, 60);
        assert_eq!(config.liveness_timeout_secs, 300);
        assert!(config.validate().is_ok());

        let directory = config.directory_config();
        assert_eq!(directory.liveness_timeout, Duration::from_secs(300));
        assert_eq!(directory.online_window, directory.liveness_timeout);
    }

    #[test]
    fn peer_fixture_loads() {
        let path = fixture_config("peer.toml");
        let config = NodeConfig::load(Role::Peer, Some(path.to_str().unwrap())).unwrap();

        assert_eq!(config.directory_url, "http://127.0.0.1:8080");
        assert_eq!(config.transfer_port, 8081);
        assert_eq!(config.control_port, 8090);
        assert_eq!(config.control_host, "127.0.0.1");
        assert_eq!(config.shared_dir, PathBuf::from("./shared"));
        assert_eq!(config.search_limit, 50);
        assert!(config.peer_id.starts_with("peer-"));
        assert!(config.validate().is_ok());

        let agent = config.agent_config();
        assert_eq!(agent.chunk_size, 32 * 1024);
        assert_eq!(agent.http_timeout, Duration::from_secs(30));
    }

    #[test]
    fn custom_file_values_are_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peer.toml");
        std::fs::write(
            &path,
            "[peer]\nid = \"peer-home\"\ndirectory_url = \"http://dir.lan:7000\"\nport = 7001\nchunk_size = 4096\n\n[log]\nformat = \"compact\"\n",
        )
        .unwrap();

        let config = NodeConfig::load(Role::Peer, Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.peer_id, "peer-home");
        assert_eq!(config.directory_url, "http://dir.lan:7000");
        assert_eq!(config.transfer_port, 7001);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.log_format, "compact");
        assert_eq!(config.control_port, 8090);
        assert!(config.validate().is_ok());

        std::fs::write(&path, "[peer]\nport = \"not-a-port\"\n").unwrap();
        assert!(NodeConfig::load(Role::Peer, Some(path.to_str().unwrap())).is_err());
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        assert!(NodeConfig::load(Role::Peer, Some("/definitely/not/here.toml")).is_err());
    }

    #[test]
    fn validation_catches_conflicts() {
        let path = fixture_config("peer.toml");
        let mut config = NodeConfig::load(Role::Peer, Some(path.to_str().unwrap())).unwrap();

        config.control_port = config.transfer_port;
        assert!(config.validate().is_err());

        config.control_port = 8090;
        config.log_format = "json".into();
        assert!(config.validate().is_err());

        config.log_format = "compact".into();
        config.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn heartbeat_must_fit_several_times_into_liveness_timeout() {
        let path = fixture_config("peer.toml");
        let mut config = NodeConfig::load(Role::Peer, Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.liveness_timeout_secs, 300);

        config.heartbeat_interval_secs = 100;
        assert!(config.validate().is_ok());
        config.heartbeat_interval_secs = 101;
        assert!(config.validate().is_err());

        let path = fixture_config("directory.toml");
        let mut config = NodeConfig::load(Role::Directory, Some(path.to_str().unwrap())).unwrap();
        config.liveness_timeout_secs = config.sweep_interval_secs * 2;
        assert!(config.validate().is_err());
    }
}
