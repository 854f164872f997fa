use thiserror::Error;

/// Directory service errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory service has stopped")]
    ServiceStopped,
    #[error("invalid directory configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid peer registration: {0}")]
    InvalidPeer(String),
}
