use thiserror::Error;

/// Peer agent errors
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{endpoint} returned status {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("download already in progress for digest {0}")]
    DuplicateTransfer(String),
    #[error("another download is already writing {0}")]
    NameInFlight(String),
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
    #[error("file is not part of the last search result: {0}")]
    UnknownFile(String),
    #[error("invalid file name: {0}")]
    InvalidFileName(String),
    #[error("transfer ended after {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
    #[error("agent is not registered with the directory")]
    NotRegistered,
    #[error("invalid agent configuration: {0}")]
    InvalidConfig(String),
}
