use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque peer identifier assigned by the agent at startup.
pub type PeerId = String;

/// One shared file as known to the network.
///
/// `peer_ids` is a derived view. Agents send their own ID (or nothing) and
/// the directory rebuilds the list from its inverted indices when answering
/// a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Path relative to the sharing peer's root, `/`-separated.
    pub name: String,
    /// Content digest. Opaque to the directory.
    pub hash: String,
    /// Size in bytes.
    pub size: u64,
    #[serde(default)]
    pub peer_ids: Vec<PeerId>,
}

impl FileRecord {
    pub fn new<N: Into<String>, H: Into<String>>(name: N, hash: H, size: u64) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
            size,
            peer_ids: Vec::new(),
        }
    }

    /// Attach a single holder, as an agent does for its own catalog.
    pub fn held_by<I: Into<String>>(mut self, peer_id: I) -> Self {
        self.peer_ids = vec![peer_id.into()];
        self
    }
}

/// Identity record of a participant, including its catalog snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub id: PeerId,
    /// Host the transfer endpoint is reachable on. Filled in by the directory
    /// from the registering connection.
    #[serde(default)]
    pub address: String,
    /// Port of the peer's transfer endpoint.
    pub port: u16,
    #[serde(default)]
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<FileRecord>,
}

impl Peer {
    pub fn new<I: Into<String>>(id: I, port: u16, files: Vec<FileRecord>) -> Self {
        Self {
            id: id.into(),
            address: String::new(),
            port,
            last_seen: DateTime::<Utc>::default(),
            files,
        }
    }

    pub fn with_address<A: Into<String>>(mut self, address: A) -> Self {
        self.address = address.into();
        self
    }

    /// Catalog entry with the given name, if this peer reports one.
    pub fn file_named(&self, name: &str) -> Option<&FileRecord> {
        self.files.iter().find(|file| file.name == name)
    }
}
