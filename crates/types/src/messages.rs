use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::peer::{FileRecord, Peer, PeerId};

/// Body of `/unregister` and `/heartbeat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerIdRequest {
    pub peer_id: PeerId,
}

impl PeerIdRequest {
    pub fn new<I: Into<String>>(peer_id: I) -> Self {
        Self {
            peer_id: peer_id.into(),
        }
    }
}

/// Name query sent to the directory. `limit <= 0` means unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub from_peer: PeerId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub files: Vec<FileRecord>,
    /// Contact records for every peer referenced by `files`.
    pub peers: BTreeMap<PeerId, Peer>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub peer_count: usize,
    /// Distinct content digests.
    pub unique_files: usize,
    /// Distinct file names.
    pub total_file_refs: usize,
}

/// Registered peer as listed by the directory's `/peers` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    #[serde(flatten)]
    pub peer: Peer,
    pub is_online: bool,
    /// Other peers sharing at least one digest with this one.
    pub connections: Vec<PeerId>,
}
