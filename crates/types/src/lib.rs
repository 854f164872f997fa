//! Wire records shared by the p2pshare directory, peer agents and HTTP layer.
//!
//! Field names follow the JSON contract spoken between peers and the
//! directory (`camelCase`), so every record here derives both `Serialize` and
//! `Deserialize` and can be used directly as an axum/reqwest body.

pub mod health;
pub mod messages;
pub mod peer;

pub use health::HealthStatus;
pub use messages::{IndexStats, PeerIdRequest, PeerStatus, SearchRequest, SearchResponse};
pub use peer::{FileRecord, Peer, PeerId};
