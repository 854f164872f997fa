use serde::{Deserialize, Serialize};

/// Payload returned by `/health` on the directory and on peer control ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub version: String,
}
