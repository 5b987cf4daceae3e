// Per-container resource statistics

use serde::{Deserialize, Serialize};

/// One fresh stats sample. Never accumulated client-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStats {
    pub id: String,
    /// Can exceed 100 on multi-core hosts.
    pub cpu_percentage: f64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    #[serde(default)]
    pub memory_percentage: f64,
    #[serde(default)]
    pub network_rx_bytes: u64,
    #[serde(default)]
    pub network_tx_bytes: u64,
    #[serde(default)]
    pub block_read_bytes: u64,
    #[serde(default)]
    pub block_write_bytes: u64,
    #[serde(default)]
    pub pids: u64,
}
