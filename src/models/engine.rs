// Engine-wide info and Store-derived summary

use serde::{Deserialize, Serialize};

/// Live engine summary as reported by the engine itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineInfo {
    pub containers: u64,
    pub containers_running: u64,
    pub containers_paused: u64,
    pub containers_stopped: u64,
    pub images: u64,
    pub mem_total_bytes: u64,
    pub cpus: u64,
    pub server_version: String,
    #[serde(default)]
    pub operating_system: String,
    #[serde(default)]
    pub architecture: String,
}

/// Counts computed from the Store's last known snapshot (may be stale, never empty-on-error).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySummary {
    pub containers: usize,
    pub running: usize,
    pub paused: usize,
    pub stopped: usize,
    pub images: usize,
    /// Containers currently showing an optimistic (unconfirmed) state.
    pub pending: usize,
}
