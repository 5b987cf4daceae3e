// Change-sets produced by reconcile and published to observers

use serde::{Deserialize, Serialize};

use super::{ContainerState, ContainerStats};

/// Ids added, removed and changed by one reconcile. Each list is sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub(crate) fn sort(&mut self) {
        self.added.sort();
        self.removed.sort();
        self.changed.sort();
    }
}

/// Message published on the Store's broadcast channel (and /ws/events).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InventoryEvent {
    Containers { seq: u64, changes: ChangeSet },
    Images { seq: u64, changes: ChangeSet },
    /// Local optimistic transition or its rollback for one container.
    Provisional {
        id: String,
        state: ContainerState,
        rolled_back: bool,
    },
    Stats { stats: Vec<ContainerStats> },
}
