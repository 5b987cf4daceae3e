// Domain models

mod change;
mod container;
mod engine;
mod image;
mod log;
mod stats;

pub use change::{ChangeSet, InventoryEvent};
pub use container::{
    ContainerRecord, ContainerState, ContainerView, MountPoint, PortMapping, Provenance,
};
pub use engine::{EngineInfo, InventorySummary};
pub use image::{ImageRecord, UNTAGGED};
pub use log::{LogEntry, LogStream};
pub use stats::ContainerStats;
