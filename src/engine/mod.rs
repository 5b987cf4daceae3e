// Container engine boundary. Everything engine-specific stays behind this trait.

mod docker;
mod stats;

pub use docker::DockerEngine;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::dispatcher::Action;
use crate::error::EngineError;
use crate::models::{ContainerRecord, ContainerStats, EngineInfo, ImageRecord, LogEntry};

/// Bounds for one log poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogQuery {
    /// Only entries at or after this instant (engines may round down to seconds).
    pub since: Option<DateTime<Utc>>,
    /// Only the last N entries.
    pub tail: Option<usize>,
}

/// Read and action endpoints of a container engine.
///
/// Implementations must not fail on empty results and must not retry; callers
/// own retry and timeout policy.
#[async_trait]
pub trait Engine: Send + Sync {
    /// All containers, running or not.
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, EngineError>;

    async fn list_images(&self) -> Result<Vec<ImageRecord>, EngineError>;

    /// One stats sample; `None` when the container is not running.
    async fn container_stats(&self, id: &str) -> Result<Option<ContainerStats>, EngineError>;

    async fn info(&self) -> Result<EngineInfo, EngineError>;

    /// Issue a lifecycle command. Calling it when already in the target state succeeds.
    async fn perform(&self, id: &str, action: Action) -> Result<(), EngineError>;

    async fn logs(&self, id: &str, query: LogQuery) -> Result<Vec<LogEntry>, EngineError>;
}
