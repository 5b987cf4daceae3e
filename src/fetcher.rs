// Snapshot fetcher: timed, stateless reads from the engine. No retries here.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, instrument};

use crate::engine::Engine;
use crate::error::{EngineError, with_timeout};
use crate::models::{ContainerRecord, ContainerStats, EngineInfo, ImageRecord};

#[derive(Clone)]
pub struct SnapshotFetcher {
    engine: Arc<dyn Engine>,
}

impl SnapshotFetcher {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }

    #[instrument(skip(self), fields(operation = "fetch_containers"))]
    pub async fn fetch_containers(
        &self,
        timeout: Duration,
    ) -> Result<Vec<ContainerRecord>, EngineError> {
        let containers = with_timeout(timeout, self.engine.list_containers()).await?;
        debug!(count = containers.len(), "containers fetched");
        Ok(containers)
    }

    #[instrument(skip(self), fields(operation = "fetch_images"))]
    pub async fn fetch_images(&self, timeout: Duration) -> Result<Vec<ImageRecord>, EngineError> {
        let images = with_timeout(timeout, self.engine.list_images()).await?;
        debug!(count = images.len(), "images fetched");
        Ok(images)
    }

    pub async fn fetch_stats(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<Option<ContainerStats>, EngineError> {
        with_timeout(timeout, self.engine.container_stats(id)).await
    }

    /// Sample every id concurrently under one shared deadline. Failed samples are skipped.
    pub async fn fetch_stats_many(&self, ids: &[String], timeout: Duration) -> Vec<ContainerStats> {
        let samples = join_all(ids.iter().map(|id| self.fetch_stats(id, timeout))).await;
        ids.iter()
            .zip(samples)
            .filter_map(|(id, r)| match r {
                Ok(s) => s,
                Err(e) => {
                    debug!(container = %id, error = %e, "stats sample failed");
                    None
                }
            })
            .collect()
    }

    pub async fn fetch_engine_info(&self, timeout: Duration) -> Result<EngineInfo, EngineError> {
        with_timeout(timeout, self.engine.info()).await
    }
}
