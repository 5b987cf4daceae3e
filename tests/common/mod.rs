// Shared test helpers: a scripted in-memory engine and record builders

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dockboard::dispatcher::Action;
use dockboard::engine::{Engine, LogQuery};
use dockboard::error::EngineError;
use dockboard::models::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// In-memory engine. Lists return whatever the test last set; actions can be gated,
/// failed, or applied to the listed containers.
#[derive(Default)]
pub struct FakeEngine {
    containers: Mutex<Vec<ContainerRecord>>,
    images: Mutex<Vec<ImageRecord>>,
    stats: Mutex<HashMap<String, ContainerStats>>,
    logs: Mutex<Vec<LogEntry>>,
    info: Mutex<EngineInfo>,
    fail_lists: AtomicBool,
    action_failure: Mutex<Option<EngineError>>,
    log_failure: Mutex<Option<EngineError>>,
    action_gate: Mutex<Option<Arc<Semaphore>>>,
    apply_actions: AtomicBool,
    action_calls: AtomicUsize,
    log_calls: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_containers(containers: Vec<ContainerRecord>) -> Arc<Self> {
        let engine = Self::default();
        *engine.containers.lock().unwrap() = containers;
        Arc::new(engine)
    }

    pub fn set_containers(&self, containers: Vec<ContainerRecord>) {
        *self.containers.lock().unwrap() = containers;
    }

    pub fn set_images(&self, images: Vec<ImageRecord>) {
        *self.images.lock().unwrap() = images;
    }

    pub fn set_stats(&self, stats: ContainerStats) {
        self.stats.lock().unwrap().insert(stats.id.clone(), stats);
    }

    pub fn set_info(&self, info: EngineInfo) {
        *self.info.lock().unwrap() = info;
    }

    pub fn push_logs(&self, entries: Vec<LogEntry>) {
        self.logs.lock().unwrap().extend(entries);
    }

    /// Make list/info calls fail as unreachable.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.fail_lists.store(unreachable, Ordering::SeqCst);
    }

    pub fn fail_actions_with(&self, error: Option<EngineError>) {
        *self.action_failure.lock().unwrap() = error;
    }

    pub fn fail_logs_with(&self, error: Option<EngineError>) {
        *self.log_failure.lock().unwrap() = error;
    }

    /// Successful actions change the listed container's state, like a real engine would.
    pub fn apply_actions(&self, apply: bool) {
        self.apply_actions.store(apply, Ordering::SeqCst);
    }

    /// Block every action until the returned semaphore gets a permit per call.
    pub fn gate_actions(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.action_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn action_calls(&self) -> usize {
        self.action_calls.load(Ordering::SeqCst)
    }

    pub fn log_calls(&self) -> usize {
        self.log_calls.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<(), EngineError> {
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(EngineError::Unreachable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, EngineError> {
        self.check_reachable()?;
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn list_images(&self) -> Result<Vec<ImageRecord>, EngineError> {
        self.check_reachable()?;
        Ok(self.images.lock().unwrap().clone())
    }

    async fn container_stats(&self, id: &str) -> Result<Option<ContainerStats>, EngineError> {
        self.check_reachable()?;
        Ok(self.stats.lock().unwrap().get(id).cloned())
    }

    async fn info(&self) -> Result<EngineInfo, EngineError> {
        self.check_reachable()?;
        Ok(self.info.lock().unwrap().clone())
    }

    async fn perform(&self, id: &str, action: Action) -> Result<(), EngineError> {
        self.action_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.action_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(e) = self.action_failure.lock().unwrap().clone() {
            return Err(e);
        }
        if self.apply_actions.load(Ordering::SeqCst) {
            let mut containers = self.containers.lock().unwrap();
            if let Some(c) = containers.iter_mut().find(|c| c.id == id) {
                c.state = action.target_state();
            }
        }
        Ok(())
    }

    async fn logs(&self, _id: &str, query: LogQuery) -> Result<Vec<LogEntry>, EngineError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.log_failure.lock().unwrap().clone() {
            return Err(e);
        }
        let logs = self.logs.lock().unwrap();
        let mut out: Vec<LogEntry> = match query.since {
            // Engines round `since` down, so entries at the cursor come back again.
            Some(since) => logs.iter().filter(|e| e.timestamp >= since).cloned().collect(),
            None => logs.clone(),
        };
        if let Some(n) = query.tail {
            let skip = out.len().saturating_sub(n);
            out.drain(..skip);
        }
        Ok(out)
    }
}

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn container(id: &str, state: ContainerState) -> ContainerRecord {
    ContainerRecord {
        id: id.to_string(),
        name: id.to_string(),
        image: "nginx:latest".into(),
        image_id: String::new(),
        command: "nginx -g 'daemon off;'".into(),
        created_at: ts(0),
        state,
        ports: vec![],
        labels: HashMap::new(),
        mounts: vec![],
    }
}

pub fn image(id: &str, tags: &[&str]) -> ImageRecord {
    ImageRecord {
        id: id.to_string(),
        repo_tags: tags.iter().map(|t| t.to_string()).collect(),
        created_at: ts(0),
        size_bytes: 1024,
        arch: "amd64".into(),
        os: "linux".into(),
        labels: HashMap::new(),
        container_count: 0,
    }
}

pub fn stats(id: &str, cpu: f64) -> ContainerStats {
    ContainerStats {
        id: id.to_string(),
        cpu_percentage: cpu,
        memory_usage_bytes: 50,
        memory_limit_bytes: 100,
        memory_percentage: 50.0,
        network_rx_bytes: 0,
        network_tx_bytes: 0,
        block_read_bytes: 0,
        block_write_bytes: 0,
        pids: 1,
    }
}

pub fn log_entry(secs: i64, stream: LogStream, message: &str) -> LogEntry {
    LogEntry {
        timestamp: ts(secs),
        stream,
        message: message.to_string(),
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn wait_until<F: FnMut() -> bool>(mut cond: F) {
    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(2);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
    }
}
