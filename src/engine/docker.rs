// Docker engine via bollard. Translates Docker API shapes into the canonical models.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::query_parameters::{
    ListContainersOptions, ListImagesOptions, LogsOptions, RestartContainerOptions,
    StartContainerOptions, StatsOptions, StopContainerOptions,
};
use bollard::models::{ContainerSummary, ImageSummary};
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{StreamExt, TryStreamExt};
use tracing::debug;

use super::stats::process_statistics;
use super::{Engine, LogQuery};
use crate::dispatcher::Action;
use crate::error::EngineError;
use crate::models::{
    ContainerRecord, ContainerState, ContainerStats, EngineInfo, ImageRecord, LogEntry,
    LogStream, MountPoint, PortMapping,
};

/// Client-side timeout handed to bollard; callers apply their own, shorter deadlines.
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Docker answers 304 when a container is already in the requested state.
const NOT_MODIFIED: u16 = 304;

/// Concurrent `inspect_image` calls while filling the platform cache.
const INSPECT_CONCURRENCY: usize = 8;

pub struct DockerEngine {
    docker: Docker,
    platforms: PlatformCache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Platform {
    arch: String,
    os: String,
}

/// Architecture and OS by image id. The id is a content digest, so a cached
/// entry stays valid for as long as the image exists.
#[derive(Default)]
struct PlatformCache {
    by_id: Mutex<HashMap<String, Platform>>,
}

impl PlatformCache {
    /// Ids in `records` that have never been inspected successfully.
    fn missing(&self, records: &[ImageRecord]) -> Vec<String> {
        let by_id = self.by_id.lock().unwrap_or_else(PoisonError::into_inner);
        records
            .iter()
            .filter(|r| !by_id.contains_key(&r.id))
            .map(|r| r.id.clone())
            .collect()
    }

    fn insert(&self, id: String, platform: Platform) {
        self.by_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, platform);
    }

    /// Fill arch and os from the cache, then forget images that are no longer listed.
    fn apply(&self, records: &mut [ImageRecord]) {
        let mut by_id = self.by_id.lock().unwrap_or_else(PoisonError::into_inner);
        for r in records.iter_mut() {
            if let Some(p) = by_id.get(&r.id) {
                r.arch = p.arch.clone();
                r.os = p.os.clone();
            }
        }
        let listed: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        by_id.retain(|id, _| listed.contains(id.as_str()));
    }
}

impl DockerEngine {
    /// Connect to `socket` (`unix://...`, `tcp://...` or `http://...`) or the local default.
    pub fn connect(socket: Option<&str>) -> anyhow::Result<Self> {
        let docker = match socket {
            None => Docker::connect_with_local_defaults()?,
            Some(s) if s.starts_with("unix://") => Docker::connect_with_socket(
                s,
                CLIENT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            )?,
            Some(s) => {
                Docker::connect_with_http(s, CLIENT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)?
            }
        };
        Ok(Self {
            docker,
            platforms: PlatformCache::default(),
        })
    }
}

#[async_trait]
impl Engine for DockerEngine {
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, EngineError> {
        let options = ListContainersOptions {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(classify)?;
        Ok(containers.into_iter().filter_map(container_record).collect())
    }

    async fn list_images(&self) -> Result<Vec<ImageRecord>, EngineError> {
        let options = ListImagesOptions {
            all: false,
            ..Default::default()
        };
        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(classify)?;

        let mut records: Vec<ImageRecord> = images.into_iter().map(image_record).collect();

        // Platform is only available from inspect, so only new images are inspected.
        // An image deleted since the listing keeps empty fields and is retried next time.
        let missing = self.platforms.missing(&records);
        if !missing.is_empty() {
            debug!(count = missing.len(), "inspecting new images");
            let inspected: Vec<_> = futures_util::stream::iter(missing)
                .map(|id| async move {
                    let result = self.docker.inspect_image(&id).await;
                    (id, result)
                })
                .buffer_unordered(INSPECT_CONCURRENCY)
                .collect()
                .await;
            for (id, result) in inspected {
                match result {
                    Ok(inspect) => self.platforms.insert(
                        id,
                        Platform {
                            arch: inspect.architecture.unwrap_or_default(),
                            os: inspect.os.unwrap_or_default(),
                        },
                    ),
                    Err(e) => debug!(image = %id, error = %e, "inspect_image failed"),
                }
            }
        }
        self.platforms.apply(&mut records);
        Ok(records)
    }

    async fn container_stats(&self, id: &str) -> Result<Option<ContainerStats>, EngineError> {
        let options = StatsOptions {
            stream: false,
            ..Default::default()
        };
        let mut stream = self.docker.stats(id, Some(options));
        match stream.next().await {
            Some(Ok(s)) => Ok(process_statistics(&s, id)),
            Some(Err(e)) => Err(classify(e)),
            None => Ok(None),
        }
    }

    async fn info(&self) -> Result<EngineInfo, EngineError> {
        let info = self.docker.info().await.map_err(classify)?;
        let count = |v: Option<i64>| v.unwrap_or(0).max(0) as u64;
        Ok(EngineInfo {
            containers: count(info.containers),
            containers_running: count(info.containers_running),
            containers_paused: count(info.containers_paused),
            containers_stopped: count(info.containers_stopped),
            images: count(info.images),
            mem_total_bytes: count(info.mem_total),
            cpus: count(info.ncpu),
            server_version: info.server_version.unwrap_or_default(),
            operating_system: info.operating_system.unwrap_or_default(),
            architecture: info.architecture.unwrap_or_default(),
        })
    }

    async fn perform(&self, id: &str, action: Action) -> Result<(), EngineError> {
        let result = match action {
            Action::Start => {
                self.docker
                    .start_container(id, None::<StartContainerOptions>)
                    .await
            }
            Action::Stop => {
                self.docker
                    .stop_container(id, None::<StopContainerOptions>)
                    .await
            }
            Action::Restart => {
                self.docker
                    .restart_container(id, None::<RestartContainerOptions>)
                    .await
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code, .. })
                if status_code == NOT_MODIFIED =>
            {
                Ok(())
            }
            Err(e) => Err(classify(e)),
        }
    }

    async fn logs(&self, id: &str, query: LogQuery) -> Result<Vec<LogEntry>, EngineError> {
        let options = LogsOptions {
            stdout: true,
            stderr: true,
            timestamps: true,
            follow: false,
            since: query
                .since
                .map(|t| t.timestamp().clamp(0, i32::MAX as i64) as i32)
                .unwrap_or(0),
            tail: query
                .tail
                .map(|n| n.to_string())
                .unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };
        let frames: Vec<LogOutput> = self
            .docker
            .logs(id, Some(options))
            .try_collect()
            .await
            .map_err(classify)?;

        let mut entries = Vec::with_capacity(frames.len());
        for frame in frames {
            let (stream, message) = match frame {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    (LogStream::Stdout, message)
                }
                LogOutput::StdErr { message } => (LogStream::Stderr, message),
                LogOutput::StdIn { .. } => continue,
            };
            parse_frame(stream, &message, &mut entries);
        }
        Ok(entries)
    }
}

/// Map a bollard error onto the engine taxonomy.
fn classify(e: bollard::errors::Error) -> EngineError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Api {
            status: status_code,
            message,
        },
        bollard::errors::Error::JsonSerdeError { err } => EngineError::Malformed(err.to_string()),
        other => EngineError::Unreachable(other.to_string()),
    }
}

fn container_record(c: ContainerSummary) -> Option<ContainerRecord> {
    let id = c.id?;
    let name = c
        .names
        .as_ref()
        .and_then(|n| n.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_else(|| id.clone());
    let state = c
        .state
        .map(|s| ContainerState::from_docker(&s.to_string()))
        .unwrap_or(ContainerState::Unknown);
    let ports = c
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| PortMapping {
            private_port: p.private_port,
            public_port: p.public_port,
            protocol: p
                .typ
                .map(|t| t.to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "tcp".to_string()),
        })
        .collect();
    let mounts = c
        .mounts
        .unwrap_or_default()
        .into_iter()
        .map(|m| MountPoint {
            type_: m.typ.map(|t| t.to_string()).unwrap_or_default(),
            source: m.source.unwrap_or_default(),
            destination: m.destination.unwrap_or_default(),
            read_write: m.rw.unwrap_or(false),
        })
        .collect();

    Some(ContainerRecord {
        id,
        name,
        image: c.image.unwrap_or_default(),
        image_id: c.image_id.unwrap_or_default(),
        command: c.command.unwrap_or_default(),
        created_at: from_unix_secs(c.created.unwrap_or(0)),
        state,
        ports,
        labels: c.labels.unwrap_or_default(),
        mounts,
    })
}

fn image_record(i: ImageSummary) -> ImageRecord {
    ImageRecord {
        id: i.id,
        repo_tags: i
            .repo_tags
            .into_iter()
            .filter(|t| t != crate::models::UNTAGGED)
            .collect(),
        created_at: from_unix_secs(i.created),
        size_bytes: i.size.max(0) as u64,
        arch: String::new(),
        os: String::new(),
        labels: i.labels,
        container_count: 0,
    }
}

fn from_unix_secs(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Split one multiplexed frame into entries. Each line starts with an RFC 3339
/// timestamp (`timestamps=true`); lines without one inherit the previous entry's.
/// A leading line with nothing to inherit from is dropped.
pub(crate) fn parse_frame(stream: LogStream, bytes: &[u8], out: &mut Vec<LogEntry>) {
    let text = String::from_utf8_lossy(bytes);
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let parsed = line.split_once(' ').and_then(|(ts, rest)| {
            DateTime::parse_from_rfc3339(ts)
                .ok()
                .map(|t| (t.with_timezone(&Utc), rest))
        });
        let (timestamp, message) = match (parsed, out.last()) {
            (Some((t, rest)), _) => (t, rest),
            (None, Some(prev)) => (prev.timestamp, line),
            (None, None) => {
                debug!(line, "dropping log line without timestamp");
                continue;
            }
        };
        out.push(LogEntry {
            timestamp,
            stream,
            message: message.to_string(),
        });
    }
}
