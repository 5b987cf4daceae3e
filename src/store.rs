// Inventory store: last known snapshot, reconcile/diff, optimistic transitions, change events.
//
// All mutation happens under one write lock with no await inside the critical section.
// Every write carries a sequence number from `begin_fetch`; writes older than the last
// applied one are discarded so a slow fetch can never overwrite newer data.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

use crate::models::{
    ChangeSet, ContainerRecord, ContainerState, ContainerStats, ContainerView, ImageRecord,
    InventoryEvent, InventorySummary, Provenance,
};

#[derive(Debug, Clone)]
struct ContainerEntry {
    record: ContainerRecord,
    provenance: Provenance,
    /// Sequence number of the write that produced this value.
    written_seq: u64,
}

#[derive(Default)]
struct StoreState {
    containers: HashMap<String, ContainerEntry>,
    images: HashMap<String, ImageRecord>,
    stats: HashMap<String, ContainerStats>,
    containers_seq: u64,
    images_seq: u64,
}

/// Token returned by [`InventoryStore::apply_optimistic`]; needed to roll that exact transition back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimisticToken {
    seq: u64,
    previous: ContainerState,
}

/// Verdict of the check passed to [`InventoryStore::apply_optimistic_if`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    Proceed,
    /// Nothing to do; leave the entry untouched.
    Skip,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied(OptimisticToken),
    /// The check passed but the container is not in the snapshot.
    Untracked,
    Skipped,
    /// The check refused; carries the state it saw.
    Rejected(Option<ContainerState>),
}

pub struct InventoryStore {
    state: RwLock<StoreState>,
    next_seq: AtomicU64,
    events: broadcast::Sender<InventoryEvent>,
}

impl InventoryStore {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            state: RwLock::new(StoreState::default()),
            next_seq: AtomicU64::new(1),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InventoryEvent> {
        self.events.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Take a sequence number before starting a fetch; pass it to the matching reconcile.
    pub fn begin_fetch(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Replace the container snapshot. Returns `None` when `seq` is stale and nothing was applied.
    pub async fn reconcile_containers(
        &self,
        seq: u64,
        snapshot: Vec<ContainerRecord>,
    ) -> Option<ChangeSet> {
        let incoming = index_by_id(snapshot, |r| &r.id);

        let mut state = self.state.write().await;
        if seq <= state.containers_seq {
            debug!(
                seq,
                applied = state.containers_seq,
                "discarding stale container snapshot"
            );
            return None;
        }

        let mut changes = ChangeSet::default();
        for (id, old) in &state.containers {
            match incoming.get(id) {
                None => changes.removed.push(id.clone()),
                Some(new) if *new != old.record => changes.changed.push(id.clone()),
                Some(_) => {}
            }
        }
        for id in incoming.keys() {
            if !state.containers.contains_key(id) {
                changes.added.push(id.clone());
            }
        }
        changes.sort();

        // Stats only exist for containers that are still present and running.
        state.stats.retain(|id, _| {
            incoming
                .get(id)
                .is_some_and(|r| r.state == ContainerState::Running)
        });
        state.containers = incoming
            .into_iter()
            .map(|(id, record)| {
                (
                    id,
                    ContainerEntry {
                        record,
                        provenance: Provenance::Confirmed,
                        written_seq: seq,
                    },
                )
            })
            .collect();
        state.containers_seq = seq;
        drop(state);

        if !changes.is_empty() {
            self.publish(InventoryEvent::Containers {
                seq,
                changes: changes.clone(),
            });
        }
        Some(changes)
    }

    /// Replace the image snapshot. Returns `None` when `seq` is stale.
    pub async fn reconcile_images(&self, seq: u64, snapshot: Vec<ImageRecord>) -> Option<ChangeSet> {
        let incoming = index_by_id(snapshot, |r| &r.id);

        let mut state = self.state.write().await;
        if seq <= state.images_seq {
            debug!(seq, applied = state.images_seq, "discarding stale image snapshot");
            return None;
        }

        let mut changes = ChangeSet::default();
        for (id, old) in &state.images {
            match incoming.get(id) {
                None => changes.removed.push(id.clone()),
                Some(new) if !new.same_attributes(old) => changes.changed.push(id.clone()),
                Some(_) => {}
            }
        }
        for id in incoming.keys() {
            if !state.images.contains_key(id) {
                changes.added.push(id.clone());
            }
        }
        changes.sort();

        state.images = incoming;
        state.images_seq = seq;
        drop(state);

        if !changes.is_empty() {
            self.publish(InventoryEvent::Images {
                seq,
                changes: changes.clone(),
            });
        }
        Some(changes)
    }

    /// Record fresh stats samples. Samples for containers that are gone or not running are dropped.
    pub async fn update_stats(&self, samples: Vec<ContainerStats>) {
        let mut state = self.state.write().await;
        let mut accepted = Vec::with_capacity(samples.len());
        for s in samples {
            let running = state
                .containers
                .get(&s.id)
                .is_some_and(|e| e.record.state == ContainerState::Running);
            if running {
                state.stats.insert(s.id.clone(), s.clone());
                accepted.push(s);
            }
        }
        drop(state);
        if !accepted.is_empty() {
            self.publish(InventoryEvent::Stats { stats: accepted });
        }
    }

    /// Provisionally move a container to `target`. Reserves a sequence number so fetches that
    /// began earlier are discarded. Returns `None` if the container is unknown.
    pub async fn apply_optimistic(
        &self,
        id: &str,
        target: ContainerState,
    ) -> Option<OptimisticToken> {
        match self
            .apply_optimistic_if(id, target, |_| Precondition::Proceed)
            .await
        {
            Transition::Applied(token) => Some(token),
            _ => None,
        }
    }

    /// Like [`apply_optimistic`](Self::apply_optimistic), but `check` first decides from the
    /// current state. The check and the write happen under the same lock, so no reconcile
    /// can land between them.
    pub async fn apply_optimistic_if(
        &self,
        id: &str,
        target: ContainerState,
        check: impl FnOnce(Option<ContainerState>) -> Precondition,
    ) -> Transition {
        let mut state = self.state.write().await;
        let current = state.containers.get(id).map(|e| e.record.state);
        match check(current) {
            Precondition::Proceed => {}
            Precondition::Skip => return Transition::Skipped,
            Precondition::Reject => return Transition::Rejected(current),
        }
        let Some(entry) = state.containers.get_mut(id) else {
            return Transition::Untracked;
        };
        let seq = self.begin_fetch();
        // Rolling back restores what was on display, even if that was itself optimistic.
        let previous = entry.record.state;
        entry.record.state = target;
        entry.provenance = Provenance::Optimistic { previous };
        entry.written_seq = seq;
        if target != ContainerState::Running {
            state.stats.remove(id);
        }
        state.containers_seq = state.containers_seq.max(seq);
        drop(state);

        self.publish(InventoryEvent::Provisional {
            id: id.to_string(),
            state: target,
            rolled_back: false,
        });
        Transition::Applied(OptimisticToken { seq, previous })
    }

    /// Revert an optimistic transition, unless a newer snapshot has already replaced it.
    /// Returns whether the revert happened.
    pub async fn rollback(&self, id: &str, token: OptimisticToken) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.containers.get_mut(id) else {
            return false;
        };
        if entry.written_seq != token.seq || !entry.provenance.is_optimistic() {
            return false;
        }
        entry.record.state = token.previous;
        entry.provenance = Provenance::RolledBack;
        drop(state);

        warn!(container = id, state = %token.previous, "optimistic state rolled back");
        self.publish(InventoryEvent::Provisional {
            id: id.to_string(),
            state: token.previous,
            rolled_back: true,
        });
        true
    }

    pub async fn container(&self, id: &str) -> Option<ContainerView> {
        let state = self.state.read().await;
        state.containers.get(id).map(|e| view(e, &state.stats))
    }

    pub async fn container_state(&self, id: &str) -> Option<ContainerState> {
        let state = self.state.read().await;
        state.containers.get(id).map(|e| e.record.state)
    }

    /// All containers sorted by name.
    pub async fn containers(&self) -> Vec<ContainerView> {
        let state = self.state.read().await;
        let mut out: Vec<ContainerView> = state
            .containers
            .values()
            .map(|e| view(e, &state.stats))
            .collect();
        out.sort_by(|a, b| a.record.name.cmp(&b.record.name));
        out
    }

    pub async fn running_ids(&self) -> Vec<String> {
        let state = self.state.read().await;
        state
            .containers
            .values()
            .filter(|e| e.record.state == ContainerState::Running)
            .map(|e| e.record.id.clone())
            .collect()
    }

    pub async fn stats(&self, id: &str) -> Option<ContainerStats> {
        self.state.read().await.stats.get(id).cloned()
    }

    /// All images with `container_count` derived from the current containers, newest first.
    pub async fn images(&self) -> Vec<ImageRecord> {
        let state = self.state.read().await;
        let mut out: Vec<ImageRecord> = state
            .images
            .values()
            .map(|i| with_container_count(i, &state.containers))
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn image(&self, id: &str) -> Option<ImageRecord> {
        let state = self.state.read().await;
        state
            .images
            .get(id)
            .map(|i| with_container_count(i, &state.containers))
    }

    pub async fn summary(&self) -> InventorySummary {
        let state = self.state.read().await;
        let mut s = InventorySummary {
            containers: state.containers.len(),
            images: state.images.len(),
            ..Default::default()
        };
        for e in state.containers.values() {
            match e.record.state {
                ContainerState::Running => s.running += 1,
                ContainerState::Paused => s.paused += 1,
                _ => s.stopped += 1,
            }
            if e.provenance.is_optimistic() {
                s.pending += 1;
            }
        }
        s
    }

    fn publish(&self, event: InventoryEvent) {
        // No receivers is normal when no observer is connected.
        let _ = self.events.send(event);
    }
}

fn view(entry: &ContainerEntry, stats: &HashMap<String, ContainerStats>) -> ContainerView {
    ContainerView {
        record: entry.record.clone(),
        provenance: entry.provenance,
        stats: stats.get(&entry.record.id).cloned(),
    }
}

fn with_container_count(
    image: &ImageRecord,
    containers: &HashMap<String, ContainerEntry>,
) -> ImageRecord {
    let mut out = image.clone();
    out.container_count = containers
        .values()
        .filter(|e| image.is_used_by(&e.record.image, &e.record.image_id))
        .count();
    out
}

/// Index a snapshot by id. Duplicate ids keep the last occurrence.
fn index_by_id<T>(items: Vec<T>, id: impl Fn(&T) -> &String) -> HashMap<String, T> {
    let mut seen = HashSet::with_capacity(items.len());
    let mut out = HashMap::with_capacity(items.len());
    for item in items {
        let key = id(&item).clone();
        if !seen.insert(key.clone()) {
            warn!(id = %key, "duplicate id in snapshot; keeping last occurrence");
        }
        out.insert(key, item);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(id: &str, state: ContainerState) -> ContainerRecord {
        ContainerRecord {
            id: id.to_string(),
            name: format!("name-{}", id),
            image: "nginx:latest".into(),
            image_id: String::new(),
            command: "nginx".into(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            state,
            ports: vec![],
            labels: HashMap::new(),
            mounts: vec![],
        }
    }

    #[test]
    fn index_by_id_keeps_last_duplicate() {
        let mut second = record("a", ContainerState::Exited);
        second.name = "second".into();
        let idx = index_by_id(vec![record("a", ContainerState::Running), second], |r| &r.id);
        assert_eq!(idx.len(), 1);
        assert_eq!(idx["a"].name, "second");
    }

    #[tokio::test]
    async fn optimistic_reserves_sequence_over_earlier_fetches() {
        let store = InventoryStore::new(8);
        let seq = store.begin_fetch();
        store
            .reconcile_containers(seq, vec![record("a", ContainerState::Exited)])
            .await
            .unwrap();

        let in_flight = store.begin_fetch();
        store
            .apply_optimistic("a", ContainerState::Running)
            .await
            .unwrap();
        // A fetch that began before the optimistic write must not clobber it.
        assert!(
            store
                .reconcile_containers(in_flight, vec![record("a", ContainerState::Exited)])
                .await
                .is_none()
        );
        assert_eq!(
            store.container_state("a").await,
            Some(ContainerState::Running)
        );
    }

    #[tokio::test]
    async fn rollback_is_skipped_after_newer_snapshot() {
        let store = InventoryStore::new(8);
        store
            .reconcile_containers(store.begin_fetch(), vec![record("a", ContainerState::Running)])
            .await
            .unwrap();
        let token = store
            .apply_optimistic("a", ContainerState::Exited)
            .await
            .unwrap();
        store
            .reconcile_containers(store.begin_fetch(), vec![record("a", ContainerState::Exited)])
            .await
            .unwrap();
        assert!(!store.rollback("a", token).await);
        let v = store.container("a").await.unwrap();
        assert_eq!(v.record.state, ContainerState::Exited);
        assert_eq!(v.provenance, Provenance::Confirmed);
    }

    #[tokio::test]
    async fn chained_optimistic_rollback_restores_displayed_state() {
        let store = InventoryStore::new(8);
        store
            .reconcile_containers(store.begin_fetch(), vec![record("a", ContainerState::Exited)])
            .await
            .unwrap();
        store
            .apply_optimistic("a", ContainerState::Running)
            .await
            .unwrap();
        let second = store
            .apply_optimistic("a", ContainerState::Exited)
            .await
            .unwrap();
        assert_eq!(
            store.container("a").await.unwrap().provenance,
            Provenance::Optimistic {
                previous: ContainerState::Running
            }
        );

        assert!(store.rollback("a", second).await);
        assert_eq!(
            store.container_state("a").await,
            Some(ContainerState::Running)
        );
    }

    #[tokio::test]
    async fn rejected_check_leaves_entry_untouched() {
        let store = InventoryStore::new(8);
        store
            .reconcile_containers(store.begin_fetch(), vec![record("a", ContainerState::Exited)])
            .await
            .unwrap();
        let mut rx = store.subscribe();

        let mut seen = None;
        let outcome = store
            .apply_optimistic_if("a", ContainerState::Running, |current| {
                seen = Some(current);
                Precondition::Reject
            })
            .await;
        assert_eq!(outcome, Transition::Rejected(Some(ContainerState::Exited)));
        assert_eq!(seen, Some(Some(ContainerState::Exited)));

        let outcome = store
            .apply_optimistic_if("a", ContainerState::Exited, |_| Precondition::Skip)
            .await;
        assert_eq!(outcome, Transition::Skipped);

        let v = store.container("a").await.unwrap();
        assert_eq!(v.record.state, ContainerState::Exited);
        assert_eq!(v.provenance, Provenance::Confirmed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn passing_check_on_unknown_container_is_untracked() {
        let store = InventoryStore::new(8);
        let outcome = store
            .apply_optimistic_if("missing", ContainerState::Running, |current| {
                assert_eq!(current, None);
                Precondition::Proceed
            })
            .await;
        assert_eq!(outcome, Transition::Untracked);
    }

    #[tokio::test]
    async fn apply_optimistic_unknown_container_is_none() {
        let store = InventoryStore::new(8);
        assert!(
            store
                .apply_optimistic("missing", ContainerState::Running)
                .await
                .is_none()
        );
    }
}
