// Action dispatcher: start/stop/restart with one in-flight action per container id,
// optimistic Store transitions, rollback on failure and a corrective refresh afterwards.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::{ActionError, EngineError};
use crate::models::ContainerState;
use crate::poller::RefreshHandle;
use crate::store::{InventoryStore, Precondition, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Start,
    Stop,
    Restart,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
        }
    }

    /// State the container is expected to reach once the engine accepts the action.
    pub fn target_state(&self) -> ContainerState {
        match self {
            Action::Start | Action::Restart => ContainerState::Running,
            Action::Stop => ContainerState::Exited,
        }
    }

    /// Whether the action may go to the engine given the last known state.
    /// Restart needs a running container; stopping an exited one is a no-op.
    pub fn precondition(&self, current: Option<ContainerState>) -> Precondition {
        match (self, current) {
            (Action::Restart, Some(ContainerState::Running)) => Precondition::Proceed,
            (Action::Restart, _) => Precondition::Reject,
            (Action::Stop, Some(ContainerState::Exited)) => Precondition::Skip,
            _ => Precondition::Proceed,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action {0:?} (expected start, stop or restart)")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            "restart" => Ok(Action::Restart),
            _ => Err(UnknownAction(s.to_string())),
        }
    }
}

type InFlight = Arc<Mutex<HashSet<String>>>;

/// Holds a container id in the in-flight set; releases it on drop.
struct InFlightGuard {
    in_flight: InFlight,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

pub struct Dispatcher {
    engine: Arc<dyn Engine>,
    store: Arc<InventoryStore>,
    refresh: RefreshHandle,
    refresh_delay: Duration,
    in_flight: InFlight,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<dyn Engine>,
        store: Arc<InventoryStore>,
        refresh: RefreshHandle,
        refresh_delay: Duration,
    ) -> Self {
        Self {
            engine,
            store,
            refresh,
            refresh_delay,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Whether an action for `id` is currently pending at the engine.
    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    fn try_claim(&self, id: &str) -> Option<InFlightGuard> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            in_flight: self.in_flight.clone(),
            id: id.to_string(),
        })
    }

    /// Issue `action` for container `id`, waiting at most `timeout` for the engine.
    ///
    /// A second dispatch for the same id fails with `ActionInProgress` until the engine has
    /// answered the first, even if the first dispatch already returned `Timeout`.
    pub async fn dispatch(
        &self,
        id: &str,
        action: Action,
        timeout: Duration,
    ) -> Result<(), ActionError> {
        let guard = self
            .try_claim(id)
            .ok_or_else(|| ActionError::in_progress(id, action))?;

        let transition = self
            .store
            .apply_optimistic_if(id, action.target_state(), |current| {
                action.precondition(current)
            })
            .await;
        let token = match transition {
            Transition::Applied(token) => Some(token),
            Transition::Untracked => None,
            Transition::Skipped => {
                debug!(container = id, action = %action, "container already in target state");
                return Ok(());
            }
            Transition::Rejected(current) => {
                return Err(ActionError::invalid_state(id, action, current));
            }
        };

        // The engine call owns the claim: a timed-out dispatch keeps the id locked
        // until the engine has actually answered.
        let engine = self.engine.clone();
        let call_id = id.to_string();
        let call = tokio::spawn(async move {
            let _guard = guard;
            engine.perform(&call_id, action).await
        });
        let outcome = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(EngineError::Unreachable(format!("action task failed: {}", e))),
            Err(_) => Err(EngineError::Timeout(timeout)),
        };

        self.refresh.request_after(self.refresh_delay);

        match outcome {
            Ok(()) => {
                info!(container = id, action = %action, "action dispatched");
                Ok(())
            }
            Err(e) => {
                if let Some(token) = token {
                    self.store.rollback(id, token).await;
                }
                warn!(container = id, action = %action, error = %e, "action failed");
                Err(ActionError::engine(id, action, e))
            }
        }
    }
}
