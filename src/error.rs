// Error taxonomy shared by fetcher, dispatcher and log tail

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::models::ContainerState;

/// Coarse error classification exposed to callers and the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Transport failure; retryable.
    EngineUnreachable,
    /// Non-2xx response or malformed payload; not retryable without change.
    EngineError,
    InvalidState,
    ActionInProgress,
    Timeout,
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("engine unreachable: {0}")]
    Unreachable(String),
    #[error("engine returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("malformed engine payload: {0}")]
    Malformed(String),
    #[error("engine call timed out after {0:?}")]
    Timeout(Duration),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Unreachable(_) => ErrorKind::EngineUnreachable,
            EngineError::Api { .. } | EngineError::Malformed(_) => ErrorKind::EngineError,
            EngineError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Unreachable(_) | EngineError::Timeout(_)
        )
    }
}

/// Runs `fut` with a deadline, mapping expiry to [`EngineError::Timeout`].
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, EngineError>
where
    F: std::future::Future<Output = Result<T, EngineError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(r) => r,
        Err(_) => Err(EngineError::Timeout(timeout)),
    }
}

#[derive(Debug, Clone, Error)]
#[error("{action} {container_id} failed ({kind:?}){}", cause_suffix(.cause, .current))]
pub struct ActionError {
    pub kind: ErrorKind,
    pub container_id: String,
    pub action: crate::dispatcher::Action,
    /// Known state when the action was rejected for [`ErrorKind::InvalidState`].
    pub current: Option<ContainerState>,
    #[source]
    pub cause: Option<EngineError>,
}

fn cause_suffix(cause: &Option<EngineError>, current: &Option<ContainerState>) -> String {
    match (cause, current) {
        (Some(e), _) => format!(": {}", e),
        (None, Some(s)) => format!(": container is {}", s),
        (None, None) => String::new(),
    }
}

impl ActionError {
    pub(crate) fn in_progress(container_id: &str, action: crate::dispatcher::Action) -> Self {
        Self {
            kind: ErrorKind::ActionInProgress,
            container_id: container_id.to_string(),
            action,
            current: None,
            cause: None,
        }
    }

    pub(crate) fn invalid_state(
        container_id: &str,
        action: crate::dispatcher::Action,
        current: Option<ContainerState>,
    ) -> Self {
        Self {
            kind: ErrorKind::InvalidState,
            container_id: container_id.to_string(),
            action,
            current,
            cause: None,
        }
    }

    pub(crate) fn engine(
        container_id: &str,
        action: crate::dispatcher::Action,
        cause: EngineError,
    ) -> Self {
        Self {
            kind: cause.kind(),
            container_id: container_id.to_string(),
            action,
            current: None,
            cause: Some(cause),
        }
    }
}
