//! Resource API client contract
//!
//! Every control-plane interaction goes through the [`ResourceClient`] trait,
//! polymorphic over resource kinds. The orchestrator never sees resource
//! schemas or wire formats, only submit outcomes, operation handles and
//! terminal results.

use crate::error::{ErrorDetail, Result};
use crate::step::StepAction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opaque token identifying one in-flight asynchronous remote operation.
///
/// Owned exclusively by the poller created for it.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    /// Polling locator (URL or operation ID) understood by the client that
    /// issued the handle
    pub locator: String,

    /// Minimum interval between status queries, when the control plane
    /// specifies one
    pub poll_interval: Option<Duration>,

    /// Overall budget for this operation; `None` defers to the caller's
    /// policy and context
    pub deadline: Option<Duration>,
}

impl OperationHandle {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            poll_interval: None,
            deadline: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Status of a remote operation. Once a terminal variant has been observed
/// no further transitions occur.
#[derive(Debug, Clone)]
pub enum OperationStatus {
    /// Still in flight; the control plane may hint when to ask again
    Running { retry_after: Option<Duration> },
    Succeeded(ResourceOutput),
    Failed(ErrorDetail),
    Canceled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Running { .. })
    }
}

/// Terminal result of a completed action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceOutput {
    /// Remote resource identifier, when the action produced or touched one
    pub resource_id: Option<String>,

    /// Resource body as returned by the control plane
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl ResourceOutput {
    pub fn new(resource_id: impl Into<String>, properties: serde_json::Value) -> Self {
        Self {
            resource_id: Some(resource_id.into()),
            properties,
        }
    }

    /// Output of a delete, or of deleting a resource that was already absent.
    pub fn absent() -> Self {
        Self {
            resource_id: None,
            properties: serde_json::Value::Null,
        }
    }

    /// Look up a field for placeholder resolution. `id` and `resource_id`
    /// resolve to the remote identifier; anything else is a dotted path into
    /// the properties body.
    pub fn field(&self, path: &str) -> Option<serde_json::Value> {
        if path == "id" || path == "resource_id" {
            return self
                .resource_id
                .as_ref()
                .map(|id| serde_json::Value::String(id.clone()));
        }
        let mut current = &self.properties;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }
}

/// Outcome of submitting an action: either the control plane completed it
/// within the request, or it accepted the action as a long-running operation
/// to be tracked via polling.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Complete(ResourceOutput),
    Accepted(OperationHandle),
}

/// Uniform contract to the remote control plane.
///
/// Implementations are expected to map throttling and 5xx-class failures to
/// retryable errors and all other rejections to
/// [`ProvisionError::RemoteRejected`](crate::ProvisionError::RemoteRejected).
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Submit one action against one resource.
    async fn submit(
        &self,
        action: StepAction,
        kind: &str,
        name: &str,
        body: &serde_json::Value,
    ) -> Result<SubmitOutcome>;

    /// Query the status of an in-flight operation. Must be side-effect free:
    /// polling the same handle repeatedly observes, never mutates.
    async fn query_status(&self, handle: &OperationHandle) -> Result<OperationStatus>;

    /// Fetch the current state of a resource; `None` when it does not exist.
    async fn fetch(&self, kind: &str, name: &str) -> Result<Option<ResourceOutput>>;
}
