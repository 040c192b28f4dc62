//! Planekit provisioning core
//!
//! This crate turns hand-written create/poll/delete call sequences against a
//! cloud control plane into declarative, dependency-aware plans with
//! deterministic, reversible teardown.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  plane CLI                       │
//! │             (apply / down / validate)            │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                planekit-core                     │
//! │  Orchestrator ─► ProvisioningPlan ─► ResourceStep│
//! │        │                                 │       │
//! │        │                          OperationPoller│
//! │        ▼                                 │       │
//! │  trait ResourceClient ◄──────────────────┘       │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │          planekit-http (REST dialect)            │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! A [`ResourceStep`] describes one action against one resource and the steps
//! it depends on. [`ProvisioningPlan`] orders steps so every dependency
//! precedes its dependents. The [`Orchestrator`] executes the plan forward,
//! driving long-running operations to terminal through [`OperationPoller`],
//! then tears created resources back down in reverse order, best effort, so
//! a partial failure never silently leaks billable resources.

pub mod client;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod poller;
pub mod step;

// Re-exports
pub use client::{OperationHandle, OperationStatus, ResourceClient, ResourceOutput, SubmitOutcome};
pub use context::{CancelHandle, RunContext};
pub use error::{ErrorDetail, ProvisionError, Result};
pub use orchestrator::{
    Orchestrator, RunOutcome, RunPolicy, RunState, StepReport, StepStatus, TeardownFailure,
    TeardownReport,
};
pub use plan::{PlanSummary, ProvisioningPlan};
pub use poller::{DEFAULT_POLL_INTERVAL, OperationPoller, PollConfig};
pub use step::{ResourceStep, StepAction};
