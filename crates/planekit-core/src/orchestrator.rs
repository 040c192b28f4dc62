//! Plan execution and teardown
//!
//! The orchestrator runs a plan forward to completion or first failure and
//! then, unless the policy retains resources, tears the created resources
//! back down in reverse order:
//!
//! ```text
//! Idle -> Provisioning -> {Provisioned, PartiallyFailed}
//!                              -> (TearingDown) -> {Cleaned, TeardownFailed}
//! ```
//!
//! Independent steps run as concurrent tasks; dependent steps wait on their
//! dependencies' published results. The first failure stops scheduling of
//! not-yet-started steps; in-flight independent steps finish and their
//! resources are torn down with the rest.

use crate::client::{ResourceClient, ResourceOutput};
use crate::context::RunContext;
use crate::plan::ProvisioningPlan;
use crate::poller::{DEFAULT_POLL_INTERVAL, PollConfig};
use crate::step::{ResourceStep, StepAction};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;

/// Policy for one run.
#[derive(Debug, Clone)]
pub struct RunPolicy {
    /// Delete created resources when the run finishes, including after a
    /// partial failure
    pub tear_down_on_exit: bool,

    /// Cap on concurrently executing steps; `None` leaves it unbounded
    /// (remote APIs are usually the bottleneck)
    pub parallelism: Option<usize>,

    /// Per-operation polling budget
    pub poll_timeout: Option<Duration>,

    /// Transient-failure retry budget per operation
    pub max_retries: u32,

    /// Interval between status polls when the control plane supplies no hint
    pub poll_interval: Duration,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            tear_down_on_exit: true,
            parallelism: None,
            poll_timeout: None,
            max_retries: 5,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl RunPolicy {
    pub fn keep_resources(mut self) -> Self {
        self.tear_down_on_exit = false;
        self
    }

    fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: self.poll_interval,
            max_attempts: self.max_retries.max(1),
            timeout: self.poll_timeout,
            ..PollConfig::default()
        }
    }
}

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Provisioning,
    Provisioned,
    PartiallyFailed,
    TearingDown,
    Cleaned,
    TeardownFailed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Provisioning => write!(f, "provisioning"),
            RunState::Provisioned => write!(f, "provisioned"),
            RunState::PartiallyFailed => write!(f, "partially-failed"),
            RunState::TearingDown => write!(f, "tearing-down"),
            RunState::Cleaned => write!(f, "cleaned"),
            RunState::TeardownFailed => write!(f, "teardown-failed"),
        }
    }
}

/// Final status of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    NotAttempted,
}

/// Per-step entry in a [`RunOutcome`].
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub id: String,
    pub status: StepStatus,

    /// Remote resource ID, when the step created or read one
    pub resource_id: Option<String>,

    pub error: Option<String>,
    pub elapsed: Duration,
}

/// One failed delete during teardown: a potentially leaked remote resource.
#[derive(Debug, Clone, Serialize)]
pub struct TeardownFailure {
    pub step_id: String,
    pub kind: String,
    pub name: String,
    pub error: String,
}

/// Teardown results. `failures` lists every resource left behind; it is
/// never silently swallowed because leaked billable resources are the worst
/// outcome.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TeardownReport {
    pub deleted: Vec<String>,
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Full report of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub state: RunState,

    /// Step reports in plan order
    pub steps: Vec<StepReport>,

    pub teardown: Option<TeardownReport>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl RunOutcome {
    /// Whether every forward step succeeded.
    pub fn provisioning_succeeded(&self) -> bool {
        self.steps
            .iter()
            .all(|report| report.status == StepStatus::Succeeded)
    }

    /// Whether the run as a whole succeeded: all steps provisioned and, if
    /// teardown ran, nothing was left behind.
    pub fn is_success(&self) -> bool {
        self.provisioning_succeeded()
            && self
                .teardown
                .as_ref()
                .map(|report| report.is_clean())
                .unwrap_or(true)
    }

    pub fn step(&self, id: &str) -> Option<&StepReport> {
        self.steps.iter().find(|report| report.id == id)
    }
}

/// Result a step publishes for its dependents.
#[derive(Debug, Clone)]
enum StepSignal {
    Succeeded(ResourceOutput),
    Failed,
    Skipped,
}

/// Executes a [`ProvisioningPlan`] forward and, when requested, tears the
/// created resources back down in reverse order.
pub struct Orchestrator {
    client: Arc<dyn ResourceClient>,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn ResourceClient>) -> Self {
        Self { client }
    }

    /// Run the plan to completion or first failure, then tear down per
    /// policy.
    ///
    /// Never returns an error: every failure mode (partial provisioning,
    /// teardown leaks, cancellation) is reported in the outcome so the
    /// caller always sees what exists remotely.
    pub async fn run(
        &self,
        plan: &ProvisioningPlan,
        policy: &RunPolicy,
        ctx: &RunContext,
    ) -> RunOutcome {
        let started_at = Utc::now();
        let started = Instant::now();
        tracing::info!(state = %RunState::Provisioning, steps = plan.len(), "run started");

        let reports = self.provision(plan, policy, ctx).await;

        let completed: HashSet<String> = reports
            .iter()
            .filter(|report| report.status == StepStatus::Succeeded)
            .map(|report| report.id.clone())
            .collect();
        let forward_state = if completed.len() == reports.len() {
            RunState::Provisioned
        } else {
            RunState::PartiallyFailed
        };
        tracing::info!(state = %forward_state, completed = completed.len(),
            total = reports.len(), "forward pass finished");

        let (state, teardown) = if policy.tear_down_on_exit {
            tracing::info!(state = %RunState::TearingDown, "tearing down created resources");
            let report = self.tear_down(plan, &completed, policy, ctx).await;
            let state = if report.is_clean() {
                RunState::Cleaned
            } else {
                RunState::TeardownFailed
            };
            (state, Some(report))
        } else {
            (forward_state, None)
        };

        tracing::info!(state = %state, "run finished");
        RunOutcome {
            state,
            steps: reports,
            teardown,
            started_at,
            duration: started.elapsed(),
        }
    }

    /// Forward pass. Spawns one task per step; dependency edges are awaited
    /// through per-step watch channels, so a step observes only terminal
    /// results from its dependencies.
    async fn provision(
        &self,
        plan: &ProvisioningPlan,
        policy: &RunPolicy,
        ctx: &RunContext,
    ) -> Vec<StepReport> {
        let poll = policy.poll_config();
        let semaphore = policy
            .parallelism
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        let halted = Arc::new(AtomicBool::new(false));

        let mut txs: HashMap<String, watch::Sender<Option<StepSignal>>> = HashMap::new();
        let mut rxs: HashMap<String, watch::Receiver<Option<StepSignal>>> = HashMap::new();
        for step in plan.steps() {
            let (tx, rx) = watch::channel(None);
            txs.insert(step.id.clone(), tx);
            rxs.insert(step.id.clone(), rx);
        }

        let mut tasks = JoinSet::new();
        for step in plan.steps().iter().cloned() {
            let Some(tx) = txs.remove(&step.id) else {
                continue;
            };
            let dep_rxs: Vec<(String, watch::Receiver<Option<StepSignal>>)> = step
                .depends_on
                .iter()
                .filter_map(|dep| rxs.get(dep).map(|rx| (dep.clone(), rx.clone())))
                .collect();

            let client = Arc::clone(&self.client);
            let ctx = ctx.clone();
            let poll = poll.clone();
            let halted = Arc::clone(&halted);
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                run_step(step, client, ctx, poll, dep_rxs, tx, halted, semaphore).await
            });
        }
        drop(rxs);

        let mut by_id: HashMap<String, StepReport> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    by_id.insert(report.id.clone(), report);
                }
                Err(err) => {
                    tracing::error!(error = %err, "step task aborted");
                }
            }
        }

        plan.steps()
            .iter()
            .map(|step| {
                by_id.remove(&step.id).unwrap_or_else(|| StepReport {
                    id: step.id.clone(),
                    status: StepStatus::NotAttempted,
                    resource_id: None,
                    error: Some("step task aborted".to_string()),
                    elapsed: Duration::ZERO,
                })
            })
            .collect()
    }

    /// Delete, in reverse plan order, the resources the completed create
    /// steps produced. Best effort: a failed delete is recorded and the loop
    /// moves on, so one stuck resource never blocks the rest.
    pub async fn tear_down(
        &self,
        plan: &ProvisioningPlan,
        completed: &HashSet<String>,
        policy: &RunPolicy,
        ctx: &RunContext,
    ) -> TeardownReport {
        let poll = policy.poll_config();
        let mut report = TeardownReport::default();
        let targets = plan.teardown_order(completed);
        tracing::info!(resources = targets.len(), "teardown started");

        let no_inputs = HashMap::new();
        for step in targets {
            let delete =
                ResourceStep::delete(format!("delete-{}", step.id), &step.kind, &step.name);
            match delete
                .execute(self.client.as_ref(), ctx, &poll, &no_inputs)
                .await
            {
                Ok(_) => {
                    tracing::info!(step = %step.id, kind = %step.kind, name = %step.name,
                        "resource deleted");
                    report.deleted.push(step.id.clone());
                }
                Err(err) => {
                    tracing::error!(step = %step.id, kind = %step.kind, name = %step.name,
                        error = %err, "delete failed, resource may be leaked");
                    report.failures.push(TeardownFailure {
                        step_id: step.id.clone(),
                        kind: step.kind.clone(),
                        name: step.name.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }
        report
    }

    /// Tear down every resource the plan's create steps would produce,
    /// whether or not this process created them. Used for standalone
    /// cleanup of a previously provisioned plan.
    pub async fn tear_down_all(
        &self,
        plan: &ProvisioningPlan,
        policy: &RunPolicy,
        ctx: &RunContext,
    ) -> TeardownReport {
        let all: HashSet<String> = plan
            .steps()
            .iter()
            .filter(|step| step.action == StepAction::CreateOrUpdate)
            .map(|step| step.id.clone())
            .collect();
        self.tear_down(plan, &all, policy, ctx).await
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_step(
    step: ResourceStep,
    client: Arc<dyn ResourceClient>,
    ctx: RunContext,
    poll: PollConfig,
    mut dep_rxs: Vec<(String, watch::Receiver<Option<StepSignal>>)>,
    tx: watch::Sender<Option<StepSignal>>,
    halted: Arc<AtomicBool>,
    semaphore: Option<Arc<Semaphore>>,
) -> StepReport {
    // A step observes only terminal, succeeded dependency results.
    let mut inputs = HashMap::with_capacity(dep_rxs.len());
    for (dep_id, rx) in &mut dep_rxs {
        match await_signal(rx).await {
            Some(StepSignal::Succeeded(output)) => {
                inputs.insert(dep_id.clone(), output);
            }
            _ => {
                let _ = tx.send(Some(StepSignal::Skipped));
                return StepReport {
                    id: step.id,
                    status: StepStatus::NotAttempted,
                    resource_id: None,
                    error: Some(format!("dependency '{dep_id}' did not complete")),
                    elapsed: Duration::ZERO,
                };
            }
        }
    }

    let _permit = match &semaphore {
        Some(sem) => match Arc::clone(sem).acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => None,
        },
        None => None,
    };

    if halted.load(Ordering::SeqCst) || ctx.is_canceled() {
        let _ = tx.send(Some(StepSignal::Skipped));
        return StepReport {
            id: step.id,
            status: StepStatus::NotAttempted,
            resource_id: None,
            error: Some("run halted before step started".to_string()),
            elapsed: Duration::ZERO,
        };
    }

    tracing::info!(step = %step.id, kind = %step.kind, action = %step.action, "executing step");
    let started = Instant::now();
    match step.execute(client.as_ref(), &ctx, &poll, &inputs).await {
        Ok(output) => {
            let report = StepReport {
                id: step.id.clone(),
                status: StepStatus::Succeeded,
                resource_id: output.resource_id.clone(),
                error: None,
                elapsed: started.elapsed(),
            };
            tracing::info!(step = %step.id, elapsed = ?report.elapsed, "step succeeded");
            let _ = tx.send(Some(StepSignal::Succeeded(output)));
            report
        }
        Err(err) => {
            halted.store(true, Ordering::SeqCst);
            tracing::error!(step = %step.id, error = %err, "step failed, halting forward pass");
            let _ = tx.send(Some(StepSignal::Failed));
            StepReport {
                id: step.id,
                status: StepStatus::Failed,
                resource_id: None,
                error: Some(err.to_string()),
                elapsed: started.elapsed(),
            }
        }
    }
}

/// Wait for a step's published signal. `None` when the publishing task died
/// without sending; dependents treat that as not-completed.
async fn await_signal(rx: &mut watch::Receiver<Option<StepSignal>>) -> Option<StepSignal> {
    loop {
        let current = rx.borrow().clone();
        if current.is_some() {
            return current;
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}
