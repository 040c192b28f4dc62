//! End-to-end orchestrator scenarios against an in-memory control plane.

use async_trait::async_trait;
use planekit_core::{
    ErrorDetail, OperationHandle, OperationStatus, Orchestrator, PlanSummary, ProvisionError,
    ProvisioningPlan, ResourceClient, ResourceOutput, ResourceStep, Result, RunContext, RunPolicy,
    RunState, StepAction, StepStatus, SubmitOutcome,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the fake control plane answers a create for one resource.
#[derive(Clone, Copy)]
enum Behavior {
    /// Completes within the request
    Sync,
    /// Accepted as an LRO that reports Running this many times first
    Polled(u32),
    /// Rejected outright
    Reject(u16, &'static str),
}

#[derive(Default)]
struct FakeControlPlane {
    behaviors: Mutex<HashMap<String, Behavior>>,
    delete_failures: Mutex<HashMap<String, ErrorDetail>>,
    calls: Mutex<Vec<String>>,
    operations: Mutex<HashMap<String, u32>>,
}

impl FakeControlPlane {
    fn new() -> Self {
        Self::default()
    }

    fn behave(&self, kind: &str, name: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(format!("{kind}/{name}"), behavior);
    }

    fn fail_delete(&self, kind: &str, name: &str, detail: ErrorDetail) {
        self.delete_failures
            .lock()
            .unwrap()
            .insert(format!("{kind}/{name}"), detail);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn output_for(key: &str) -> ResourceOutput {
        ResourceOutput::new(format!("/remote/{key}"), json!({ "key": key }))
    }
}

#[async_trait]
impl ResourceClient for FakeControlPlane {
    async fn submit(
        &self,
        action: StepAction,
        kind: &str,
        name: &str,
        _body: &serde_json::Value,
    ) -> Result<SubmitOutcome> {
        let key = format!("{kind}/{name}");
        self.calls.lock().unwrap().push(format!("{action} {key}"));

        if action == StepAction::Delete {
            if let Some(detail) = self.delete_failures.lock().unwrap().get(&key) {
                return Err(ProvisionError::RemoteRejected(detail.clone()));
            }
            return Ok(SubmitOutcome::Complete(ResourceOutput::absent()));
        }

        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&key)
            .copied()
            .unwrap_or(Behavior::Sync);
        match behavior {
            Behavior::Sync => Ok(SubmitOutcome::Complete(Self::output_for(&key))),
            Behavior::Polled(polls) => {
                self.operations.lock().unwrap().insert(key.clone(), polls);
                Ok(SubmitOutcome::Accepted(
                    OperationHandle::new(key).with_poll_interval(Duration::from_millis(1)),
                ))
            }
            Behavior::Reject(status, code) => Err(ProvisionError::RemoteRejected(
                ErrorDetail::new(code, "rejected by control plane").with_status(status),
            )),
        }
    }

    async fn query_status(&self, handle: &OperationHandle) -> Result<OperationStatus> {
        let mut operations = self.operations.lock().unwrap();
        let remaining = operations.entry(handle.locator.clone()).or_insert(0);
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(OperationStatus::Running { retry_after: None });
        }
        Ok(OperationStatus::Succeeded(Self::output_for(
            &handle.locator,
        )))
    }

    async fn fetch(&self, kind: &str, name: &str) -> Result<Option<ResourceOutput>> {
        let key = format!("{kind}/{name}");
        self.calls.lock().unwrap().push(format!("read {key}"));
        Ok(Some(Self::output_for(&key)))
    }
}

fn sample_plan() -> ProvisioningPlan {
    ProvisioningPlan::new(vec![
        ResourceStep::create("rg", "resource-group", "sample-group", json!({"location": "westus"})),
        ResourceStep::create(
            "ns",
            "namespace",
            "sample-namespace",
            json!({"group": "${rg.id}", "location": "westus"}),
        )
        .after(["rg"]),
        ResourceStep::create("q", "queue", "sample-queue", json!({"namespace": "${ns.id}"}))
            .after(["ns"]),
    ])
    .expect("acyclic plan")
}

fn statuses(outcome: &planekit_core::RunOutcome) -> Vec<(String, StepStatus)> {
    outcome
        .steps
        .iter()
        .map(|report| (report.id.clone(), report.status))
        .collect()
}

#[tokio::test]
async fn full_run_provisions_then_cleans_in_reverse() {
    let client = Arc::new(FakeControlPlane::new());
    client.behave("namespace", "sample-namespace", Behavior::Polled(2));

    let orchestrator = Orchestrator::new(client.clone());
    let outcome = orchestrator
        .run(&sample_plan(), &RunPolicy::default(), &RunContext::background())
        .await;

    assert_eq!(outcome.state, RunState::Cleaned);
    assert!(outcome.is_success());
    assert_eq!(
        statuses(&outcome),
        vec![
            ("rg".to_string(), StepStatus::Succeeded),
            ("ns".to_string(), StepStatus::Succeeded),
            ("q".to_string(), StepStatus::Succeeded),
        ]
    );

    let teardown = outcome.teardown.expect("teardown ran");
    assert!(teardown.is_clean());
    assert_eq!(teardown.deleted, vec!["q", "ns", "rg"]);

    // Deletes hit the control plane in reverse dependency order.
    let calls = client.calls();
    let deletes: Vec<&String> = calls.iter().filter(|c| c.starts_with("delete")).collect();
    assert_eq!(
        deletes,
        vec![
            "delete queue/sample-queue",
            "delete namespace/sample-namespace",
            "delete resource-group/sample-group",
        ]
    );
}

#[tokio::test]
async fn failed_step_halts_downstream_and_rolls_back_completed_only() {
    let client = Arc::new(FakeControlPlane::new());
    client.behave(
        "namespace",
        "sample-namespace",
        Behavior::Reject(400, "InvalidSku"),
    );

    let orchestrator = Orchestrator::new(client.clone());
    let outcome = orchestrator
        .run(&sample_plan(), &RunPolicy::default(), &RunContext::background())
        .await;

    assert_eq!(outcome.state, RunState::Cleaned);
    assert!(!outcome.is_success());
    assert_eq!(
        statuses(&outcome),
        vec![
            ("rg".to_string(), StepStatus::Succeeded),
            ("ns".to_string(), StepStatus::Failed),
            ("q".to_string(), StepStatus::NotAttempted),
        ]
    );

    // Only the resource group ever existed, so only it is deleted.
    let teardown = outcome.teardown.expect("teardown ran");
    assert_eq!(teardown.deleted, vec!["rg"]);

    let calls = client.calls();
    assert!(!calls.iter().any(|c| c.contains("queue/")));
    assert!(!calls.iter().any(|c| c == "delete namespace/sample-namespace"));
}

#[tokio::test]
async fn delete_failures_are_collected_not_fatal() {
    let client = Arc::new(FakeControlPlane::new());
    client.fail_delete(
        "namespace",
        "sample-namespace",
        ErrorDetail::new("Conflict", "namespace is locked").with_status(409),
    );

    let orchestrator = Orchestrator::new(client.clone());
    let outcome = orchestrator
        .run(&sample_plan(), &RunPolicy::default(), &RunContext::background())
        .await;

    assert_eq!(outcome.state, RunState::TeardownFailed);
    assert!(!outcome.is_success());

    let teardown = outcome.teardown.expect("teardown ran");
    assert_eq!(teardown.failures.len(), 1);
    assert_eq!(teardown.failures[0].step_id, "ns");
    // The loop kept going past the failure.
    assert_eq!(teardown.deleted, vec!["q", "rg"]);
}

#[tokio::test]
async fn keep_resources_skips_teardown() {
    let client = Arc::new(FakeControlPlane::new());
    let orchestrator = Orchestrator::new(client.clone());

    let outcome = orchestrator
        .run(
            &sample_plan(),
            &RunPolicy::default().keep_resources(),
            &RunContext::background(),
        )
        .await;

    assert_eq!(outcome.state, RunState::Provisioned);
    assert!(outcome.teardown.is_none());
    assert!(!client.calls().iter().any(|c| c.starts_with("delete")));
}

#[tokio::test]
async fn deleting_absent_resources_succeeds() {
    let client = Arc::new(FakeControlPlane::new());
    client.fail_delete(
        "queue",
        "sample-queue",
        ErrorDetail::new("ResourceNotFound", "no such queue").with_status(404),
    );

    let orchestrator = Orchestrator::new(client.clone());
    let report = orchestrator
        .tear_down_all(
            &sample_plan(),
            &RunPolicy::default(),
            &RunContext::background(),
        )
        .await;

    // 404 on delete is success: the resource is gone either way.
    assert!(report.is_clean());
    assert_eq!(report.deleted, vec!["q", "ns", "rg"]);
}

#[tokio::test]
async fn dependency_outputs_flow_into_step_bodies() {
    let client = Arc::new(FakeControlPlane::new());
    let orchestrator = Orchestrator::new(client.clone());

    let plan = ProvisioningPlan::new(vec![
        ResourceStep::create("rg", "resource-group", "g1", json!({"location": "westus"})),
        ResourceStep::read("check", "resource-group", "g1").after(["rg"]),
    ])
    .unwrap();

    let outcome = orchestrator
        .run(&plan, &RunPolicy::default().keep_resources(), &RunContext::background())
        .await;

    assert!(outcome.provisioning_succeeded());
    let check = outcome.step("check").unwrap();
    assert_eq!(check.resource_id.as_deref(), Some("/remote/resource-group/g1"));
}

#[tokio::test]
async fn bounded_parallelism_still_completes() {
    let client = Arc::new(FakeControlPlane::new());
    let orchestrator = Orchestrator::new(client.clone());

    let plan = ProvisioningPlan::new(vec![
        ResourceStep::create("a", "vault", "v1", json!({})),
        ResourceStep::create("b", "vault", "v2", json!({})),
        ResourceStep::create("c", "vault", "v3", json!({})),
        ResourceStep::create("d", "registry", "r1", json!({})).after(["a", "b", "c"]),
    ])
    .unwrap();

    let policy = RunPolicy {
        parallelism: Some(2),
        ..RunPolicy::default()
    };
    let outcome = orchestrator
        .run(&plan, &policy.keep_resources(), &RunContext::background())
        .await;

    assert_eq!(outcome.state, RunState::Provisioned);
    assert!(outcome.provisioning_succeeded());
}

#[test]
fn plan_summary_reflects_sample_plan() {
    let plan = sample_plan();
    assert_eq!(
        plan.summary(),
        PlanSummary {
            create: 3,
            read: 0,
            delete: 0
        }
    );
}
