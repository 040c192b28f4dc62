//! Dependency-ordered provisioning plans
//!
//! A plan is built once per run and immutable afterwards. Construction
//! topologically sorts the declared steps and rejects cycles before anything
//! executes.

use crate::error::{ProvisionError, Result};
use crate::step::{ResourceStep, StepAction};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Ordered sequence of steps in which every dependency precedes its
/// dependents.
#[derive(Debug, Clone)]
pub struct ProvisioningPlan {
    steps: Vec<ResourceStep>,
}

impl ProvisioningPlan {
    /// Build a plan from declared steps.
    ///
    /// Steps are reordered by topological sort over their `depends_on`
    /// references; steps with no dependency relation keep their declaration
    /// order, so repeated runs are reproducible. Fails on duplicate ids,
    /// references to unknown steps, and dependency cycles.
    pub fn new(steps: Vec<ResourceStep>) -> Result<Self> {
        let mut position: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
        for (idx, step) in steps.iter().enumerate() {
            if position.insert(step.id.as_str(), idx).is_some() {
                return Err(ProvisionError::DuplicateStep(step.id.clone()));
            }
        }
        for step in &steps {
            for dep in &step.depends_on {
                if !position.contains_key(dep.as_str()) {
                    return Err(ProvisionError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        // Kahn's algorithm; ready steps are taken in declaration order.
        let mut in_degree = vec![0usize; steps.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
        for (idx, step) in steps.iter().enumerate() {
            for dep in &step.depends_on {
                let dep_idx = position[dep.as_str()];
                in_degree[idx] += 1;
                dependents[dep_idx].push(idx);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(idx, _)| Reverse(idx))
            .collect();

        let mut order = Vec::with_capacity(steps.len());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for &dependent in &dependents[idx] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() != steps.len() {
            let stuck = steps
                .iter()
                .enumerate()
                .find(|(idx, _)| in_degree[*idx] > 0)
                .map(|(_, step)| step.id.clone())
                .unwrap_or_default();
            return Err(ProvisionError::CyclicDependency(stuck));
        }

        let mut slots: Vec<Option<ResourceStep>> = steps.into_iter().map(Some).collect();
        let ordered = order
            .into_iter()
            .filter_map(|idx| slots[idx].take())
            .collect();
        Ok(Self { steps: ordered })
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[ResourceStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ResourceStep> {
        self.steps.iter().find(|step| step.id == id)
    }

    /// Teardown order: the exact reverse of the forward order, restricted to
    /// create steps in `completed`. Steps that created nothing (reads,
    /// forward deletes, steps never reached) are skipped.
    pub fn teardown_order<'a>(&'a self, completed: &HashSet<String>) -> Vec<&'a ResourceStep> {
        self.steps
            .iter()
            .rev()
            .filter(|step| {
                step.action == StepAction::CreateOrUpdate && completed.contains(&step.id)
            })
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        let count = |action: StepAction| {
            self.steps
                .iter()
                .filter(|step| step.action == action)
                .count()
        };
        PlanSummary {
            create: count(StepAction::CreateOrUpdate),
            read: count(StepAction::Read),
            delete: count(StepAction::Delete),
        }
    }
}

/// Counts of planned actions per type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub read: usize,
    pub delete: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to read, {} to delete",
            self.create, self.read, self.delete
        )
    }
}
