//! Provisioning steps
//!
//! A [`ResourceStep`] is one create/read/delete action against one resource,
//! plus its place in the dependency graph. Step bodies may reference outputs
//! of the steps they depend on through `${step.field}` placeholders.

use crate::client::{ResourceClient, ResourceOutput, SubmitOutcome};
use crate::context::RunContext;
use crate::error::{ErrorDetail, ProvisionError, Result};
use crate::poller::{OperationPoller, PollConfig};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Action a step performs against the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    CreateOrUpdate,
    Read,
    Delete,
}

impl std::fmt::Display for StepAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepAction::CreateOrUpdate => write!(f, "create-or-update"),
            StepAction::Read => write!(f, "read"),
            StepAction::Delete => write!(f, "delete"),
        }
    }
}

/// One provisioning action against one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStep {
    /// Stable step identifier, unique within a plan
    pub id: String,

    /// Resource kind (e.g. "resource-group", "namespace", "queue")
    pub kind: String,

    /// Remote resource name
    pub name: String,

    pub action: StepAction,

    /// Steps whose outputs this step's body may reference
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Request body; string values may embed `${step.field}` placeholders
    #[serde(default)]
    pub body: Value,
}

impl ResourceStep {
    pub fn create(
        id: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        body: Value,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            name: name.into(),
            action: StepAction::CreateOrUpdate,
            depends_on: Vec::new(),
            body,
        }
    }

    pub fn read(id: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            name: name.into(),
            action: StepAction::Read,
            depends_on: Vec::new(),
            body: Value::Null,
        }
    }

    pub fn delete(id: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            name: name.into(),
            action: StepAction::Delete,
            depends_on: Vec::new(),
            body: Value::Null,
        }
    }

    /// Declare the steps this one must run after.
    pub fn after<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Execute this step.
    ///
    /// `inputs` maps each declared dependency to its terminal output. The
    /// plan scheduler guarantees completeness, so a missing entry is an
    /// internal invariant violation, not a user error.
    ///
    /// A synchronous submit returns directly; an accepted long-running
    /// operation is driven to terminal through an [`OperationPoller`]. Every
    /// remote call races against the context, so cancellation interrupts a
    /// request that is still in flight.
    /// Deleting an already-absent resource is a success, because teardown may
    /// run after partial provisioning where the resource never existed.
    pub async fn execute(
        &self,
        client: &dyn ResourceClient,
        ctx: &RunContext,
        poll: &PollConfig,
        inputs: &HashMap<String, ResourceOutput>,
    ) -> Result<ResourceOutput> {
        for dep in &self.depends_on {
            if !inputs.contains_key(dep) {
                return Err(ProvisionError::UnresolvedDependency {
                    step: self.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        if self.action == StepAction::Read {
            return match ctx.guard(client.fetch(&self.kind, &self.name)).await?? {
                Some(output) => Ok(output),
                None => Err(ProvisionError::RemoteRejected(
                    ErrorDetail::new(
                        "NotFound",
                        format!("{} '{}' does not exist", self.kind, self.name),
                    )
                    .with_status(404),
                )),
            };
        }

        let body = render_body(&self.id, &self.body, inputs)?;
        let submitted = ctx
            .guard(client.submit(self.action, &self.kind, &self.name, &body))
            .await?;
        let outcome = match submitted {
            Ok(outcome) => outcome,
            Err(err) if self.action == StepAction::Delete && err.is_not_found() => {
                tracing::debug!(step = %self.id, kind = %self.kind, name = %self.name,
                    "resource already absent");
                return Ok(ResourceOutput::absent());
            }
            Err(err) => return Err(err),
        };

        match outcome {
            SubmitOutcome::Complete(output) => Ok(output),
            SubmitOutcome::Accepted(handle) => {
                let mut poller = OperationPoller::start(client, handle, poll.clone());
                match poller.poll_until_done(ctx).await {
                    Err(err) if self.action == StepAction::Delete && err.is_not_found() => {
                        Ok(ResourceOutput::absent())
                    }
                    result => result,
                }
            }
        }
    }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z0-9_-]+)\.([A-Za-z0-9_.-]+)\}").expect("valid placeholder regex")
    })
}

/// Expand `${step.field}` placeholders in `body` from dependency outputs.
///
/// A string value that is exactly one placeholder takes the referenced
/// value's JSON type; placeholders embedded in a longer string stringify.
pub(crate) fn render_body(
    step_id: &str,
    body: &Value,
    inputs: &HashMap<String, ResourceOutput>,
) -> Result<Value> {
    match body {
        Value::String(s) => render_string(step_id, s, inputs),
        Value::Array(items) => items
            .iter()
            .map(|item| render_body(step_id, item, inputs))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut rendered = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                rendered.insert(key.clone(), render_body(step_id, value, inputs)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

fn render_string(
    step_id: &str,
    s: &str,
    inputs: &HashMap<String, ResourceOutput>,
) -> Result<Value> {
    let re = placeholder_regex();

    // Whole-string placeholder keeps the referenced JSON type.
    if let Some(caps) = re.captures(s) {
        if &caps[0] == s {
            return lookup(step_id, &caps[1], &caps[2], inputs);
        }
    }

    let mut missing: Option<(String, String)> = None;
    let rendered = re.replace_all(s, |caps: &regex::Captures| {
        match lookup(step_id, &caps[1], &caps[2], inputs) {
            Ok(value) => match value {
                Value::String(text) => text,
                other => other.to_string(),
            },
            Err(_) => {
                missing = Some((caps[1].to_string(), caps[2].to_string()));
                String::new()
            }
        }
    });

    if let Some((dep, field)) = missing {
        return Err(ProvisionError::InvalidReference {
            step: step_id.to_string(),
            reference: format!("{dep}.{field}"),
        });
    }
    Ok(Value::String(rendered.into_owned()))
}

fn lookup(
    step_id: &str,
    dep: &str,
    field: &str,
    inputs: &HashMap<String, ResourceOutput>,
) -> Result<Value> {
    inputs
        .get(dep)
        .and_then(|output| output.field(field))
        .ok_or_else(|| ProvisionError::InvalidReference {
            step: step_id.to_string(),
            reference: format!("{dep}.{field}"),
        })
}
