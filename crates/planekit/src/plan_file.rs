use anyhow::Context;
use planekit_core::{ProvisioningPlan, ResourceStep};
use std::path::Path;

/// Load a plan file: a JSON array of steps, validated into execution order.
pub fn load(path: &Path) -> anyhow::Result<ProvisioningPlan> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plan file {}", path.display()))?;
    let steps: Vec<ResourceStep> = serde_json::from_str(&raw)
        .with_context(|| format!("plan file {} is not a JSON array of steps", path.display()))?;
    let plan = ProvisioningPlan::new(steps)
        .with_context(|| format!("plan file {} is invalid", path.display()))?;
    Ok(plan)
}
