use crate::plan_file;
use colored::Colorize;
use planekit_core::{Orchestrator, RunContext, RunPolicy};
use planekit_http::{ControlPlaneConfig, HttpResourceClient};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub async fn handle(plan_path: &Path, poll_interval: u64) -> anyhow::Result<()> {
    let plan = plan_file::load(plan_path)?;

    let config = ControlPlaneConfig::from_env()?;
    let client = Arc::new(HttpResourceClient::new(config)?);

    let policy = RunPolicy {
        poll_interval: Duration::from_secs(poll_interval),
        ..RunPolicy::default()
    };

    let (ctx, cancel) = RunContext::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "interrupt received, stopping...".yellow());
            cancel.cancel();
        }
    });

    tracing::info!(steps = plan.len(), "starting teardown");
    let orchestrator = Orchestrator::new(client);
    let report = orchestrator.tear_down_all(&plan, &policy, &ctx).await;

    println!("Teardown:");
    crate::commands::print_teardown_report(&report);

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}
