use crate::plan_file;
use colored::Colorize;
use planekit_core::{Orchestrator, RunContext, RunPolicy};
use planekit_http::{ControlPlaneConfig, HttpResourceClient};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub async fn handle(
    plan_path: &Path,
    keep: bool,
    parallelism: Option<usize>,
    poll_timeout: Option<u64>,
    poll_interval: u64,
    max_retries: u32,
) -> anyhow::Result<()> {
    let plan = plan_file::load(plan_path)?;
    println!(
        "Plan: {} ({} step(s), {})",
        plan_path.display().to_string().cyan(),
        plan.len(),
        plan.summary()
    );

    let config = ControlPlaneConfig::from_env()?;
    let client = Arc::new(HttpResourceClient::new(config)?);

    let mut policy = RunPolicy {
        parallelism,
        poll_timeout: poll_timeout.map(Duration::from_secs),
        poll_interval: Duration::from_secs(poll_interval),
        max_retries,
        ..RunPolicy::default()
    };
    if keep {
        policy = policy.keep_resources();
    }

    let (ctx, cancel) = RunContext::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "interrupt received, stopping...".yellow());
            cancel.cancel();
        }
    });

    tracing::info!(steps = plan.len(), keep, "starting run");
    let orchestrator = Orchestrator::new(client);
    let outcome = orchestrator.run(&plan, &policy, &ctx).await;

    println!();
    println!("Steps:");
    for report in &outcome.steps {
        crate::commands::print_step_report(report);
    }
    if let Some(teardown) = &outcome.teardown {
        println!();
        println!("Teardown:");
        crate::commands::print_teardown_report(teardown);
    }

    println!();
    if outcome.is_success() {
        println!(
            "{} final state: {} ({:.1?})",
            "✓".green().bold(),
            outcome.state.to_string().green(),
            outcome.duration
        );
    } else {
        println!(
            "{} final state: {} ({:.1?})",
            "✗".red().bold(),
            outcome.state.to_string().red(),
            outcome.duration
        );
        std::process::exit(1);
    }

    Ok(())
}
