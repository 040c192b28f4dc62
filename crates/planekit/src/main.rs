mod commands;
mod plan_file;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "plane")]
#[command(about = "Provision cloud resources in dependency order", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision every resource in a plan file
    Apply {
        /// Path to the plan file (JSON array of steps)
        plan: PathBuf,
        /// Leave created resources in place when the run finishes
        #[arg(short, long, env = "PLANEKIT_KEEP_RESOURCES")]
        keep: bool,
        /// Cap on concurrently executing steps (default: unbounded)
        #[arg(short, long)]
        parallelism: Option<usize>,
        /// Per-operation polling budget, in seconds
        #[arg(long)]
        poll_timeout: Option<u64>,
        /// Interval between status polls, in seconds
        #[arg(long, default_value = "10")]
        poll_interval: u64,
        /// Transient-failure retry budget per operation
        #[arg(long, default_value = "5")]
        max_retries: u32,
    },
    /// Delete every resource a plan file would create, in reverse order
    Down {
        /// Path to the plan file (JSON array of steps)
        plan: PathBuf,
        /// Interval between status polls, in seconds
        #[arg(long, default_value = "10")]
        poll_interval: u64,
    },
    /// Check a plan file for cycles and unknown dependencies
    Validate {
        /// Path to the plan file (JSON array of steps)
        plan: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt::init();

    match cli.command {
        Commands::Apply {
            plan,
            keep,
            parallelism,
            poll_timeout,
            poll_interval,
            max_retries,
        } => {
            commands::apply::handle(
                &plan,
                keep,
                parallelism,
                poll_timeout,
                poll_interval,
                max_retries,
            )
            .await?;
        }
        Commands::Down {
            plan,
            poll_interval,
        } => {
            commands::down::handle(&plan, poll_interval).await?;
        }
        Commands::Validate { plan } => {
            commands::validate::handle(&plan)?;
        }
        Commands::Version => {
            println!("planekit {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
