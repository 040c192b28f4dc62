pub mod apply;
pub mod down;
pub mod validate;

use colored::Colorize;
use planekit_core::{StepReport, StepStatus, TeardownReport};

pub(crate) fn print_step_report(report: &StepReport) {
    let marker = match report.status {
        StepStatus::Succeeded => "✓".green(),
        StepStatus::Failed => "✗".red(),
        StepStatus::NotAttempted => "-".yellow(),
    };
    match report.status {
        StepStatus::Succeeded => {
            let id = report.resource_id.as_deref().unwrap_or("(no resource id)");
            println!("  {} {} → {} ({:.1?})", marker, report.id.bold(), id.cyan(), report.elapsed);
        }
        StepStatus::Failed => {
            let error = report.error.as_deref().unwrap_or("unknown error");
            println!("  {} {}: {}", marker, report.id.bold(), error.red());
        }
        StepStatus::NotAttempted => {
            println!("  {} {}: {}", marker, report.id.bold(), "not attempted".yellow());
        }
    }
}

pub(crate) fn print_teardown_report(report: &TeardownReport) {
    for id in &report.deleted {
        println!("  {} {} deleted", "✓".green(), id.bold());
    }
    for failure in &report.failures {
        println!(
            "  {} {} ({}/{}): {}",
            "✗".red(),
            failure.step_id.bold(),
            failure.kind,
            failure.name,
            failure.error.red()
        );
    }
    if !report.is_clean() {
        println!();
        println!(
            "{} {} resource(s) may still exist remotely",
            "Warning:".yellow().bold(),
            report.failures.len()
        );
    }
}
