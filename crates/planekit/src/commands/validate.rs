use crate::plan_file;
use colored::Colorize;
use std::path::Path;

pub fn handle(plan_path: &Path) -> anyhow::Result<()> {
    let plan = plan_file::load(plan_path)?;

    println!(
        "{} {} is valid ({})",
        "✓".green(),
        plan_path.display().to_string().cyan(),
        plan.summary()
    );
    println!();
    println!("Execution order:");
    for step in plan.steps() {
        if step.depends_on.is_empty() {
            println!("  {} {}/{}", step.id.bold(), step.kind, step.name);
        } else {
            println!(
                "  {} {}/{} (after {})",
                step.id.bold(),
                step.kind,
                step.name,
                step.depends_on.join(", ")
            );
        }
    }
    Ok(())
}
