// ABOUTME: Validate command implementation.
// ABOUTME: Builds the deployment sequence from the plan and lists its steps.

use rollstack::config::Plan;
use rollstack::error::Result;
use rollstack::output::Output;

pub fn validate(plan: &Plan, output: &Output) -> Result<()> {
    let sequence = plan.sequence()?;

    output.progress(&format!(
        "Plan {} deploys {} step(s) from bucket {} in {}",
        plan.name(),
        sequence.len(),
        plan.bucket,
        plan.region
    ));

    for (i, step) in sequence.iter().enumerate() {
        output.progress(&format!(
            "  {}. {}: {} (rollback: {})",
            i + 1,
            step.stack(),
            step.forward().template().path(),
            step.backward().template().path()
        ));

        let tables: Vec<String> = step
            .forward()
            .tables()
            .iter()
            .map(ToString::to_string)
            .collect();
        if !tables.is_empty() {
            output.progress(&format!("     waits for tables: {}", tables.join(", ")));
        }
    }

    output.success(&format!("Plan is valid: {} step(s)", sequence.len()));
    Ok(())
}
