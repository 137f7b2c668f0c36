// ABOUTME: Status command implementation.
// ABOUTME: Prints the deployment record kept in the plan's state directory.

use rollstack::config::Plan;
use rollstack::deploy::{DeploymentRecord, FileStateRecorder};
use rollstack::error::Result;
use rollstack::output::{Output, OutputMode};
use std::path::Path;

pub fn status(plan: &Plan, cwd: &Path, output: &Output) -> Result<()> {
    let recorder = FileStateRecorder::new(plan.state_dir_in(cwd), plan.name());

    let Some(record) = recorder.load()? else {
        output.success(&format!("No deployment recorded for {}", plan.name()));
        return Ok(());
    };

    if output.mode() == OutputMode::Json {
        println!("{}", serde_json::to_string(&record)?);
        return Ok(());
    }

    print_record(&record, output);
    Ok(())
}

fn print_record(record: &DeploymentRecord, output: &Output) {
    let state = match record.status {
        Some(status) => status.to_string(),
        None if record.is_stale() => "STALE".to_string(),
        None => "IN PROGRESS".to_string(),
    };

    output.progress(&format!("Deployment: {}", record.name));
    output.progress(&format!(
        "Started: {} by {} (pid {})",
        record.started_at, record.holder, record.pid
    ));
    output.progress(&format!("Updated: {}", record.updated_at));
    for (i, step) in record.steps.iter().enumerate() {
        output.progress(&format!("  {}. {} {}", i + 1, step.stack, step.status));
    }
    output.success(&format!("Status: {state}"));
}
