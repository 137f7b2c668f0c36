// ABOUTME: Rehearse command implementation.
// ABOUTME: Runs the plan against the in-memory provider, optionally injecting step failures.

use rollstack::cloud::{InMemoryCloud, StackStatus};
use rollstack::config::{Plan, PollingConfig};
use rollstack::deploy::{DeploymentOrchestrator, DeploymentSequence, FileStateRecorder};
use rollstack::diagnostics::{Diagnostics, Warning};
use rollstack::error::{Error, Result};
use rollstack::output::Output;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Failures to inject, each a 1-based step number.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    pub forward: Option<usize>,
    pub settle: Option<usize>,
    pub backward: Option<usize>,
}

pub async fn rehearse(
    plan: &Plan,
    cwd: &Path,
    faults: Faults,
    force: bool,
    mut output: Output,
) -> Result<()> {
    let sequence = plan.sequence()?;
    let cloud = Arc::new(simulated_cloud(plan, &sequence));
    inject_faults(&cloud, &sequence, faults)?;

    let mut diag = Diagnostics::default();
    let recorder = FileStateRecorder::new(plan.state_dir_in(cwd), plan.name());
    check_not_in_progress(&recorder, force, &mut diag)?;

    output.start_timer();
    output.progress(&format!(
        "Rehearsing {} ({} step(s))",
        plan.name(),
        sequence.len()
    ));

    let mut settings = plan.settings();
    settings.polling = rehearsal_polling(&settings.polling);
    let orchestrator = DeploymentOrchestrator::with_sequence(cloud, settings, sequence);

    let observer = Arc::new(Output::new(output.mode()));
    let result = orchestrator.run(observer, &recorder).await;

    for warning in diag.warnings() {
        output.warning(&warning.message);
    }

    let summary = result?;
    for warning in &summary.warnings {
        output.warning(&warning.message);
    }
    output.success(&format!("Deployed {} stack(s)", summary.steps));
    Ok(())
}

/// A provider where every stack of the plan exists and every template is uploaded.
fn simulated_cloud(plan: &Plan, sequence: &DeploymentSequence) -> InMemoryCloud {
    let cloud = InMemoryCloud::new();
    cloud.set_settle_polls(1);

    for step in sequence {
        cloud.add_stack(step.stack(), StackStatus::CreateComplete);
        for operation in [step.forward(), step.backward()] {
            cloud.put_object(&plan.bucket, operation.template().path());
            for table in operation.tables() {
                cloud.add_table(table, 1);
            }
        }
    }

    cloud
}

fn inject_faults(cloud: &InMemoryCloud, sequence: &DeploymentSequence, faults: Faults) -> Result<()> {
    let step_at = |number: usize, flag: &str| {
        number
            .checked_sub(1)
            .and_then(|index| sequence.get(index))
            .ok_or_else(|| {
                Error::InvalidFault(format!(
                    "--{flag} {number}: plan has steps 1 to {}",
                    sequence.len()
                ))
            })
    };

    if let Some(number) = faults.forward {
        let step = step_at(number, "fail-forward")?;
        cloud.fail_update(step.forward().template().url(), "injected forward failure");
    }
    if let Some(number) = faults.settle {
        let step = step_at(number, "fail-settle")?;
        cloud.fail_settle(step.forward().template().url(), "injected settle failure");
    }
    if let Some(number) = faults.backward {
        let step = step_at(number, "fail-backward")?;
        cloud.fail_update(step.backward().template().url(), "injected backward failure");
    }
    Ok(())
}

fn check_not_in_progress(
    recorder: &FileStateRecorder,
    force: bool,
    diag: &mut Diagnostics,
) -> Result<()> {
    let Some(record) = recorder.load()? else {
        return Ok(());
    };

    if record.is_in_progress() {
        if !force {
            return Err(Error::InProgress {
                holder: record.holder,
                pid: record.pid,
                since: record.started_at,
            });
        }
        diag.warn(Warning::stale_record(format!(
            "overriding deployment record held by {} (pid {})",
            record.holder, record.pid
        )));
    } else if record.status.is_none() {
        diag.warn(Warning::stale_record(format!(
            "ignoring stale deployment record held by {} (pid {}) since {}",
            record.holder, record.pid, record.updated_at
        )));
    }
    Ok(())
}

/// Keep the plan's timeouts but poll the simulator without delay.
fn rehearsal_polling(polling: &PollingConfig) -> PollingConfig {
    PollingConfig {
        interval: Duration::from_millis(10),
        event_interval: Duration::from_millis(10),
        requests_per_minute: 6000,
        ..polling.clone()
    }
}
