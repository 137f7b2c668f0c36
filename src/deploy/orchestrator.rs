// ABOUTME: Deployment orchestrator: owns the step sequence and drives one machine per run.
// ABOUTME: Reports every transition to the progress observer and the persistent-state recorder.

use futures::StreamExt;
use parking_lot::Mutex;
use snafu::{ResultExt, ensure};
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cloud::Cloud;
use crate::config::PollingConfig;
use crate::diagnostics::{Diagnostics, Warning};

use super::bindings::CloudCapabilities;
use super::capabilities::StepCapabilities;
use super::error::{
    AlreadyStartedSnafu, ContractSnafu, EmptySequenceSnafu, InvalidStepSnafu, MachineError,
    RunError,
};
use super::machine::{MachineOutcome, StateMachine, Transition};
use super::observer::{ProgressObserver, ProgressUpdate};
use super::preflight::verify_templates;
use super::recorder::{DeploymentStatus, RecorderError, StateRecorder, StepRecord, StepStatus};
use super::state::{MachineState, OrchestrationContext, Phase};
use super::step::{DeploymentSequence, DeploymentStep, StepOperation};

/// Where templates live and how status is polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub bucket: String,
    pub region: String,
    pub polling: PollingConfig,
}

/// Result of a run that reached `Deployed`.
#[derive(Debug)]
pub struct RunSummary {
    pub steps: usize,
    pub warnings: Vec<Warning>,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct Steps {
    sequence: DeploymentSequence,
    started: bool,
}

/// Runs a deployment sequence against a cloud provider.
pub struct DeploymentOrchestrator<C: Cloud> {
    cloud: Arc<C>,
    settings: OrchestratorSettings,
    // One lock for both so an append can't slip past the run's snapshot.
    steps: Mutex<Steps>,
}

impl<C: Cloud> DeploymentOrchestrator<C> {
    pub fn new(cloud: Arc<C>, settings: OrchestratorSettings) -> Self {
        Self {
            cloud,
            settings,
            steps: Mutex::new(Steps::default()),
        }
    }

    /// Create an orchestrator with `sequence` already queued.
    pub fn with_sequence(
        cloud: Arc<C>,
        settings: OrchestratorSettings,
        sequence: DeploymentSequence,
    ) -> Self {
        Self {
            cloud,
            settings,
            steps: Mutex::new(Steps {
                sequence,
                started: false,
            }),
        }
    }

    /// Append a step. Fails once a run has started, leaving the sequence as it was.
    pub fn add_step(&self, step: DeploymentStep) -> Result<(), RunError> {
        let mut steps = self.steps.lock();
        ensure!(!steps.started, AlreadyStartedSnafu);
        steps.sequence.push(step);
        Ok(())
    }

    /// Pair `forward` and `backward` into a step and append it.
    pub fn add_operations(
        &self,
        forward: StepOperation,
        backward: StepOperation,
    ) -> Result<(), RunError> {
        let step = DeploymentStep::new(forward, backward).context(InvalidStepSnafu)?;
        self.add_step(step)
    }

    pub fn len(&self) -> usize {
        self.steps.lock().sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.lock().sequence.is_empty()
    }

    pub fn has_started(&self) -> bool {
        self.steps.lock().started
    }

    /// Deploy every step in order, rolling back completed steps on failure.
    ///
    /// Templates are checked before any stack is touched. Returns a summary
    /// only when every step deployed.
    pub async fn run(
        &self,
        observer: Arc<dyn ProgressObserver>,
        recorder: &dyn StateRecorder,
    ) -> Result<RunSummary, RunError> {
        let sequence = {
            let mut steps = self.steps.lock();
            ensure!(!steps.sequence.is_empty(), EmptySequenceSnafu);
            ensure!(!steps.started, AlreadyStartedSnafu);
            steps.started = true;
            Arc::new(steps.sequence.clone())
        };

        tracing::info!(
            steps = sequence.len(),
            bucket = %self.settings.bucket,
            "starting deployment"
        );

        verify_templates(self.cloud.as_ref(), &self.settings.bucket, &sequence).await?;

        let capabilities =
            CloudCapabilities::new(self.cloud.clone(), &self.settings.polling, observer.clone());
        let context =
            OrchestrationContext::new(sequence, &self.settings.bucket, &self.settings.region);

        execute(context, capabilities, observer.as_ref(), recorder).await
    }
}

impl<C: Cloud> std::fmt::Debug for DeploymentOrchestrator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentOrchestrator")
            .field("settings", &self.settings)
            .field("steps", &self.len())
            .field("started", &self.has_started())
            .finish()
    }
}

/// Drive a machine over `context` with `capabilities` to a terminal state,
/// reporting every transition.
pub async fn execute<S: StepCapabilities>(
    context: OrchestrationContext,
    capabilities: S,
    observer: &dyn ProgressObserver,
    recorder: &dyn StateRecorder,
) -> Result<RunSummary, RunError> {
    let started = Instant::now();
    let mut reporter = Reporter::new(observer, recorder, &context);
    let mut machine = StateMachine::new(context, capabilities);

    {
        let mut transitions = pin!(machine.transitions());
        while let Some(next) = transitions.next().await {
            match next {
                Ok(transition) => reporter.report(&transition),
                Err(err) => {
                    reporter.abort();
                    return Err(err).context(ContractSnafu);
                }
            }
        }
    }

    let outcome = machine.finish();
    let warnings = reporter.diagnostics.into_warnings();
    conclude(outcome, warnings, started.elapsed())
}

fn conclude(
    outcome: MachineOutcome,
    warnings: Vec<Warning>,
    elapsed: Duration,
) -> Result<RunSummary, RunError> {
    match outcome.state {
        MachineState::Deployed => {
            tracing::info!(steps = outcome.context.len(), "deployment complete");
            Ok(RunSummary {
                steps: outcome.context.len(),
                warnings,
                elapsed,
            })
        }
        MachineState::RolledBack => {
            let trigger = outcome.trigger.ok_or(MachineError::MissingFailure {
                state: MachineState::RolledBack,
            });
            let trigger = trigger.context(ContractSnafu)?;
            Err(RunError::RolledBack {
                step: trigger.index,
                stack: trigger.stack,
                source: trigger.error,
            })
        }
        MachineState::Failed => match (outcome.trigger, outcome.rollback) {
            (Some(trigger), Some(rollback)) => Err(RunError::Failed {
                step: trigger.index,
                stack: trigger.stack,
                source: trigger.error,
                rollback_step: rollback.index,
                rollback_stack: rollback.stack,
                rollback: rollback.error,
            }),
            _ => Err(MachineError::MissingFailure {
                state: MachineState::Failed,
            })
            .context(ContractSnafu),
        },
        state => Err(MachineError::NotTerminal { state }).context(ContractSnafu),
    }
}

/// Turns transitions into observer messages and recorder calls.
struct Reporter<'a> {
    observer: &'a dyn ProgressObserver,
    recorder: &'a dyn StateRecorder,
    diagnostics: Diagnostics,
    total: usize,
    /// Steps the rollback has to undo, fixed on entering the rollback branch.
    rollback_total: usize,
}

impl<'a> Reporter<'a> {
    fn new(
        observer: &'a dyn ProgressObserver,
        recorder: &'a dyn StateRecorder,
        context: &OrchestrationContext,
    ) -> Self {
        Self {
            observer,
            recorder,
            diagnostics: Diagnostics::default(),
            total: context.len(),
            rollback_total: 0,
        }
    }

    fn report(&mut self, transition: &Transition) {
        if let (MachineState::Deploying(_), MachineState::RollingBack(_)) =
            (transition.from, transition.state)
        {
            self.rollback_total = (transition.context.current_index() + 1).max(0) as usize;
        }

        self.observer.on_progress(&self.progress(transition));
        self.record(transition);
    }

    fn progress(&self, transition: &Transition) -> ProgressUpdate {
        let context = &transition.context;
        let index = context.current_index();
        let stack = context
            .current_step()
            .map(|step| step.stack().to_string())
            .unwrap_or_default();

        let forward = |message: String| (message, index.max(0) as usize, self.total);
        let undone = (self.rollback_total as isize - 1 - index).max(0) as usize;
        let backward = |message: String| (message, undone, self.rollback_total);

        let position = index + 1;
        let rollback_position = undone + 1;
        let (message, completed, total) = match transition.state {
            MachineState::Idle => (String::new(), 0, self.total),
            MachineState::Deploying(Phase::TriggerOperation) => forward(format!(
                "Deploying stack {stack} ({position} of {})",
                self.total
            )),
            MachineState::Deploying(Phase::WaitForReadiness) => forward(format!(
                "Waiting for table indexes of {stack} ({position} of {})",
                self.total
            )),
            MachineState::Deploying(Phase::WaitForStability) => forward(format!(
                "Waiting for stack {stack} to stabilize ({position} of {})",
                self.total
            )),
            MachineState::RollingBack(Phase::TriggerOperation) => backward(format!(
                "Rolling back stack {stack} ({rollback_position} of {})",
                self.rollback_total
            )),
            MachineState::RollingBack(Phase::WaitForReadiness) => backward(format!(
                "Waiting for table indexes of {stack} (rollback {rollback_position} of {})",
                self.rollback_total
            )),
            MachineState::RollingBack(Phase::WaitForStability) => backward(format!(
                "Waiting for stack {stack} to stabilize (rollback {rollback_position} of {})",
                self.rollback_total
            )),
            MachineState::Deployed => (
                format!("Deployed {} stack(s)", self.total),
                self.total,
                self.total,
            ),
            MachineState::RolledBack => (
                format!("Rolled back {} stack(s)", self.rollback_total),
                self.rollback_total,
                self.rollback_total,
            ),
            MachineState::Failed => backward(format!(
                "Rollback of stack {stack} failed; manual repair required"
            )),
        };

        ProgressUpdate {
            state: transition.state,
            message,
            completed,
            total,
        }
    }

    fn record(&mut self, transition: &Transition) {
        use MachineState::{Deployed, Deploying, Failed, Idle, RolledBack, RollingBack};
        use Phase::{TriggerOperation, WaitForReadiness, WaitForStability};

        match (transition.from, transition.state) {
            (Idle, Deploying(TriggerOperation)) => {
                if self.total > 1 {
                    let steps: Vec<StepRecord> = transition
                        .context
                        .sequence()
                        .iter()
                        .map(|step| StepRecord {
                            stack: step.stack().clone(),
                            status: StepStatus::WaitingForDeployment,
                        })
                        .collect();
                    let result = self.recorder.start_deployment(&steps);
                    self.check("start_deployment", result);
                }
                self.update(StepStatus::Deploying);
            }
            (_, Deploying(WaitForReadiness)) | (_, RollingBack(WaitForReadiness)) => {
                self.update(StepStatus::WaitingForTableReady);
            }
            (Deploying(WaitForReadiness), Deploying(WaitForStability)) => {
                self.update(StepStatus::Deploying);
            }
            (Deploying(WaitForStability), next @ (Deploying(TriggerOperation) | Deployed)) => {
                self.advance(StepStatus::Deployed);
                if next != Deployed {
                    self.update(StepStatus::Deploying);
                }
            }
            (Deploying(_), RollingBack(TriggerOperation)) => {
                let result = self.recorder.start_rollback();
                self.check("start_rollback", result);
                self.update(StepStatus::RollingBack);
            }
            (RollingBack(WaitForReadiness), RollingBack(WaitForStability)) => {
                self.update(StepStatus::RollingBack);
            }
            (RollingBack(WaitForStability), next @ (RollingBack(TriggerOperation) | RolledBack)) => {
                self.advance(StepStatus::RolledBack);
                if next != RolledBack {
                    self.update(StepStatus::RollingBack);
                }
            }
            _ => {}
        }

        let finished = match transition.state {
            Deployed => Some(DeploymentStatus::Deployed),
            RolledBack => Some(DeploymentStatus::RolledBack),
            Failed => Some(DeploymentStatus::Failed),
            _ => None,
        };
        if let Some(status) = finished {
            let result = self.recorder.finish_deployment(status);
            self.check("finish_deployment", result);
        }
    }

    /// Close the record after a contract violation stopped the machine.
    fn abort(&mut self) {
        let result = self.recorder.finish_deployment(DeploymentStatus::Failed);
        self.check("finish_deployment", result);
    }

    fn update(&mut self, status: StepStatus) {
        let result = self.recorder.update_current_step_status(status);
        self.check("update_current_step_status", result);
    }

    fn advance(&mut self, status: StepStatus) {
        let result = self.recorder.advance_step(status);
        self.check("advance_step", result);
    }

    fn check(&mut self, call: &str, result: Result<(), RecorderError>) {
        if let Err(e) = result {
            self.diagnostics.warn(Warning::recorder(call, e));
        }
    }
}
