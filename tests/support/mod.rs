// ABOUTME: Test support utilities.
// ABOUTME: Deterministic fakes for step capabilities, recorder and observer plus plan builders.

use async_trait::async_trait;
use parking_lot::Mutex;
use rollstack::cloud::{CloudError, StackEvent};
use rollstack::deploy::{
    DeploymentSequence, DeploymentStatus, DeploymentStep, EventWatch, OrchestrationContext,
    ProgressObserver, ProgressUpdate, RecorderError, StateRecorder, StepCapabilities, StepError,
    StepOperation, StepRecord, StepStatus,
};
use rollstack::types::{StackName, TableName, TemplateLocation};
use std::collections::HashSet;
use std::sync::{Arc, Once};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("rollstack=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const BUCKET: &str = "deploys";
pub const REGION: &str = "us-east-1";

pub fn stack(name: &str) -> StackName {
    StackName::new(name).unwrap()
}

pub fn table(name: &str) -> TableName {
    TableName::new(name).unwrap()
}

/// Operation for `stack` deploying the template at `path`.
pub fn operation(stack_name: &str, path: &str, tables: &[&str]) -> StepOperation {
    StepOperation::builder(
        stack(stack_name),
        TemplateLocation::in_bucket(BUCKET, REGION, path),
        REGION,
    )
    .tables(tables.iter().map(|t| table(t)))
    .build()
}

/// Step for `name` with forward template `{name}1` and backward template `{name}0`.
pub fn step(name: &str) -> DeploymentStep {
    step_with_tables(name, &[])
}

pub fn step_with_tables(name: &str, tables: &[&str]) -> DeploymentStep {
    DeploymentStep::new(
        operation(name, &format!("{name}1"), tables),
        operation(name, &format!("{name}0"), tables),
    )
    .unwrap()
}

/// Steps named `s0`, `s1`, ... `s{n-1}`.
#[allow(dead_code)]
pub fn steps(n: usize) -> Vec<DeploymentStep> {
    (0..n).map(|i| step(&format!("s{i}"))).collect()
}

pub fn context(steps: Vec<DeploymentStep>) -> OrchestrationContext {
    OrchestrationContext::new(Arc::new(DeploymentSequence::from(steps)), BUCKET, REGION)
}

/// A capability call seen by [`RecordingCapabilities`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Submission of the template at this path.
    Submit(String),
    AwaitStable(String),
    AwaitTables(String),
}

/// Capabilities that record every call and fail on request.
///
/// Calls are keyed by template path so the forward and backward halves of a
/// step can be told apart.
#[derive(Debug, Default)]
pub struct RecordingCapabilities {
    calls: Mutex<Vec<Call>>,
    fail_submit: HashSet<String>,
    fail_stable: HashSet<String>,
    fail_tables: HashSet<String>,
    watches: Arc<Mutex<Vec<(StackName, bool)>>>,
}

#[allow(dead_code)]
impl RecordingCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_submit(mut self, path: &str) -> Self {
        self.fail_submit.insert(path.to_string());
        self
    }

    pub fn fail_stable(mut self, path: &str) -> Self {
        self.fail_stable.insert(path.to_string());
        self
    }

    pub fn fail_tables(mut self, path: &str) -> Self {
        self.fail_tables.insert(path.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Paths of submitted templates, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Submit(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    /// Watches opened so far, with whether each is still open.
    pub fn watches(&self) -> Vec<(StackName, bool)> {
        self.watches.lock().clone()
    }

    fn fail_if(&self, set: &HashSet<String>, op: &StepOperation, call: Call) -> Result<(), StepError> {
        self.calls.lock().push(call);
        if set.contains(op.template().path()) {
            return Err(StepError::Operation {
                stack: op.stack().clone(),
                source: CloudError::Api(format!("injected failure for {}", op.template().path())),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StepCapabilities for RecordingCapabilities {
    async fn submit(&self, operation: &StepOperation) -> Result<(), StepError> {
        let path = operation.template().path().to_string();
        self.fail_if(&self.fail_submit, operation, Call::Submit(path))
    }

    async fn await_stable(&self, operation: &StepOperation) -> Result<(), StepError> {
        let path = operation.template().path().to_string();
        self.fail_if(&self.fail_stable, operation, Call::AwaitStable(path))
    }

    async fn await_tables_ready(&self, operation: &StepOperation) -> Result<(), StepError> {
        let path = operation.template().path().to_string();
        self.fail_if(&self.fail_tables, operation, Call::AwaitTables(path))
    }

    fn watch_events(&self, operation: &StepOperation) -> EventWatch {
        let watches = self.watches.clone();
        let slot = {
            let mut open = watches.lock();
            open.push((operation.stack().clone(), true));
            open.len() - 1
        };
        EventWatch::noop().on_stop(move || watches.lock()[slot].1 = false)
    }
}

/// A recorder call seen by [`RecordingRecorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderCall {
    StartDeployment(Vec<StepRecord>),
    StartRollback,
    AdvanceStep(StepStatus),
    Update(StepStatus),
    Finish(DeploymentStatus),
}

#[derive(Debug, Default)]
pub struct RecordingRecorder {
    calls: Mutex<Vec<RecorderCall>>,
    reject: bool,
}

#[allow(dead_code)]
impl RecordingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder that records calls but rejects every one of them.
    pub fn rejecting() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn calls(&self) -> Vec<RecorderCall> {
        self.calls.lock().clone()
    }

    pub fn advances(&self) -> Vec<StepStatus> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecorderCall::AdvanceStep(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: RecorderCall) -> Result<(), RecorderError> {
        self.calls.lock().push(call);
        if self.reject {
            return Err(RecorderError::Rejected("store unavailable".to_string()));
        }
        Ok(())
    }
}

impl StateRecorder for RecordingRecorder {
    fn start_deployment(&self, steps: &[StepRecord]) -> Result<(), RecorderError> {
        self.push(RecorderCall::StartDeployment(steps.to_vec()))
    }

    fn start_rollback(&self) -> Result<(), RecorderError> {
        self.push(RecorderCall::StartRollback)
    }

    fn advance_step(&self, status: StepStatus) -> Result<(), RecorderError> {
        self.push(RecorderCall::AdvanceStep(status))
    }

    fn update_current_step_status(&self, status: StepStatus) -> Result<(), RecorderError> {
        self.push(RecorderCall::Update(status))
    }

    fn finish_deployment(&self, status: DeploymentStatus) -> Result<(), RecorderError> {
        self.push(RecorderCall::Finish(status))
    }
}

#[derive(Debug, Default)]
pub struct RecordingObserver {
    updates: Mutex<Vec<ProgressUpdate>>,
    events: Mutex<Vec<StackEvent>>,
    started: Mutex<Vec<StackName>>,
    stopped: Mutex<Vec<StackName>>,
}

#[allow(dead_code)]
impl RecordingObserver {
    pub fn messages(&self) -> Vec<String> {
        self.updates
            .lock()
            .iter()
            .map(|update| update.message.clone())
            .collect()
    }

    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().clone()
    }

    pub fn events(&self) -> Vec<StackEvent> {
        self.events.lock().clone()
    }

    pub fn started(&self) -> Vec<StackName> {
        self.started.lock().clone()
    }

    pub fn stopped(&self) -> Vec<StackName> {
        self.stopped.lock().clone()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_progress(&self, update: &ProgressUpdate) {
        self.updates.lock().push(update.clone());
    }

    fn on_events_started(&self, stack: &StackName) {
        self.started.lock().push(stack.clone());
    }

    fn on_stack_event(&self, event: &StackEvent) {
        self.events.lock().push(event.clone());
    }

    fn on_events_stopped(&self, stack: &StackName) {
        self.stopped.lock().push(stack.clone());
    }
}
