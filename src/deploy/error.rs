// ABOUTME: Error types for deployment orchestration.
// ABOUTME: Step failures feed the rollback cascade; RunError is what callers of a run see.

use snafu::Snafu;
use std::time::Duration;

use crate::cloud::{CloudError, StackStatus};
use crate::types::{StackName, TableName};

use super::machine::Event;
use super::state::MachineState;

/// Failure of one action of one step.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// The update submission was rejected.
    #[error("failed to submit update for stack {stack}: {source}")]
    Operation {
        stack: StackName,
        #[source]
        source: CloudError,
    },

    /// The stack is missing or busy and cannot accept an update.
    #[error("stack {stack} is in {status} state and can not be updated")]
    NotDeployable { stack: StackName, status: StackStatus },

    /// The stack settled in a failure status.
    #[error("stack {stack} settled in {status}: {reason}")]
    Unstable {
        stack: StackName,
        status: StackStatus,
        reason: String,
    },

    /// The stack did not settle in time.
    #[error(
        "stack {stack} did not stabilize within {}",
        humantime::format_duration(*timeout)
    )]
    StabilityTimeout { stack: StackName, timeout: Duration },

    /// Polling the stack status failed.
    #[error("failed to poll status of stack {stack}: {source}")]
    StabilityPoll {
        stack: StackName,
        #[source]
        source: CloudError,
    },

    /// Checking a table's indexes failed.
    #[error("failed to check indexes of table {table}: {source}")]
    Readiness {
        table: TableName,
        #[source]
        source: CloudError,
    },

    /// Indexes did not become active in time.
    #[error(
        "indexes of {tables} table(s) did not become active within {}",
        humantime::format_duration(*timeout)
    )]
    ReadinessTimeout { tables: usize, timeout: Duration },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepErrorKind {
    /// The mutation call failed.
    Operation,
    /// The stack did not reach a stable success status.
    Stability,
    /// Dependent indexes never became ready.
    Readiness,
}

impl StepError {
    pub fn kind(&self) -> StepErrorKind {
        match self {
            StepError::Operation { .. } | StepError::NotDeployable { .. } => {
                StepErrorKind::Operation
            }
            StepError::Unstable { .. }
            | StepError::StabilityTimeout { .. }
            | StepError::StabilityPoll { .. } => StepErrorKind::Stability,
            StepError::Readiness { .. } | StepError::ReadinessTimeout { .. } => {
                StepErrorKind::Readiness
            }
        }
    }
}

/// A step that cannot be built from its two operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidStepError {
    #[error("forward operation targets stack {forward} but backward operation targets {backward}")]
    StackMismatch {
        forward: StackName,
        backward: StackName,
    },

    #[error("operation for stack {0} has no region")]
    MissingRegion(StackName),
}

/// Invariant violations inside the state machine. Never routed through rollback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MachineError {
    #[error("event {event} is not valid in state {state}")]
    InvalidEvent { state: MachineState, event: Event },

    #[error("step index {index} is outside a sequence of {len} step(s)")]
    IndexOutOfRange { index: isize, len: usize },

    #[error("machine ended in {state} without the failure that led there")]
    MissingFailure { state: MachineState },

    #[error("machine stopped in non-terminal state {state}")]
    NotTerminal { state: MachineState },
}

/// Outcome of a deployment run that did not end in `Deployed`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RunError {
    #[snafu(display("deployment sequence is empty"))]
    EmptySequence,

    #[snafu(display("a deployment run has already started"))]
    AlreadyStarted,

    #[snafu(display("invalid deployment step: {source}"))]
    InvalidStep { source: InvalidStepError },

    #[snafu(display(
        "template(s) missing from bucket {bucket}: {}",
        missing.join(", ")
    ))]
    PreflightArtifactMissing { bucket: String, missing: Vec<String> },

    #[snafu(display("failed to check templates in bucket {bucket}: {source}"))]
    PreflightCheck { bucket: String, source: CloudError },

    #[snafu(display("orchestration contract violated: {source}"))]
    Contract { source: MachineError },

    #[snafu(display(
        "step {} (stack {stack}) failed and the deployment was rolled back: {source}",
        step + 1
    ))]
    RolledBack {
        step: usize,
        stack: StackName,
        source: StepError,
    },

    #[snafu(display(
        "step {} (stack {stack}) failed: {source}; rollback of step {} (stack {rollback_stack}) also failed: {rollback}; manual repair required",
        step + 1,
        rollback_step + 1
    ))]
    Failed {
        step: usize,
        stack: StackName,
        source: StepError,
        rollback_step: usize,
        rollback_stack: StackName,
        rollback: StepError,
    },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunErrorKind {
    EmptySequence,
    AlreadyStarted,
    InvalidStep,
    PreflightArtifactMissing,
    PreflightCheck,
    ContractViolation,
    /// A step failed and every completed step was restored.
    RolledBack,
    /// The rollback itself failed; infrastructure state is indeterminate.
    Failed,
}

impl RunError {
    pub fn kind(&self) -> RunErrorKind {
        match self {
            RunError::EmptySequence => RunErrorKind::EmptySequence,
            RunError::AlreadyStarted => RunErrorKind::AlreadyStarted,
            RunError::InvalidStep { .. } => RunErrorKind::InvalidStep,
            RunError::PreflightArtifactMissing { .. } => RunErrorKind::PreflightArtifactMissing,
            RunError::PreflightCheck { .. } => RunErrorKind::PreflightCheck,
            RunError::Contract { .. } => RunErrorKind::ContractViolation,
            RunError::RolledBack { .. } => RunErrorKind::RolledBack,
            RunError::Failed { .. } => RunErrorKind::Failed,
        }
    }

    /// Terminal machine state reached, if the machine ran at all.
    pub fn terminal_state(&self) -> Option<MachineState> {
        match self {
            RunError::RolledBack { .. } => Some(MachineState::RolledBack),
            RunError::Failed { .. } => Some(MachineState::Failed),
            _ => None,
        }
    }

    /// True when the rollback failed and an operator has to repair the stacks.
    pub fn requires_manual_repair(&self) -> bool {
        matches!(self, RunError::Failed { .. })
    }

    /// The step failure that started the rollback cascade.
    pub fn trigger_error(&self) -> Option<&StepError> {
        match self {
            RunError::RolledBack { source, .. } | RunError::Failed { source, .. } => Some(source),
            _ => None,
        }
    }

    /// The failure that stopped the rollback.
    pub fn rollback_error(&self) -> Option<&StepError> {
        match self {
            RunError::Failed { rollback, .. } => Some(rollback),
            _ => None,
        }
    }
}
