// ABOUTME: Orchestration state: the enumerated machine state and the context it moves through.
// ABOUTME: Context index runs from -1 (nothing started) to len (all forward steps complete).

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use super::error::MachineError;
use super::step::{DeploymentSequence, DeploymentStep, Direction, StepOperation};

/// Sub-state of a step in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Submit the mutation for the current step.
    TriggerOperation,
    /// Wait for the step's tables to report active indexes.
    WaitForReadiness,
    /// Wait for the stack to settle.
    WaitForStability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", content = "phase", rename_all = "snake_case")]
pub enum MachineState {
    Idle,
    Deploying(Phase),
    RollingBack(Phase),
    Deployed,
    RolledBack,
    Failed,
}

impl MachineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MachineState::Deployed | MachineState::RolledBack | MachineState::Failed
        )
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            MachineState::Deploying(_) => Some(Direction::Forward),
            MachineState::RollingBack(_) => Some(Direction::Backward),
            _ => None,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            MachineState::Deploying(phase) | MachineState::RollingBack(phase) => Some(*phase),
            _ => None,
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineState::Idle => f.write_str("idle"),
            MachineState::Deploying(phase) => write!(f, "deploying ({phase:?})"),
            MachineState::RollingBack(phase) => write!(f, "rolling back ({phase:?})"),
            MachineState::Deployed => f.write_str("deployed"),
            MachineState::RolledBack => f.write_str("rolled back"),
            MachineState::Failed => f.write_str("failed"),
        }
    }
}

/// Everything the machine carries between transitions.
///
/// `current_index` is the step in flight. It starts at -1, ends at `len` after
/// a full deployment and returns to -1 after a full rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestrationContext {
    sequence: Arc<DeploymentSequence>,
    current_index: isize,
    bucket: String,
    region: String,
}

impl OrchestrationContext {
    pub fn new(
        sequence: Arc<DeploymentSequence>,
        bucket: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            sequence,
            current_index: -1,
            bucket: bucket.into(),
            region: region.into(),
        }
    }

    pub fn sequence(&self) -> &Arc<DeploymentSequence> {
        &self.sequence
    }

    pub fn current_index(&self) -> isize {
        self.current_index
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// The step at `current_index`, if the index points inside the sequence.
    pub fn current_step(&self) -> Option<&DeploymentStep> {
        usize::try_from(self.current_index)
            .ok()
            .and_then(|index| self.sequence.get(index))
    }

    /// The operation of the current step for `direction`.
    pub fn operation(&self, direction: Direction) -> Result<&StepOperation, MachineError> {
        self.current_step()
            .map(|step| step.operation(direction))
            .ok_or(MachineError::IndexOutOfRange {
                index: self.current_index,
                len: self.sequence.len(),
            })
    }

    pub(super) fn set_current_index(&mut self, index: isize) {
        debug_assert!(-1 <= index && index <= self.sequence.len() as isize);
        self.current_index = index;
    }
}
