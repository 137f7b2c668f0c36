// ABOUTME: Persistent-state recorder interface driven by machine transitions.
// ABOUTME: Purely observational: the orchestrator logs recorder errors and carries on.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::StackName;

/// Status of one step as seen by the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    WaitingForDeployment,
    Deploying,
    WaitingForTableReady,
    Deployed,
    WaitingForRollback,
    RollingBack,
    RolledBack,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::WaitingForDeployment => "WAITING_FOR_DEPLOYMENT",
            StepStatus::Deploying => "DEPLOYING",
            StepStatus::WaitingForTableReady => "WAITING_FOR_TABLE_READY",
            StepStatus::Deployed => "DEPLOYED",
            StepStatus::WaitingForRollback => "WAITING_FOR_ROLLBACK",
            StepStatus::RollingBack => "ROLLING_BACK",
            StepStatus::RolledBack => "ROLLED_BACK",
        };
        f.write_str(s)
    }
}

/// Final status of a whole deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Deployed,
    RolledBack,
    Failed,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentStatus::Deployed => f.write_str("DEPLOYED"),
            DeploymentStatus::RolledBack => f.write_str("ROLLED_BACK"),
            DeploymentStatus::Failed => f.write_str("FAILED"),
        }
    }
}

/// Initial entry for one step, handed to `start_deployment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub stack: StackName,
    pub status: StepStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("failed to write deployment state: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode deployment state: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Rejected(String),
}

/// Receives deployment progress for persistence.
///
/// Called synchronously from the driver loop, so implementations must not block
/// for long.
pub trait StateRecorder: Send + Sync {
    /// A multi-step deployment is starting.
    fn start_deployment(&self, steps: &[StepRecord]) -> Result<(), RecorderError>;

    /// The run entered the rollback branch.
    fn start_rollback(&self) -> Result<(), RecorderError>;

    /// Mark the current step with `status` and move on to the next one.
    fn advance_step(&self, status: StepStatus) -> Result<(), RecorderError>;

    fn update_current_step_status(&self, status: StepStatus) -> Result<(), RecorderError>;

    fn finish_deployment(&self, status: DeploymentStatus) -> Result<(), RecorderError>;
}

/// Recorder that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl StateRecorder for NoopRecorder {
    fn start_deployment(&self, _steps: &[StepRecord]) -> Result<(), RecorderError> {
        Ok(())
    }

    fn start_rollback(&self) -> Result<(), RecorderError> {
        Ok(())
    }

    fn advance_step(&self, _status: StepStatus) -> Result<(), RecorderError> {
        Ok(())
    }

    fn update_current_step_status(&self, _status: StepStatus) -> Result<(), RecorderError> {
        Ok(())
    }

    fn finish_deployment(&self, _status: DeploymentStatus) -> Result<(), RecorderError> {
        Ok(())
    }
}
