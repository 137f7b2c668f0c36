// ABOUTME: Deployment orchestration as an explicit state machine over forward and backward steps.
// ABOUTME: Exports the machine, its capabilities, the orchestrator and the reporting interfaces.

mod bindings;
mod capabilities;
mod error;
mod machine;
mod observer;
mod orchestrator;
mod preflight;
mod readiness;
mod recorder;
mod state;
mod state_file;
mod step;

pub use bindings::CloudCapabilities;
pub use capabilities::{EventWatch, StepCapabilities};
pub use error::{
    InvalidStepError, MachineError, RunError, RunErrorKind, StepError, StepErrorKind,
};
pub use machine::{
    Action, Event, MachineOutcome, StateMachine, StepFailure, Transition, pending_action,
    transition,
};
pub use observer::{NoopObserver, ProgressObserver, ProgressUpdate};
pub use orchestrator::{DeploymentOrchestrator, OrchestratorSettings, RunSummary, execute};
pub use preflight::verify_templates;
pub use readiness::ReadinessWaiter;
pub use recorder::{
    DeploymentStatus, NoopRecorder, RecorderError, StateRecorder, StepRecord, StepStatus,
};
pub use state::{MachineState, OrchestrationContext, Phase};
pub use state_file::{DeploymentRecord, FileStateRecorder, RecordPhase};
pub use step::{
    DeploymentSequence, DeploymentStep, Direction, StepOperation, StepOperationBuilder,
};
