// ABOUTME: Progress observer notified once per transition and per streamed stack event.
// ABOUTME: Every method defaults to a no-op; NoopObserver serves headless runs.

use serde::Serialize;

use crate::cloud::StackEvent;
use crate::types::StackName;

use super::state::MachineState;

/// Human-readable progress for one transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub state: MachineState,
    pub message: String,
    /// Steps completed in the current direction.
    pub completed: usize,
    /// Steps the current direction has to cover.
    pub total: usize,
}

pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, _update: &ProgressUpdate) {}

    fn on_events_started(&self, _stack: &StackName) {}

    fn on_stack_event(&self, _event: &StackEvent) {}

    fn on_events_stopped(&self, _stack: &StackName) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {}
