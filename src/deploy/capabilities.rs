// ABOUTME: Capability interface the state machine evaluates its actions against.
// ABOUTME: One method per action plus a scoped event-stream watch released on drop.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::error::StepError;
use super::step::StepOperation;

/// Side effects the machine can request for a step.
///
/// The orchestrator implements this against a live provider; tests implement
/// it with deterministic fakes.
#[async_trait]
pub trait StepCapabilities: Send + Sync {
    /// Submit the operation's update.
    async fn submit(&self, operation: &StepOperation) -> Result<(), StepError>;

    /// Wait until the operation's stack reaches a stable status.
    async fn await_stable(&self, operation: &StepOperation) -> Result<(), StepError>;

    /// Wait until every table of the operation reports active indexes.
    async fn await_tables_ready(&self, operation: &StepOperation) -> Result<(), StepError>;

    /// Start streaming events for the step. Streaming stops when the watch drops.
    fn watch_events(&self, _operation: &StepOperation) -> EventWatch {
        EventWatch::noop()
    }
}

#[async_trait]
impl<T: StepCapabilities + ?Sized> StepCapabilities for Arc<T> {
    async fn submit(&self, operation: &StepOperation) -> Result<(), StepError> {
        (**self).submit(operation).await
    }

    async fn await_stable(&self, operation: &StepOperation) -> Result<(), StepError> {
        (**self).await_stable(operation).await
    }

    async fn await_tables_ready(&self, operation: &StepOperation) -> Result<(), StepError> {
        (**self).await_tables_ready(operation).await
    }

    fn watch_events(&self, operation: &StepOperation) -> EventWatch {
        (**self).watch_events(operation)
    }
}

#[async_trait]
impl<T: StepCapabilities + ?Sized> StepCapabilities for &T {
    async fn submit(&self, operation: &StepOperation) -> Result<(), StepError> {
        (**self).submit(operation).await
    }

    async fn await_stable(&self, operation: &StepOperation) -> Result<(), StepError> {
        (**self).await_stable(operation).await
    }

    async fn await_tables_ready(&self, operation: &StepOperation) -> Result<(), StepError> {
        (**self).await_tables_ready(operation).await
    }

    fn watch_events(&self, operation: &StepOperation) -> EventWatch {
        (**self).watch_events(operation)
    }
}

/// A running event stream for one step.
///
/// Dropping the watch aborts the background task and runs the stop callback,
/// so every way of leaving a step releases it.
#[must_use = "the event stream stops as soon as the watch is dropped"]
#[derive(Default)]
pub struct EventWatch {
    task: Option<JoinHandle<()>>,
    on_stop: Option<Box<dyn FnOnce() + Send>>,
}

impl EventWatch {
    /// A watch with nothing behind it.
    pub fn noop() -> Self {
        Self::default()
    }

    /// Watch a spawned background task.
    pub fn new(task: JoinHandle<()>) -> Self {
        Self {
            task: Some(task),
            on_stop: None,
        }
    }

    /// Run `callback` once when the watch is released.
    pub fn on_stop(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_stop = Some(Box::new(callback));
        self
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for EventWatch {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(callback) = self.on_stop.take() {
            callback();
        }
    }
}

impl fmt::Debug for EventWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventWatch")
            .field("active", &self.is_active())
            .finish()
    }
}
