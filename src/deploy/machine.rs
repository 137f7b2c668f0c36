// ABOUTME: Deployment state machine: a pure transition function and the driver that runs it.
// ABOUTME: Forward steps advance the index; any failure walks backward redeploying prior templates.

use futures::Stream;
use std::fmt;

use crate::types::StackName;

use super::capabilities::{EventWatch, StepCapabilities};
use super::error::{MachineError, StepError};
use super::state::{MachineState, OrchestrationContext, Phase};
use super::step::Direction;

/// Inbound event folded into the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Leave `Idle`.
    Start,
    /// The pending action succeeded.
    Succeeded,
    /// The pending action failed.
    Failed,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Start => f.write_str("start"),
            Event::Succeeded => f.write_str("succeeded"),
            Event::Failed => f.write_str("failed"),
        }
    }
}

/// Side effect requested by a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Submit { direction: Direction, index: usize },
    AwaitReadiness { direction: Direction, index: usize },
    AwaitStability { direction: Direction, index: usize },
}

impl Action {
    fn for_phase(phase: Phase, direction: Direction, index: usize) -> Self {
        match phase {
            Phase::TriggerOperation => Action::Submit { direction, index },
            Phase::WaitForReadiness => Action::AwaitReadiness { direction, index },
            Phase::WaitForStability => Action::AwaitStability { direction, index },
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Action::Submit { direction, .. }
            | Action::AwaitReadiness { direction, .. }
            | Action::AwaitStability { direction, .. } => *direction,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Action::Submit { index, .. }
            | Action::AwaitReadiness { index, .. }
            | Action::AwaitStability { index, .. } => *index,
        }
    }
}

/// Result of folding one event: the new state, the new context, and the
/// action the new state asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: MachineState,
    pub state: MachineState,
    pub context: OrchestrationContext,
    pub action: Option<Action>,
}

impl MachineState {
    /// The single action this state asks for.
    pub fn action(&self, context: &OrchestrationContext) -> Option<Action> {
        pending_action(*self, context)
    }
}

/// The action pending in `state`, or `None` for `Idle` and terminal states.
pub fn pending_action(state: MachineState, context: &OrchestrationContext) -> Option<Action> {
    let direction = state.direction()?;
    let phase = state.phase()?;
    let index = usize::try_from(context.current_index()).ok()?;
    Some(Action::for_phase(phase, direction, index))
}

/// Fold `event` into `state`.
///
/// # Errors
///
/// Returns `MachineError::InvalidEvent` for an event the state does not accept
/// and `MachineError::IndexOutOfRange` when the current step is needed but the
/// index is outside the sequence.
pub fn transition(
    state: MachineState,
    mut context: OrchestrationContext,
    event: Event,
) -> Result<Transition, MachineError> {
    use MachineState::*;
    use Phase::*;

    let next = match (state, event) {
        (Idle, Event::Start) => {
            context.set_current_index(0);
            if context.is_empty() {
                Deployed
            } else {
                Deploying(TriggerOperation)
            }
        }

        // Forward branch
        (Deploying(TriggerOperation), Event::Succeeded) => {
            if context.operation(Direction::Forward)?.has_tables() {
                Deploying(WaitForReadiness)
            } else {
                Deploying(WaitForStability)
            }
        }
        (Deploying(WaitForReadiness), Event::Succeeded) => Deploying(WaitForStability),
        (Deploying(WaitForStability), Event::Succeeded) => {
            let index = context.current_index() + 1;
            context.set_current_index(index);
            if index == context.len() as isize {
                Deployed
            } else {
                Deploying(TriggerOperation)
            }
        }
        // The failing step is the first one undone.
        (Deploying(_), Event::Failed) => RollingBack(TriggerOperation),

        // Backward branch
        (RollingBack(TriggerOperation), Event::Succeeded) => {
            if context.operation(Direction::Backward)?.has_tables() {
                RollingBack(WaitForReadiness)
            } else {
                RollingBack(WaitForStability)
            }
        }
        (RollingBack(WaitForReadiness), Event::Succeeded) => RollingBack(WaitForStability),
        (RollingBack(WaitForStability), Event::Succeeded) => {
            let index = context.current_index() - 1;
            context.set_current_index(index);
            if index == -1 {
                RolledBack
            } else {
                RollingBack(TriggerOperation)
            }
        }
        // A failed rollback leaves the stack in an unknown state; stop here.
        (RollingBack(_), Event::Failed) => Failed,

        (state, event) => return Err(MachineError::InvalidEvent { state, event }),
    };

    let action = pending_action(next, &context);
    Ok(Transition {
        from: state,
        state: next,
        context,
        action,
    })
}

/// A step failure, with the step it happened on.
#[derive(Debug)]
pub struct StepFailure {
    pub index: usize,
    pub stack: StackName,
    pub error: StepError,
}

/// Final state of a driven machine and the failures that led there.
#[derive(Debug)]
pub struct MachineOutcome {
    pub state: MachineState,
    pub context: OrchestrationContext,
    /// First forward failure; starts the rollback cascade.
    pub trigger: Option<StepFailure>,
    /// Failure that ended the rollback.
    pub rollback: Option<StepFailure>,
}

/// Drives [`transition`] by evaluating each pending action against `C`.
pub struct StateMachine<C> {
    capabilities: C,
    state: MachineState,
    context: OrchestrationContext,
    watch: Option<((Direction, usize), EventWatch)>,
    trigger: Option<StepFailure>,
    rollback: Option<StepFailure>,
    halted: bool,
}

impl<C: StepCapabilities> StateMachine<C> {
    pub fn new(context: OrchestrationContext, capabilities: C) -> Self {
        Self {
            capabilities,
            state: MachineState::Idle,
            context,
            watch: None,
            trigger: None,
            rollback: None,
            halted: false,
        }
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn context(&self) -> &OrchestrationContext {
        &self.context
    }

    /// Evaluate the pending action and fold its outcome into the next state.
    ///
    /// Returns `None` once the machine is terminal or halted by a contract
    /// violation.
    pub async fn advance(&mut self) -> Option<Result<Transition, MachineError>> {
        if self.halted || self.state.is_terminal() {
            self.watch = None;
            return None;
        }

        let event = match pending_action(self.state, &self.context) {
            None => Event::Start,
            Some(action) => match self.perform(action).await {
                Ok(event) => event,
                Err(err) => return Some(Err(self.halt(err))),
            },
        };

        match transition(self.state, self.context.clone(), event) {
            Ok(next) => {
                tracing::debug!(
                    from = %next.from,
                    to = %next.state,
                    index = next.context.current_index(),
                    "state transition"
                );
                self.state = next.state;
                self.context = next.context.clone();

                let next_step = next.action.map(|a| (a.direction(), a.index()));
                if self.watch.as_ref().map(|(step, _)| *step) != next_step {
                    // Leaving the step: stop its event stream.
                    self.watch = None;
                }

                Some(Ok(next))
            }
            Err(err) => Some(Err(self.halt(err))),
        }
    }

    /// Borrow the machine as a stream of transitions ending in a terminal state.
    pub fn transitions(&mut self) -> impl Stream<Item = Result<Transition, MachineError>> + '_ {
        futures::stream::unfold(self, |machine| async move {
            let item = machine.advance().await?;
            Some((item, machine))
        })
    }

    /// Consume the machine as a stream of transitions ending in a terminal state.
    pub fn start(self) -> impl Stream<Item = Result<Transition, MachineError>> {
        futures::stream::unfold(self, |mut machine| async move {
            let item = machine.advance().await?;
            Some((item, machine))
        })
    }

    /// Release any event stream and hand back the final state and failures.
    pub fn finish(mut self) -> MachineOutcome {
        self.watch = None;
        MachineOutcome {
            state: self.state,
            context: self.context.clone(),
            trigger: self.trigger.take(),
            rollback: self.rollback.take(),
        }
    }

    async fn perform(&mut self, action: Action) -> Result<Event, MachineError> {
        let direction = action.direction();
        let index = action.index();
        let sequence = self.context.sequence().clone();
        let operation = sequence
            .get(index)
            .map(|step| step.operation(direction))
            .ok_or(MachineError::IndexOutOfRange {
                index: index as isize,
                len: sequence.len(),
            })?;

        let step = (direction, index);
        if self.watch.as_ref().map(|(current, _)| *current) != Some(step) {
            // Release the previous step's stream before opening the next.
            self.watch = None;
            self.watch = Some((step, self.capabilities.watch_events(operation)));
        }

        let result = match action {
            Action::Submit { .. } => self.capabilities.submit(operation).await,
            Action::AwaitReadiness { .. } => {
                self.capabilities.await_tables_ready(operation).await
            }
            Action::AwaitStability { .. } => self.capabilities.await_stable(operation).await,
        };

        match result {
            Ok(()) => Ok(Event::Succeeded),
            Err(error) => {
                tracing::warn!(
                    stack = %operation.stack(),
                    %direction,
                    step = index,
                    error = %error,
                    "step action failed"
                );
                let failure = StepFailure {
                    index,
                    stack: operation.stack().clone(),
                    error,
                };
                match direction {
                    Direction::Forward => self.trigger = Some(failure),
                    Direction::Backward => self.rollback = Some(failure),
                }
                Ok(Event::Failed)
            }
        }
    }

    fn halt(&mut self, err: MachineError) -> MachineError {
        tracing::error!(state = %self.state, error = %err, "state machine halted");
        self.halted = true;
        self.watch = None;
        err
    }
}

impl<C> fmt::Debug for StateMachine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.state)
            .field("current_index", &self.context.current_index())
            .field("halted", &self.halted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::step::{DeploymentSequence, DeploymentStep, StepOperation};
    use crate::types::{TableName, TemplateLocation};
    use std::sync::Arc;

    fn step(stack: &str, tables: &[&str]) -> DeploymentStep {
        let op = |path: &str| {
            StepOperation::builder(
                StackName::new(stack).unwrap(),
                TemplateLocation::in_bucket("bucket", "us-east-1", path),
                "us-east-1",
            )
            .tables(tables.iter().map(|t| TableName::new(t).unwrap()))
            .build()
        };
        DeploymentStep::new(op("fwd.json"), op("bwd.json")).unwrap()
    }

    fn context(steps: Vec<DeploymentStep>) -> OrchestrationContext {
        OrchestrationContext::new(
            Arc::new(DeploymentSequence::from(steps)),
            "bucket",
            "us-east-1",
        )
    }

    #[test]
    fn start_enters_first_trigger() {
        let t = transition(MachineState::Idle, context(vec![step("a", &[])]), Event::Start).unwrap();
        assert_eq!(t.state, MachineState::Deploying(Phase::TriggerOperation));
        assert_eq!(t.context.current_index(), 0);
        assert_eq!(
            t.action,
            Some(Action::Submit {
                direction: Direction::Forward,
                index: 0
            })
        );
    }

    #[test]
    fn trigger_goes_to_readiness_only_with_tables() {
        let mut ctx = context(vec![step("a", &["Todo-dev"]), step("b", &[])]);
        ctx.set_current_index(0);
        let t = transition(
            MachineState::Deploying(Phase::TriggerOperation),
            ctx.clone(),
            Event::Succeeded,
        )
        .unwrap();
        assert_eq!(t.state, MachineState::Deploying(Phase::WaitForReadiness));

        ctx.set_current_index(1);
        let t = transition(
            MachineState::Deploying(Phase::TriggerOperation),
            ctx,
            Event::Succeeded,
        )
        .unwrap();
        assert_eq!(t.state, MachineState::Deploying(Phase::WaitForStability));
    }

    #[test]
    fn forward_failure_keeps_index() {
        let mut ctx = context(vec![step("a", &[]), step("b", &[])]);
        ctx.set_current_index(1);
        let t = transition(
            MachineState::Deploying(Phase::WaitForStability),
            ctx,
            Event::Failed,
        )
        .unwrap();
        assert_eq!(t.state, MachineState::RollingBack(Phase::TriggerOperation));
        assert_eq!(t.context.current_index(), 1);
        assert_eq!(
            t.action,
            Some(Action::Submit {
                direction: Direction::Backward,
                index: 1
            })
        );
    }

    #[test]
    fn last_backward_stability_rolls_back() {
        let mut ctx = context(vec![step("a", &[])]);
        ctx.set_current_index(0);
        let t = transition(
            MachineState::RollingBack(Phase::WaitForStability),
            ctx,
            Event::Succeeded,
        )
        .unwrap();
        assert_eq!(t.state, MachineState::RolledBack);
        assert_eq!(t.context.current_index(), -1);
        assert_eq!(t.action, None);
    }

    #[test]
    fn terminal_states_reject_events() {
        for state in [
            MachineState::Deployed,
            MachineState::RolledBack,
            MachineState::Failed,
        ] {
            let err = transition(state, context(vec![step("a", &[])]), Event::Succeeded)
                .unwrap_err();
            assert!(matches!(err, MachineError::InvalidEvent { .. }));
        }
    }

    #[test]
    fn start_is_only_valid_when_idle() {
        let err = transition(
            MachineState::Deploying(Phase::WaitForReadiness),
            context(vec![step("a", &[])]),
            Event::Start,
        )
        .unwrap_err();
        assert_eq!(
            err,
            MachineError::InvalidEvent {
                state: MachineState::Deploying(Phase::WaitForReadiness),
                event: Event::Start,
            }
        );
    }

    #[test]
    fn trigger_with_index_outside_sequence_is_a_contract_violation() {
        let err = transition(
            MachineState::Deploying(Phase::TriggerOperation),
            context(vec![step("a", &[])]),
            Event::Succeeded,
        )
        .unwrap_err();
        assert_eq!(err, MachineError::IndexOutOfRange { index: -1, len: 1 });
    }
}
