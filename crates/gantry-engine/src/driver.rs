use crate::action::{ActionRegistry, CompositionError};
use crate::bus::{TransitionBus, TransitionNotice};
use crate::cancel::CancelSignal;
use crate::context::{ExecutionContext, StateFailure, TransitionRecord};
use crate::state::{Event, State};
use crate::transitions::TransitionTable;
use futures::FutureExt;
use gantry_core::types::TerminalStatus;
use std::panic::AssertUnwindSafe;
use tracing::{error, info, warn};

/// Ceiling on applied transitions per run. A healthy run stays far below
/// this even with a full setup retry budget; hitting it means the table or
/// an action is defective, and the run is forced to ABORTED.
const DEFAULT_MAX_TRANSITIONS: usize = 128;

// ---------------------------------------------------------------------------
// StateMachineDriver
// ---------------------------------------------------------------------------

/// The loop that owns the current state and drives one job run to a
/// terminal state.
///
/// Per iteration: observe cancellation, dispatch the action bound to the
/// current state, feed the returned event through the transition table,
/// record and publish the transition, repeat. The driver holds no retry
/// policy and never inspects failure kinds — actions encode policy in the
/// events they emit; the driver only routes.
///
/// Every run ends in a terminal state: action panics and unmapped
/// transitions are converted into [`Event::FatalAbort`] routing instead of
/// propagating.
pub struct StateMachineDriver {
    registry: ActionRegistry,
    table: TransitionTable,
    cancel: CancelSignal,
    bus: TransitionBus,
    max_transitions: usize,
}

impl StateMachineDriver {
    /// Build a driver after proving the registry/table composition valid.
    pub fn new(
        registry: ActionRegistry,
        table: TransitionTable,
        cancel: CancelSignal,
    ) -> Result<Self, CompositionError> {
        registry.validate(&table)?;
        Ok(Self {
            registry,
            table,
            cancel,
            bus: TransitionBus::new(),
            max_transitions: DEFAULT_MAX_TRANSITIONS,
        })
    }

    pub fn with_max_transitions(mut self, max_transitions: usize) -> Self {
        self.max_transitions = max_transitions;
        self
    }

    /// The cancellation entry point, safe to trigger from any task or
    /// signal handler.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Subscribe-side handle to the per-transition notices.
    pub fn transition_bus(&self) -> TransitionBus {
        self.bus.clone()
    }

    /// Drive a run from INITIALIZE to a terminal state.
    pub async fn run(&self, ctx: &mut ExecutionContext) -> TerminalStatus {
        self.run_from(ctx, State::Initialize).await
    }

    /// Drive a run from an explicit initial state.
    ///
    /// A context that already carries a terminal status is returned as-is;
    /// no action executes twice for a finished run.
    pub async fn run_from(&self, ctx: &mut ExecutionContext, initial: State) -> TerminalStatus {
        if let Some(status) = ctx.terminal_status() {
            warn!(job = %ctx.job_name(), status = %status, "run already terminal; not re-running");
            return status;
        }

        let mut state = initial;
        let mut steps = 0usize;
        info!(job = %ctx.job_name(), from = %state, "execution engine starting");

        while !state.is_terminal() {
            steps += 1;
            if steps > self.max_transitions {
                error!(state = %state, steps, "transition ceiling exceeded; forcing abort");
                ctx.record_failure(StateFailure::new(
                    state,
                    format!("transition ceiling of {} exceeded", self.max_transitions),
                ));
                state = self.force_abort(ctx, state);
                break;
            }

            let event = if state.observes_cancellation() && self.cancel.is_cancelled() {
                info!(state = %state, "cancellation observed before action");
                ctx.mark_cancelled();
                Event::JobCancelled
            } else {
                self.dispatch(state, ctx).await
            };

            let next = match self.table.next(state, event) {
                Some(next) => next,
                None => {
                    error!(state = %state, event = %event, "unmapped transition; forcing abort");
                    ctx.record_failure(StateFailure::new(
                        state,
                        format!("no transition mapped for event {event}"),
                    ));
                    state = self.force_abort(ctx, state);
                    continue;
                }
            };

            info!(from = %state, event = %event, to = %next, "transition");
            self.apply(ctx, TransitionRecord::new(state, event, next));
            state = next;
        }

        let status = if state == State::Aborted {
            TerminalStatus::Aborted
        } else {
            classify(ctx)
        };
        if let Err(defect) = ctx.set_terminal_status(status) {
            warn!(error = %defect, "terminal status already recorded");
        }
        info!(
            job = %ctx.job_name(),
            status = %status,
            transitions = ctx.history().len(),
            "execution engine finished"
        );
        status
    }

    /// Invoke the action for `state`, converting a panic into the abort
    /// event instead of unwinding through the loop.
    async fn dispatch(&self, state: State, ctx: &mut ExecutionContext) -> Event {
        let Some(action) = self.registry.action_for(state) else {
            // Unreachable after validate(); answered with the backstop anyway.
            error!(state = %state, "no action registered at run time");
            ctx.record_failure(StateFailure::new(state, "no action registered"));
            return Event::FatalAbort;
        };

        match AssertUnwindSafe(action.execute(ctx)).catch_unwind().await {
            Ok(event) => event,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(state = %state, panic = %message, "action panicked; forcing abort");
                ctx.record_failure(StateFailure::new(
                    state,
                    format!("action panicked: {message}"),
                ));
                Event::FatalAbort
            }
        }
    }

    /// Record a synthesized abort transition and hand back the abort state.
    fn force_abort(&self, ctx: &mut ExecutionContext, from: State) -> State {
        self.apply(ctx, TransitionRecord::new(from, Event::FatalAbort, State::Aborted));
        State::Aborted
    }

    fn apply(&self, ctx: &mut ExecutionContext, record: TransitionRecord) {
        self.bus.publish(TransitionNotice::from_record(ctx, &record));
        ctx.record_transition(record);
    }
}

// ---------------------------------------------------------------------------
// Terminal classification
// ---------------------------------------------------------------------------

/// Map the accumulated run state to its terminal status. Precedence:
/// timeout over cancellation over recorded failure over process exit.
fn classify(ctx: &ExecutionContext) -> TerminalStatus {
    if ctx.timed_out() {
        TerminalStatus::TimedOut
    } else if ctx.cancelled() {
        TerminalStatus::Cancelled
    } else if ctx.failure().is_some() {
        TerminalStatus::Failed
    } else {
        match ctx.process_outcome() {
            Some(exit) if exit.success() => TerminalStatus::Succeeded,
            Some(_) => TerminalStatus::Failed,
            None => {
                warn!("run completed without a process outcome or a failure");
                TerminalStatus::Failed
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
