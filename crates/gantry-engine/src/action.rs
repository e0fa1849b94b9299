use crate::context::{ExecutionContext, StateFailure};
use crate::state::{Event, State};
use crate::transitions::{CompositionDefect, TransitionTable};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

// ---------------------------------------------------------------------------
// Action trait
// ---------------------------------------------------------------------------

/// One state's unit of work in the execution engine.
///
/// An action reads the context fields produced by earlier states, performs
/// one bounded lifecycle step (possibly through a collaborator), writes only
/// the fields its state owns, and answers with exactly one [`Event`]. The
/// driver — never the action — applies the transition.
#[async_trait::async_trait]
pub trait Action: Send + Sync {
    /// The lifecycle state this action is bound to.
    fn state(&self) -> State;

    /// Every event `perform` can emit. Declared statically so the
    /// composition-time validation can prove the transition table total.
    fn legal_events(&self) -> &'static [Event];

    /// The event [`Action::execute`] emits when `perform` fails.
    fn failure_event(&self) -> Event;

    /// Execute one lifecycle step against the shared context.
    async fn perform(&self, ctx: &mut ExecutionContext) -> Result<Event, StateFailure>;

    /// Failure wrapping shared by all actions: a [`StateFailure`] from
    /// `perform` is recorded on the context and translated into this state's
    /// failure event. Raw collaborator errors never escape past here.
    async fn execute(&self, ctx: &mut ExecutionContext) -> Event {
        match self.perform(ctx).await {
            Ok(event) => event,
            Err(failure) => {
                let event = self.failure_event();
                warn!(
                    state = %self.state(),
                    cause = %failure.chain(),
                    event = %event,
                    "lifecycle step failed"
                );
                ctx.record_failure(failure);
                event
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CompositionError
// ---------------------------------------------------------------------------

fn render_defects(defects: &[CompositionDefect]) -> String {
    defects
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// The full set of wiring mistakes found by [`ActionRegistry::validate`].
#[derive(Debug, thiserror::Error)]
#[error("invalid state machine composition: {}", render_defects(.defects))]
pub struct CompositionError {
    pub defects: Vec<CompositionDefect>,
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

/// State → Action registration table, built once at composition time.
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<State, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under its bound state. Returns the displaced
    /// action when one was already registered for that state.
    pub fn register(&mut self, action: Arc<dyn Action>) -> Option<Arc<dyn Action>> {
        self.actions.insert(action.state(), action)
    }

    pub fn action_for(&self, state: State) -> Option<&Arc<dyn Action>> {
        self.actions.get(&state)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Prove the registry and table form a complete machine:
    /// - every non-terminal state has an action bound to itself,
    /// - every declared legal event of every action is mapped,
    /// - the driver-synthesized pairs (`FATAL_ABORT` everywhere,
    ///   `JOB_CANCELLED` where cancellation is observed) are mapped,
    /// - every transition target is terminal or has an action,
    /// - no transition leaves a terminal state.
    ///
    /// Run this once at startup; a defect here is a programming mistake, not
    /// a runtime condition.
    pub fn validate(&self, table: &TransitionTable) -> Result<(), CompositionError> {
        let mut defects = Vec::new();

        for state in State::ALL {
            if state.is_terminal() {
                continue;
            }
            match self.actions.get(&state) {
                None => defects.push(CompositionDefect::MissingAction { state }),
                Some(action) if action.state() != state => {
                    defects.push(CompositionDefect::MisboundAction {
                        state,
                        bound: action.state(),
                    });
                }
                Some(action) => {
                    for &event in action.legal_events() {
                        if !table.contains(state, event) {
                            defects.push(CompositionDefect::UnmappedEvent { state, event });
                        }
                    }
                }
            }
            if !table.contains(state, Event::FatalAbort) {
                defects.push(CompositionDefect::UnmappedEvent {
                    state,
                    event: Event::FatalAbort,
                });
            }
            if state.observes_cancellation() && !table.contains(state, Event::JobCancelled) {
                defects.push(CompositionDefect::UnmappedEvent {
                    state,
                    event: Event::JobCancelled,
                });
            }
        }

        for (from, event, to) in table.entries() {
            if from.is_terminal() {
                defects.push(CompositionDefect::TransitionFromTerminal { state: from, event });
            }
            if !to.is_terminal() && !self.actions.contains_key(&to) {
                defects.push(CompositionDefect::UnreachableTarget {
                    state: from,
                    event,
                    target: to,
                });
            }
        }

        if defects.is_empty() {
            Ok(())
        } else {
            Err(CompositionError { defects })
        }
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut states: Vec<State> = self.actions.keys().copied().collect();
        states.sort_by_key(|s| format!("{s}"));
        f.debug_struct("ActionRegistry").field("states", &states).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
