use crate::state::{Event, State};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// TransitionTable
// ---------------------------------------------------------------------------

/// Static mapping from (current state, emitted event) to next state.
///
/// The table is data, not control flow: it is built once at composition time
/// and proven total against the registered actions by
/// [`crate::action::ActionRegistry::validate`] before the first run. An
/// unmapped pair at run time is a defect the driver answers with
/// [`Event::FatalAbort`] routing, never a panic.
#[derive(Debug, Clone, Default)]
pub struct TransitionTable {
    map: HashMap<(State, Event), State>,
}

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `from + event -> to`. Returns the previously mapped target
    /// when the pair was already present (a composition mistake the tests
    /// assert against via [`TransitionTable::len`]).
    pub fn insert(&mut self, from: State, event: Event, to: State) -> Option<State> {
        self.map.insert((from, event), to)
    }

    /// Look up the next state for `(from, event)`.
    pub fn next(&self, from: State, event: Event) -> Option<State> {
        self.map.get(&(from, event)).copied()
    }

    pub fn contains(&self, from: State, event: Event) -> bool {
        self.map.contains_key(&(from, event))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate all registered transitions.
    pub fn entries(&self) -> impl Iterator<Item = (State, Event, State)> + '_ {
        self.map.iter().map(|(&(from, event), &to)| (from, event, to))
    }

    /// The standard job lifecycle graph.
    ///
    /// Failures of every flavor route through `Cleanup` so runtime handles
    /// are always released; only the defect backstop jumps straight to
    /// `Aborted`. `SetupJob` is the one state that may loop on itself (its
    /// action owns the retry budget).
    pub fn standard() -> Self {
        use Event::*;
        use State::*;

        let mut table = Self::new();

        table.insert(Initialize, InitializeComplete, ResolveJobSpecification);
        table.insert(Initialize, InitializeFailed, Cleanup);

        table.insert(ResolveJobSpecification, ResolveJobSpecificationComplete, SetupJob);
        table.insert(ResolveJobSpecification, ResolveJobSpecificationFailed, Cleanup);
        table.insert(ResolveJobSpecification, JobTimedOut, Cleanup);

        table.insert(SetupJob, SetupJobComplete, LaunchJob);
        table.insert(SetupJob, SetupJobFailedRetryable, SetupJob);
        table.insert(SetupJob, SetupJobFailedFatal, Cleanup);

        table.insert(LaunchJob, LaunchJobComplete, MonitorJob);
        table.insert(LaunchJob, LaunchJobFailed, Cleanup);

        table.insert(MonitorJob, MonitorJobComplete, Cleanup);
        table.insert(MonitorJob, MonitorJobFailed, Cleanup);
        table.insert(MonitorJob, JobTimedOut, Cleanup);

        table.insert(Cleanup, CleanupComplete, Done);

        for state in State::ALL {
            if state.observes_cancellation() {
                table.insert(state, JobCancelled, Cleanup);
            }
            if !state.is_terminal() {
                table.insert(state, FatalAbort, Aborted);
            }
        }

        table
    }
}

// ---------------------------------------------------------------------------
// CompositionDefect
// ---------------------------------------------------------------------------

/// A mistake in the wiring of actions and transitions, reported by
/// composition-time validation before any run starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompositionDefect {
    #[error("state {state} has no action registered")]
    MissingAction { state: State },
    #[error("action registered for {state} reports bound state {bound}")]
    MisboundAction { state: State, bound: State },
    #[error("no transition mapped for ({state}, {event})")]
    UnmappedEvent { state: State, event: Event },
    #[error("transition ({state}, {event}) targets {target}, which has no action")]
    UnreachableTarget {
        state: State,
        event: Event,
        target: State,
    },
    #[error("transition ({state}, {event}) leaves terminal state {state}")]
    TransitionFromTerminal { state: State, event: Event },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
