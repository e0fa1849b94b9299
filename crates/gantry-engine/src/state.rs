use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// One step of the job lifecycle. Exactly one state is current at any time;
/// the driver owns that value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Initialize,
    ResolveJobSpecification,
    SetupJob,
    LaunchJob,
    MonitorJob,
    Cleanup,
    /// Lifecycle ran to completion, whatever the job outcome.
    Done,
    /// Internal-defect backstop; cleanup may not have run.
    Aborted,
}

impl State {
    pub const ALL: [State; 8] = [
        State::Initialize,
        State::ResolveJobSpecification,
        State::SetupJob,
        State::LaunchJob,
        State::MonitorJob,
        State::Cleanup,
        State::Done,
        State::Aborted,
    ];

    /// Terminal states end the driver loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Done | State::Aborted)
    }

    /// States where the driver observes external cancellation before
    /// dispatching the action. Cleanup always runs to completion.
    pub fn observes_cancellation(&self) -> bool {
        !matches!(self, State::Cleanup | State::Done | State::Aborted)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            State::Initialize => "INITIALIZE",
            State::ResolveJobSpecification => "RESOLVE_JOB_SPECIFICATION",
            State::SetupJob => "SETUP_JOB",
            State::LaunchJob => "LAUNCH_JOB",
            State::MonitorJob => "MONITOR_JOB",
            State::Cleanup => "CLEANUP",
            State::Done => "DONE",
            State::Aborted => "ABORTED",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Outcome signal an action returns to the driver. Events are the only
/// channel through which an action communicates lifecycle intent; an action
/// never assigns the current state itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    InitializeComplete,
    InitializeFailed,
    ResolveJobSpecificationComplete,
    ResolveJobSpecificationFailed,
    SetupJobComplete,
    SetupJobFailedRetryable,
    SetupJobFailedFatal,
    LaunchJobComplete,
    LaunchJobFailed,
    MonitorJobComplete,
    MonitorJobFailed,
    CleanupComplete,
    /// External cancellation observed; routes to cleanup.
    JobCancelled,
    /// A resolution or execution deadline expired; routes like cancellation.
    JobTimedOut,
    /// Synthesized by the driver on panics and unmapped transitions.
    FatalAbort,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Event::InitializeComplete => "INITIALIZE_COMPLETE",
            Event::InitializeFailed => "INITIALIZE_FAILED",
            Event::ResolveJobSpecificationComplete => "RESOLVE_JOB_SPECIFICATION_COMPLETE",
            Event::ResolveJobSpecificationFailed => "RESOLVE_JOB_SPECIFICATION_FAILED",
            Event::SetupJobComplete => "SETUP_JOB_COMPLETE",
            Event::SetupJobFailedRetryable => "SETUP_JOB_FAILED_RETRYABLE",
            Event::SetupJobFailedFatal => "SETUP_JOB_FAILED_FATAL",
            Event::LaunchJobComplete => "LAUNCH_JOB_COMPLETE",
            Event::LaunchJobFailed => "LAUNCH_JOB_FAILED",
            Event::MonitorJobComplete => "MONITOR_JOB_COMPLETE",
            Event::MonitorJobFailed => "MONITOR_JOB_FAILED",
            Event::CleanupComplete => "CLEANUP_COMPLETE",
            Event::JobCancelled => "JOB_CANCELLED",
            Event::JobTimedOut => "JOB_TIMED_OUT",
            Event::FatalAbort => "FATAL_ABORT",
        };
        write!(f, "{}", label)
    }
}
