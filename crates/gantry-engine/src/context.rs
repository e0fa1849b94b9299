use crate::services::JobHandle;
use crate::state::{Event, State};
use chrono::{DateTime, Utc};
use gantry_core::types::{JobExit, JobRequest, JobRequestInputs, JobSpecification, TerminalStatus};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// StateFailure
// ---------------------------------------------------------------------------

/// A failure wrapped at the action boundary: the originating state, a
/// human-readable message, and the collaborator cause when there is one.
/// Raw collaborator errors never travel past an action in any other form.
#[derive(Debug, thiserror::Error)]
#[error("{state}: {message}")]
pub struct StateFailure {
    pub state: State,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StateFailure {
    pub fn new(state: State, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        state: State,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            state,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Render the full cause chain, outermost first.
    pub fn chain(&self) -> String {
        let mut rendered = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            rendered.push_str(": ");
            rendered.push_str(&err.to_string());
            cause = err.source();
        }
        rendered
    }
}

// ---------------------------------------------------------------------------
// TransitionRecord
// ---------------------------------------------------------------------------

/// One applied transition, kept in order on the context so a finished run
/// can be reconstructed from its history alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: State,
    pub event: Event,
    pub to: State,
    pub at: DateTime<Utc>,
}

impl TransitionRecord {
    pub fn new(from: State, event: Event, to: State) -> Self {
        Self {
            from,
            event,
            to,
            at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// RuntimeHandles
// ---------------------------------------------------------------------------

/// Process and filesystem handles created during setup/launch. Owned by the
/// context until cleanup releases them, exactly once.
#[derive(Default)]
pub struct RuntimeHandles {
    job_dir: Option<PathBuf>,
    process: Option<Box<dyn JobHandle>>,
    released: bool,
}

impl RuntimeHandles {
    pub fn job_dir(&self) -> Option<&Path> {
        self.job_dir.as_deref()
    }

    pub fn set_job_dir(&mut self, dir: PathBuf) {
        self.job_dir = Some(dir);
    }

    pub fn has_process(&self) -> bool {
        self.process.is_some()
    }

    pub fn attach_process(&mut self, handle: Box<dyn JobHandle>) {
        self.process = Some(handle);
    }

    pub fn process_mut(&mut self) -> Option<&mut Box<dyn JobHandle>> {
        self.process.as_mut()
    }

    pub fn released(&self) -> bool {
        self.released
    }

    /// Drop the process handle and mark the handles released. Returns `false`
    /// when release already happened (the caller should skip its work).
    pub fn mark_released(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.process = None;
        self.released = true;
        true
    }
}

impl std::fmt::Debug for RuntimeHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandles")
            .field("job_dir", &self.job_dir)
            .field("process", &self.process.is_some())
            .field("released", &self.released)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ContextError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// A second write to a write-once field. Always a sequencing defect in
    /// an action, never a user error.
    #[error("{field} is already set; each run writes it exactly once")]
    AlreadySet { field: &'static str },
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Run-scoped state shared by all actions of one job run.
///
/// The driver owns the context exclusively for the run's duration and hands
/// it to one action at a time, so there is no interior locking. Fields
/// follow a strict ownership rule: only the action for the state that
/// produces a field may write it, and the write-once fields reject a second
/// write with [`ContextError::AlreadySet`].
pub struct ExecutionContext {
    inputs: JobRequestInputs,
    job_request: Option<JobRequest>,
    job_specification: Option<JobSpecification>,
    runtime_handles: RuntimeHandles,
    process_outcome: Option<JobExit>,
    failure: Option<StateFailure>,
    terminal_status: Option<TerminalStatus>,
    cancelled: bool,
    timed_out: bool,
    setup_attempts: u32,
    history: Vec<TransitionRecord>,
    started_at: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(inputs: JobRequestInputs) -> Self {
        Self {
            inputs,
            job_request: None,
            job_specification: None,
            runtime_handles: RuntimeHandles::default(),
            process_outcome: None,
            failure: None,
            terminal_status: None,
            cancelled: false,
            timed_out: false,
            setup_attempts: 0,
            history: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn inputs(&self) -> &JobRequestInputs {
        &self.inputs
    }

    pub fn job_name(&self) -> &str {
        &self.inputs.job_name
    }

    /// Job id, known once the request has been built.
    pub fn job_id(&self) -> Option<Uuid> {
        self.job_request.as_ref().map(|r| r.id)
    }

    pub fn job_request(&self) -> Option<&JobRequest> {
        self.job_request.as_ref()
    }

    pub fn set_job_request(&mut self, request: JobRequest) -> Result<(), ContextError> {
        if self.job_request.is_some() {
            return Err(ContextError::AlreadySet {
                field: "job_request",
            });
        }
        self.job_request = Some(request);
        Ok(())
    }

    pub fn job_specification(&self) -> Option<&JobSpecification> {
        self.job_specification.as_ref()
    }

    pub fn set_job_specification(&mut self, spec: JobSpecification) -> Result<(), ContextError> {
        if self.job_specification.is_some() {
            return Err(ContextError::AlreadySet {
                field: "job_specification",
            });
        }
        self.job_specification = Some(spec);
        Ok(())
    }

    pub fn runtime_handles(&self) -> &RuntimeHandles {
        &self.runtime_handles
    }

    pub fn runtime_handles_mut(&mut self) -> &mut RuntimeHandles {
        &mut self.runtime_handles
    }

    pub fn process_outcome(&self) -> Option<JobExit> {
        self.process_outcome
    }

    pub fn set_process_outcome(&mut self, exit: JobExit) -> Result<(), ContextError> {
        if self.process_outcome.is_some() {
            return Err(ContextError::AlreadySet {
                field: "process_outcome",
            });
        }
        self.process_outcome = Some(exit);
        Ok(())
    }

    pub fn failure(&self) -> Option<&StateFailure> {
        self.failure.as_ref()
    }

    /// Record a wrapped failure. The first one wins — it is the root cause
    /// the run terminates with; later failures are logged and dropped.
    pub fn record_failure(&mut self, failure: StateFailure) {
        match &self.failure {
            None => {
                debug!(state = %failure.state, cause = %failure.chain(), "failure recorded");
                self.failure = Some(failure);
            }
            Some(first) => {
                warn!(
                    state = %failure.state,
                    cause = %failure.chain(),
                    root = %first.message,
                    "additional failure after root cause; keeping the first"
                );
            }
        }
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn mark_cancelled(&mut self) {
        if !self.cancelled {
            debug!("run marked cancelled");
            self.cancelled = true;
        }
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn mark_timed_out(&mut self) {
        if !self.timed_out {
            debug!("run marked timed out");
            self.timed_out = true;
        }
    }

    pub fn setup_attempts(&self) -> u32 {
        self.setup_attempts
    }

    /// Bump and return the 1-based setup attempt counter.
    pub fn begin_setup_attempt(&mut self) -> u32 {
        self.setup_attempts += 1;
        self.setup_attempts
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    pub fn record_transition(&mut self, record: TransitionRecord) {
        self.history.push(record);
    }

    pub fn terminal_status(&self) -> Option<TerminalStatus> {
        self.terminal_status
    }

    pub fn set_terminal_status(&mut self, status: TerminalStatus) -> Result<(), ContextError> {
        if self.terminal_status.is_some() {
            return Err(ContextError::AlreadySet {
                field: "terminal_status",
            });
        }
        self.terminal_status = Some(status);
        Ok(())
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Snapshot the run for reporting. A report taken before terminal entry
    /// classifies as aborted.
    pub fn report(&self) -> RunReport {
        let finished_at = Utc::now();
        RunReport {
            job_id: self.job_id(),
            job_name: self.inputs.job_name.clone(),
            status: self.terminal_status.unwrap_or(TerminalStatus::Aborted),
            exit: self.process_outcome,
            failure: self.failure.as_ref().map(StateFailure::chain),
            cancelled: self.cancelled,
            timed_out: self.timed_out,
            setup_attempts: self.setup_attempts,
            transitions: self.history.clone(),
            started_at: self.started_at,
            finished_at,
            duration_ms: (finished_at - self.started_at).num_milliseconds(),
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("job_name", &self.inputs.job_name)
            .field("job_request", &self.job_request.is_some())
            .field("job_specification", &self.job_specification.is_some())
            .field("runtime_handles", &self.runtime_handles)
            .field("process_outcome", &self.process_outcome)
            .field("terminal_status", &self.terminal_status)
            .field("cancelled", &self.cancelled)
            .field("timed_out", &self.timed_out)
            .field("setup_attempts", &self.setup_attempts)
            .field("transitions", &self.history.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

/// Final, serializable account of one run: what happened, why it stopped,
/// and the full transition sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub job_id: Option<Uuid>,
    pub job_name: String,
    pub status: TerminalStatus,
    pub exit: Option<JobExit>,
    pub failure: Option<String>,
    pub cancelled: bool,
    pub timed_out: bool,
    pub setup_attempts: u32,
    pub transitions: Vec<TransitionRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
