use crate::action::Action;
use crate::context::{ExecutionContext, StateFailure};
use crate::services::JobLauncher;
use crate::state::{Event, State};
use std::sync::Arc;
use tracing::info;

/// Starts the job process described by the specification, rooted in the job
/// directory, and parks the handle on the context for the monitor.
pub struct LaunchJobAction {
    launcher: Arc<dyn JobLauncher>,
}

impl LaunchJobAction {
    pub fn new(launcher: Arc<dyn JobLauncher>) -> Self {
        Self { launcher }
    }
}

#[async_trait::async_trait]
impl Action for LaunchJobAction {
    fn state(&self) -> State {
        State::LaunchJob
    }

    fn legal_events(&self) -> &'static [Event] {
        &[Event::LaunchJobComplete, Event::LaunchJobFailed]
    }

    fn failure_event(&self) -> Event {
        Event::LaunchJobFailed
    }

    async fn perform(&self, ctx: &mut ExecutionContext) -> Result<Event, StateFailure> {
        let job_id = ctx
            .job_id()
            .ok_or_else(|| StateFailure::new(State::LaunchJob, "no job request on the context"))?;
        let spec = ctx
            .job_specification()
            .ok_or_else(|| {
                StateFailure::new(State::LaunchJob, "no job specification on the context")
            })?
            .clone();
        let job_dir = ctx
            .runtime_handles()
            .job_dir()
            .ok_or_else(|| {
                StateFailure::new(State::LaunchJob, "no job directory on the context")
            })?
            .to_path_buf();

        let handle = self.launcher.launch(&spec, &job_dir).await.map_err(|e| {
            StateFailure::with_source(
                State::LaunchJob,
                format!("failed to launch {}", spec.program().unwrap_or("<empty>")),
                e,
            )
        })?;

        info!(
            job_id = %job_id,
            pid = ?handle.pid(),
            program = spec.program().unwrap_or("<empty>"),
            args = spec.executable.len().saturating_sub(1),
            "job process launched"
        );
        ctx.runtime_handles_mut().attach_process(handle);
        Ok(Event::LaunchJobComplete)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
