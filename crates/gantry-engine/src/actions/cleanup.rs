use crate::action::Action;
use crate::context::{ExecutionContext, StateFailure};
use crate::services::CleanupHook;
use crate::state::{Event, State};
use std::sync::Arc;
use tracing::{debug, info};

/// Releases the run's runtime handles exactly once through the cleanup hook.
/// Every lifecycle path funnels through here, so the action is re-entrant:
/// a second visit finds the handles already released and does nothing.
pub struct CleanupAction {
    hook: Arc<dyn CleanupHook>,
}

impl CleanupAction {
    pub fn new(hook: Arc<dyn CleanupHook>) -> Self {
        Self { hook }
    }
}

#[async_trait::async_trait]
impl Action for CleanupAction {
    fn state(&self) -> State {
        State::Cleanup
    }

    fn legal_events(&self) -> &'static [Event] {
        &[Event::CleanupComplete]
    }

    // The hook never fails by contract; a failure surfacing here is an
    // internal defect, not a lifecycle outcome.
    fn failure_event(&self) -> Event {
        Event::FatalAbort
    }

    async fn perform(&self, ctx: &mut ExecutionContext) -> Result<Event, StateFailure> {
        let handles = ctx.runtime_handles_mut();
        if handles.released() {
            debug!("runtime handles already released, nothing to clean up");
            return Ok(Event::CleanupComplete);
        }

        self.hook.release(handles).await;
        handles.mark_released();
        info!(
            job_dir = ?handles.job_dir().map(|p| p.display().to_string()),
            "runtime handles released"
        );
        Ok(Event::CleanupComplete)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
