use crate::action::Action;
use crate::context::{ExecutionContext, StateFailure};
use crate::state::{Event, State};
use std::path::PathBuf;
use tracing::info;

/// Prepares the workspace root every job directory lives under.
pub struct InitializeAction {
    workspace_root: PathBuf,
}

impl InitializeAction {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait::async_trait]
impl Action for InitializeAction {
    fn state(&self) -> State {
        State::Initialize
    }

    fn legal_events(&self) -> &'static [Event] {
        &[Event::InitializeComplete, Event::InitializeFailed]
    }

    fn failure_event(&self) -> Event {
        Event::InitializeFailed
    }

    async fn perform(&self, ctx: &mut ExecutionContext) -> Result<Event, StateFailure> {
        tokio::fs::create_dir_all(&self.workspace_root)
            .await
            .map_err(|e| {
                StateFailure::with_source(
                    State::Initialize,
                    format!(
                        "failed to prepare workspace root {}",
                        self.workspace_root.display()
                    ),
                    e,
                )
            })?;
        info!(
            job = %ctx.job_name(),
            root = %self.workspace_root.display(),
            "workspace root ready"
        );
        Ok(Event::InitializeComplete)
    }
}
