use gantry_engine::context::RuntimeHandles;
use gantry_engine::services::CleanupHook;
use tracing::{debug, warn};

/// End-of-run release of runtime handles: kill and reap any live process,
/// then drop the job directory unless the agent keeps workspaces.
/// Best-effort by contract; problems are logged, never returned.
pub struct WorkspaceCleanup {
    remove_job_dir: bool,
}

impl WorkspaceCleanup {
    pub fn new(remove_job_dir: bool) -> Self {
        Self { remove_job_dir }
    }
}

#[async_trait::async_trait]
impl CleanupHook for WorkspaceCleanup {
    async fn release(&self, handles: &mut RuntimeHandles) {
        if let Some(process) = handles.process_mut() {
            process.kill().await;
        }

        if self.remove_job_dir {
            if let Some(dir) = handles.job_dir() {
                match tokio::fs::remove_dir_all(dir).await {
                    Ok(()) => debug!(job_dir = %dir.display(), "job directory removed"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(job_dir = %dir.display(), error = %e, "failed to remove job directory")
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
