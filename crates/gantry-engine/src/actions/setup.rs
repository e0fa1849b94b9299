use super::RetryPolicy;
use crate::action::Action;
use crate::cancel::CancelSignal;
use crate::context::{ExecutionContext, StateFailure};
use crate::services::{FetchFailure, ResourceFetcher};
use crate::state::{Event, State};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prepares the per-job working directory and stages every dependency the
/// specification names. Owns the retry policy: a transient fetch failure
/// with attempts remaining loops the machine back here, and the next pass
/// sleeps its backoff delay before re-staging.
pub struct SetupJobAction {
    fetcher: Arc<dyn ResourceFetcher>,
    workspace_root: PathBuf,
    retry: RetryPolicy,
    cancel: CancelSignal,
}

impl SetupJobAction {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        workspace_root: PathBuf,
        retry: RetryPolicy,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            fetcher,
            workspace_root,
            retry,
            cancel,
        }
    }
}

#[async_trait::async_trait]
impl Action for SetupJobAction {
    fn state(&self) -> State {
        State::SetupJob
    }

    fn legal_events(&self) -> &'static [Event] {
        &[
            Event::SetupJobComplete,
            Event::SetupJobFailedRetryable,
            Event::SetupJobFailedFatal,
            Event::JobCancelled,
        ]
    }

    fn failure_event(&self) -> Event {
        Event::SetupJobFailedFatal
    }

    async fn perform(&self, ctx: &mut ExecutionContext) -> Result<Event, StateFailure> {
        let attempt = ctx.begin_setup_attempt();
        if attempt > 1 {
            let delay = self.retry.delay_for_attempt(attempt - 1);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before setup retry");
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    ctx.mark_cancelled();
                    return Ok(Event::JobCancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let job_id = ctx
            .job_id()
            .ok_or_else(|| StateFailure::new(State::SetupJob, "no job request on the context"))?;
        let dependencies: Vec<String> = ctx
            .job_specification()
            .ok_or_else(|| {
                StateFailure::new(State::SetupJob, "no job specification on the context")
            })?
            .dependencies
            .clone();

        let job_dir = self.workspace_root.join(job_id.to_string());
        let deps_dir = job_dir.join("dependencies");
        for dir in [&job_dir.join("logs"), &deps_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                StateFailure::with_source(
                    State::SetupJob,
                    format!("failed to create job directory {}", dir.display()),
                    e,
                )
            })?;
        }

        for (index, uri) in dependencies.iter().enumerate() {
            let dest = deps_dir.join(dependency_file_name(uri, index));
            let staged = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(job_id = %job_id, uri = %uri, "cancelled while staging dependencies");
                    ctx.mark_cancelled();
                    return Ok(Event::JobCancelled);
                }
                staged = self.fetcher.fetch(uri, &dest) => staged,
            };
            match staged {
                Ok(()) => debug!(uri = %uri, dest = %dest.display(), "dependency staged"),
                Err(failure) if should_retry(&failure, attempt, self.retry.max_attempts) => {
                    warn!(
                        job_id = %job_id,
                        uri = %uri,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        cause = %failure,
                        "transient fetch failure, retrying setup"
                    );
                    return Ok(Event::SetupJobFailedRetryable);
                }
                Err(failure) => {
                    return Err(StateFailure::with_source(
                        State::SetupJob,
                        format!("failed to stage dependency {uri}"),
                        failure,
                    ));
                }
            }
        }

        ctx.runtime_handles_mut().set_job_dir(job_dir.clone());
        info!(
            job_id = %job_id,
            job_dir = %job_dir.display(),
            dependencies = dependencies.len(),
            attempt,
            "job directory ready"
        );
        Ok(Event::SetupJobComplete)
    }
}

/// A transient failure earns another pass while the attempt budget lasts.
fn should_retry(failure: &FetchFailure, attempt: u32, max_attempts: u32) -> bool {
    failure.is_transient() && attempt < max_attempts
}

/// File name for a staged dependency: the URI's last path segment, with a
/// positional fallback when that segment is empty or only a query string.
fn dependency_file_name(uri: &str, index: usize) -> String {
    let last = uri
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .split(['?', '#'])
        .next()
        .unwrap_or("");
    if last.is_empty() {
        format!("dep-{index}")
    } else {
        last.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
