use gantry_core::types::JobExit;
use gantry_engine::cancel::CancelSignal;
use gantry_engine::services::{JobHandle, JobMonitor, MonitorFailure, MonitorOutcome};
use std::time::Duration;
use tracing::debug;

/// Supervises the running job process: a plain wait on the handle, raced
/// against cancellation and the optional deadline. The monitor only
/// observes; killing an interrupted process is the caller's decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMonitor;

impl ProcessMonitor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl JobMonitor for ProcessMonitor {
    async fn await_completion(
        &self,
        handle: &mut dyn JobHandle,
        deadline: Option<Duration>,
        cancel: &CancelSignal,
    ) -> MonitorOutcome {
        let mut wait = handle.wait();
        match deadline {
            Some(limit) => tokio::select! {
                result = &mut wait => finish(result),
                _ = cancel.cancelled() => {
                    debug!("cancellation observed while supervising the job process");
                    MonitorOutcome::Cancelled
                }
                _ = tokio::time::sleep(limit) => {
                    debug!(deadline = ?limit, "job process exceeded its deadline");
                    MonitorOutcome::DeadlineExceeded
                }
            },
            None => tokio::select! {
                result = &mut wait => finish(result),
                _ = cancel.cancelled() => {
                    debug!("cancellation observed while supervising the job process");
                    MonitorOutcome::Cancelled
                }
            },
        }
    }
}

fn finish(result: Result<JobExit, MonitorFailure>) -> MonitorOutcome {
    match result {
        Ok(exit) => MonitorOutcome::Exited(exit),
        Err(failure) => MonitorOutcome::Failed(failure),
    }
}
