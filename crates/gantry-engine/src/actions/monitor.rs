use crate::action::Action;
use crate::cancel::CancelSignal;
use crate::context::{ExecutionContext, StateFailure};
use crate::services::{JobMonitor, MonitorOutcome};
use crate::state::{Event, State};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Waits for the launched process to finish, bounded by the job deadline and
/// raceable against cancellation. The specification's timeout wins over the
/// configured default. On cancellation or deadline expiry the action kills
/// the process before handing the machine to cleanup.
pub struct MonitorJobAction {
    monitor: Arc<dyn JobMonitor>,
    cancel: CancelSignal,
    default_timeout: Option<Duration>,
}

impl MonitorJobAction {
    pub fn new(
        monitor: Arc<dyn JobMonitor>,
        cancel: CancelSignal,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            monitor,
            cancel,
            default_timeout,
        }
    }
}

#[async_trait::async_trait]
impl Action for MonitorJobAction {
    fn state(&self) -> State {
        State::MonitorJob
    }

    fn legal_events(&self) -> &'static [Event] {
        &[
            Event::MonitorJobComplete,
            Event::MonitorJobFailed,
            Event::JobCancelled,
            Event::JobTimedOut,
        ]
    }

    fn failure_event(&self) -> Event {
        Event::MonitorJobFailed
    }

    async fn perform(&self, ctx: &mut ExecutionContext) -> Result<Event, StateFailure> {
        let deadline = ctx
            .job_specification()
            .and_then(|s| s.timeout_secs)
            .map(Duration::from_secs)
            .or(self.default_timeout);
        let job_id = ctx.job_id();

        let outcome = {
            let handles = ctx.runtime_handles_mut();
            let process = handles.process_mut().ok_or_else(|| {
                StateFailure::new(State::MonitorJob, "no job process on the context")
            })?;
            let outcome = self
                .monitor
                .await_completion(process.as_mut(), deadline, &self.cancel)
                .await;
            // A cancelled or overdue job must not outlive the run.
            if matches!(
                outcome,
                MonitorOutcome::Cancelled | MonitorOutcome::DeadlineExceeded
            ) {
                process.kill().await;
            }
            outcome
        };

        match outcome {
            MonitorOutcome::Exited(exit) => {
                info!(job_id = ?job_id, exit = %exit, "job process finished");
                ctx.set_process_outcome(exit).map_err(|e| {
                    StateFailure::with_source(
                        State::MonitorJob,
                        "process outcome written twice",
                        e,
                    )
                })?;
                Ok(Event::MonitorJobComplete)
            }
            MonitorOutcome::Failed(failure) => Err(StateFailure::with_source(
                State::MonitorJob,
                "failed waiting on the job process",
                failure,
            )),
            MonitorOutcome::Cancelled => {
                info!(job_id = ?job_id, "job cancelled while running, process killed");
                ctx.mark_cancelled();
                Ok(Event::JobCancelled)
            }
            MonitorOutcome::DeadlineExceeded => {
                warn!(
                    job_id = ?job_id,
                    deadline = ?deadline,
                    "job exceeded its deadline, process killed"
                );
                ctx.mark_timed_out();
                Ok(Event::JobTimedOut)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{JobHandle, MonitorFailure};
    use chrono::Utc;
    use gantry_core::types::{
        JobExit, JobRequest, JobRequestInputs, JobSpecification, ResolvedResource,
        ResourceCriteria,
    };
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Debug)]
    struct StubHandle {
        killed: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl JobHandle for StubHandle {
        fn pid(&self) -> Option<u32> {
            Some(7)
        }

        async fn wait(&mut self) -> Result<JobExit, MonitorFailure> {
            Ok(JobExit::from_code(0))
        }

        async fn kill(&mut self) {
            self.killed.store(true, Ordering::SeqCst);
        }
    }

    enum Script {
        Exit(i32),
        Fail,
        Cancelled,
        Deadline,
    }

    struct ScriptedMonitor {
        script: Script,
        seen_deadline: Mutex<Option<Option<Duration>>>,
    }

    impl ScriptedMonitor {
        fn new(script: Script) -> Self {
            Self {
                script,
                seen_deadline: Mutex::new(None),
            }
        }
    }

    #[async_trait::async_trait]
    impl JobMonitor for ScriptedMonitor {
        async fn await_completion(
            &self,
            _handle: &mut dyn JobHandle,
            deadline: Option<Duration>,
            _cancel: &CancelSignal,
        ) -> MonitorOutcome {
            *self.seen_deadline.lock().expect("deadline lock") = Some(deadline);
            match self.script {
                Script::Exit(code) => MonitorOutcome::Exited(JobExit::from_code(code)),
                Script::Fail => MonitorOutcome::Failed(MonitorFailure::Wait(
                    std::io::Error::new(std::io::ErrorKind::Other, "waitpid interrupted"),
                )),
                Script::Cancelled => MonitorOutcome::Cancelled,
                Script::Deadline => MonitorOutcome::DeadlineExceeded,
            }
        }
    }

    fn running_context(spec_timeout: Option<u64>) -> (ExecutionContext, Arc<AtomicBool>) {
        let mut ctx = ExecutionContext::new(JobRequestInputs::new("monitor-job"));
        let id = Uuid::new_v4();
        ctx.set_job_request(JobRequest {
            id,
            name: "monitor-job".into(),
            criteria: ResourceCriteria::default(),
            command_args: vec![],
            env: BTreeMap::new(),
            timeout_secs: None,
            metadata: None,
            requested_at: Utc::now(),
        })
        .expect("request");
        ctx.set_job_specification(JobSpecification {
            job_id: id,
            cluster: ResolvedResource {
                id: "c1".into(),
                name: "cluster".into(),
            },
            command: ResolvedResource {
                id: "k1".into(),
                name: "command".into(),
            },
            executable: vec!["/bin/sleep".into(), "60".into()],
            environment: BTreeMap::new(),
            dependencies: vec![],
            timeout_secs: spec_timeout,
        })
        .expect("specification");
        let killed = Arc::new(AtomicBool::new(false));
        ctx.runtime_handles_mut().attach_process(Box::new(StubHandle {
            killed: Arc::clone(&killed),
        }));
        (ctx, killed)
    }

    #[tokio::test]
    async fn process_exit_records_the_outcome() {
        let monitor = Arc::new(ScriptedMonitor::new(Script::Exit(0)));
        let action = MonitorJobAction::new(monitor, CancelSignal::new(), None);
        let (mut ctx, killed) = running_context(None);

        let event = action.perform(&mut ctx).await.expect("monitor");
        assert_eq!(event, Event::MonitorJobComplete);
        assert_eq!(ctx.process_outcome(), Some(JobExit::from_code(0)));
        assert!(!killed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let monitor = Arc::new(ScriptedMonitor::new(Script::Cancelled));
        let action = MonitorJobAction::new(monitor, CancelSignal::new(), None);
        let (mut ctx, killed) = running_context(None);

        let event = action.perform(&mut ctx).await.expect("monitor");
        assert_eq!(event, Event::JobCancelled);
        assert!(ctx.cancelled());
        assert!(killed.load(Ordering::SeqCst));
        assert!(ctx.process_outcome().is_none());
    }

    #[tokio::test]
    async fn deadline_expiry_kills_the_process_and_times_out() {
        let monitor = Arc::new(ScriptedMonitor::new(Script::Deadline));
        let action = MonitorJobAction::new(
            monitor,
            CancelSignal::new(),
            Some(Duration::from_secs(600)),
        );
        let (mut ctx, killed) = running_context(None);

        let event = action.perform(&mut ctx).await.expect("monitor");
        assert_eq!(event, Event::JobTimedOut);
        assert!(ctx.timed_out());
        assert!(killed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn wait_failure_maps_to_the_failure_event() {
        let monitor = Arc::new(ScriptedMonitor::new(Script::Fail));
        let action = MonitorJobAction::new(monitor, CancelSignal::new(), None);
        let (mut ctx, _killed) = running_context(None);

        let event = action.execute(&mut ctx).await;
        assert_eq!(event, Event::MonitorJobFailed);
        let failure = ctx.failure().expect("failure recorded");
        assert!(failure.chain().contains("waitpid interrupted"));
    }

    #[tokio::test]
    async fn specification_timeout_wins_over_the_default() {
        let monitor = Arc::new(ScriptedMonitor::new(Script::Exit(0)));
        let action = MonitorJobAction::new(
            Arc::clone(&monitor) as Arc<dyn JobMonitor>,
            CancelSignal::new(),
            Some(Duration::from_secs(600)),
        );
        let (mut ctx, _killed) = running_context(Some(7));

        action.perform(&mut ctx).await.expect("monitor");
        let seen = monitor
            .seen_deadline
            .lock()
            .expect("deadline lock")
            .expect("monitor called");
        assert_eq!(seen, Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn default_timeout_applies_when_the_specification_has_none() {
        let monitor = Arc::new(ScriptedMonitor::new(Script::Exit(0)));
        let action = MonitorJobAction::new(
            Arc::clone(&monitor) as Arc<dyn JobMonitor>,
            CancelSignal::new(),
            Some(Duration::from_secs(600)),
        );
        let (mut ctx, _killed) = running_context(None);

        action.perform(&mut ctx).await.expect("monitor");
        let seen = monitor
            .seen_deadline
            .lock()
            .expect("deadline lock")
            .expect("monitor called");
        assert_eq!(seen, Some(Duration::from_secs(600)));
    }
}
