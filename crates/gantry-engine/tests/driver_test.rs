use chrono::Utc;
use gantry_core::types::{
    JobExit, JobRequest, JobRequestInputs, JobSpecification, ResolvedResource, ResourceCriteria,
    TerminalStatus,
};
use gantry_engine::action::{Action, ActionRegistry};
use gantry_engine::actions::{standard_registry, Collaborators, ExecutionPolicy, RetryPolicy};
use gantry_engine::cancel::CancelSignal;
use gantry_engine::context::{ExecutionContext, RuntimeHandles, StateFailure};
use gantry_engine::driver::StateMachineDriver;
use gantry_engine::services::{
    CleanupHook, ConversionFailure, FetchFailure, JobHandle, JobLauncher, JobMonitor,
    MonitorFailure, MonitorOutcome, RequestBuilder, ResolutionFailure, ResourceFetcher,
    SpecificationResolver,
};
use gantry_engine::state::{Event, State};
use gantry_engine::transitions::TransitionTable;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    resolve_calls: AtomicU32,
    fetch_calls: AtomicU32,
    launch_calls: AtomicU32,
    release_calls: AtomicU32,
    kills: AtomicU32,
}

struct MockBuilder;

impl RequestBuilder for MockBuilder {
    fn build(&self, inputs: &JobRequestInputs) -> Result<JobRequest, ConversionFailure> {
        if inputs.job_name.trim().is_empty() {
            return Err(ConversionFailure::MissingField("job_name"));
        }
        Ok(JobRequest {
            id: Uuid::new_v4(),
            name: inputs.job_name.clone(),
            criteria: ResourceCriteria {
                cluster_tags: inputs.cluster_tags.clone(),
                command_tags: inputs.command_tags.clone(),
            },
            command_args: inputs.command_args.clone(),
            env: inputs.env.clone(),
            timeout_secs: inputs.timeout_secs,
            metadata: None,
            requested_at: Utc::now(),
        })
    }
}

struct MockResolver {
    counters: Arc<Counters>,
    dependencies: Vec<String>,
    no_match: bool,
}

#[async_trait::async_trait]
impl SpecificationResolver for MockResolver {
    async fn resolve(&self, request: &JobRequest) -> Result<JobSpecification, ResolutionFailure> {
        self.counters.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if self.no_match {
            return Err(ResolutionFailure::NoMatchingResources(
                "no registered cluster carries the requested tags".into(),
            ));
        }
        Ok(JobSpecification {
            job_id: request.id,
            cluster: ResolvedResource {
                id: "c-main".into(),
                name: "main".into(),
            },
            command: ResolvedResource {
                id: "k-echo".into(),
                name: "echo".into(),
            },
            executable: vec!["/bin/echo".into(), "ok".into()],
            environment: BTreeMap::new(),
            dependencies: self.dependencies.clone(),
            timeout_secs: None,
        })
    }
}

struct MockFetcher {
    counters: Arc<Counters>,
    transient_failures: u32,
}

#[async_trait::async_trait]
impl ResourceFetcher for MockFetcher {
    async fn fetch(&self, uri: &str, dest: &Path) -> Result<(), FetchFailure> {
        let call = self.counters.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.transient_failures {
            return Err(FetchFailure::Transient {
                uri: uri.to_string(),
                reason: "503 service unavailable".into(),
            });
        }
        tokio::fs::write(dest, b"artifact").await?;
        Ok(())
    }
}

#[derive(Debug)]
struct MockHandle {
    counters: Arc<Counters>,
    exit: JobExit,
}

#[async_trait::async_trait]
impl JobHandle for MockHandle {
    fn pid(&self) -> Option<u32> {
        Some(1234)
    }

    async fn wait(&mut self) -> Result<JobExit, MonitorFailure> {
        Ok(self.exit)
    }

    async fn kill(&mut self) {
        self.counters.kills.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockLauncher {
    counters: Arc<Counters>,
    exit_code: i32,
}

#[async_trait::async_trait]
impl JobLauncher for MockLauncher {
    async fn launch(
        &self,
        _spec: &JobSpecification,
        _job_dir: &Path,
    ) -> Result<Box<dyn JobHandle>, gantry_engine::services::LaunchFailure> {
        self.counters.launch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockHandle {
            counters: Arc::clone(&self.counters),
            exit: JobExit::from_code(self.exit_code),
        }))
    }
}

/// `Finish` reports the handle's exit immediately; `Block` parks until
/// cancellation or the deadline, the way a real wait on a long process
/// behaves.
enum MonitorScript {
    Finish,
    Block,
}

struct MockMonitor {
    script: MonitorScript,
}

#[async_trait::async_trait]
impl JobMonitor for MockMonitor {
    async fn await_completion(
        &self,
        handle: &mut dyn JobHandle,
        deadline: Option<Duration>,
        cancel: &CancelSignal,
    ) -> MonitorOutcome {
        match self.script {
            MonitorScript::Finish => match handle.wait().await {
                Ok(exit) => MonitorOutcome::Exited(exit),
                Err(failure) => MonitorOutcome::Failed(failure),
            },
            MonitorScript::Block => tokio::select! {
                _ = cancel.cancelled() => MonitorOutcome::Cancelled,
                _ = tokio::time::sleep(deadline.unwrap_or(Duration::from_secs(3600))) => {
                    MonitorOutcome::DeadlineExceeded
                }
            },
        }
    }
}

struct MockCleanup {
    counters: Arc<Counters>,
}

#[async_trait::async_trait]
impl CleanupHook for MockCleanup {
    async fn release(&self, handles: &mut RuntimeHandles) {
        self.counters.release_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(process) = handles.process_mut() {
            process.kill().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Rig assembly
// ---------------------------------------------------------------------------

struct RigOptions {
    dependencies: Vec<String>,
    no_match: bool,
    transient_failures: u32,
    exit_code: i32,
    block_monitor: bool,
    job_timeout: Option<Duration>,
    max_attempts: u32,
}

impl Default for RigOptions {
    fn default() -> Self {
        Self {
            dependencies: vec![],
            no_match: false,
            transient_failures: 0,
            exit_code: 0,
            block_monitor: false,
            job_timeout: None,
            max_attempts: 3,
        }
    }
}

struct Rig {
    counters: Arc<Counters>,
    driver: StateMachineDriver,
    cancel: CancelSignal,
    _workspace: tempfile::TempDir,
}

fn custom_rig(opts: RigOptions, customize: impl FnOnce(&mut ActionRegistry)) -> Rig {
    let counters = Arc::new(Counters::default());
    let workspace = tempfile::tempdir().expect("tempdir");
    let cancel = CancelSignal::new();

    let collaborators = Collaborators {
        request_builder: Arc::new(MockBuilder),
        resolver: Arc::new(MockResolver {
            counters: Arc::clone(&counters),
            dependencies: opts.dependencies,
            no_match: opts.no_match,
        }),
        fetcher: Arc::new(MockFetcher {
            counters: Arc::clone(&counters),
            transient_failures: opts.transient_failures,
        }),
        launcher: Arc::new(MockLauncher {
            counters: Arc::clone(&counters),
            exit_code: opts.exit_code,
        }),
        monitor: Arc::new(MockMonitor {
            script: if opts.block_monitor {
                MonitorScript::Block
            } else {
                MonitorScript::Finish
            },
        }),
        cleanup: Arc::new(MockCleanup {
            counters: Arc::clone(&counters),
        }),
    };
    let policy = ExecutionPolicy {
        workspace_root: workspace.path().to_path_buf(),
        resolve_timeout: Some(Duration::from_secs(5)),
        job_timeout: opts.job_timeout,
        setup_retry: RetryPolicy {
            max_attempts: opts.max_attempts,
            base_delay: Duration::from_millis(1),
        },
    };

    let mut registry = standard_registry(collaborators, &policy, &cancel);
    customize(&mut registry);
    let driver = StateMachineDriver::new(registry, TransitionTable::standard(), cancel.clone())
        .expect("valid composition");
    Rig {
        counters,
        driver,
        cancel,
        _workspace: workspace,
    }
}

fn standard_rig(opts: RigOptions) -> Rig {
    custom_rig(opts, |_| {})
}

fn inputs() -> JobRequestInputs {
    JobRequestInputs::new("integration-job")
        .with_cluster_tag("env:test")
        .with_command_tag("type:echo")
}

fn path_of(ctx: &ExecutionContext) -> Vec<(State, Event, State)> {
    ctx.history().iter().map(|r| (r.from, r.event, r.to)).collect()
}

// ---------------------------------------------------------------------------
// Lifecycle scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_lifecycle_runs_to_done_with_success() {
    let rig = standard_rig(RigOptions::default());
    let notices = rig.driver.transition_bus().subscribe();
    let mut ctx = ExecutionContext::new(inputs());

    let status = rig.driver.run(&mut ctx).await;

    assert_eq!(status, TerminalStatus::Succeeded);
    assert_eq!(ctx.terminal_status(), Some(TerminalStatus::Succeeded));
    assert!(ctx.job_specification().is_some());
    assert_eq!(ctx.process_outcome(), Some(JobExit::from_code(0)));
    assert_eq!(
        path_of(&ctx),
        vec![
            (
                State::Initialize,
                Event::InitializeComplete,
                State::ResolveJobSpecification
            ),
            (
                State::ResolveJobSpecification,
                Event::ResolveJobSpecificationComplete,
                State::SetupJob
            ),
            (State::SetupJob, Event::SetupJobComplete, State::LaunchJob),
            (State::LaunchJob, Event::LaunchJobComplete, State::MonitorJob),
            (State::MonitorJob, Event::MonitorJobComplete, State::Cleanup),
            (State::Cleanup, Event::CleanupComplete, State::Done),
        ]
    );

    assert_eq!(rig.counters.resolve_calls.load(Ordering::SeqCst), 1);
    assert_eq!(rig.counters.launch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(rig.counters.release_calls.load(Ordering::SeqCst), 1);

    let published: Vec<_> = notices.drain().collect();
    assert_eq!(published.len(), 6);
    assert_eq!(published.last().map(|n| n.to), Some(State::Done));
    assert!(published.iter().all(|n| n.job_name == "integration-job"));
}

#[tokio::test]
async fn malformed_inputs_fail_before_resolution() {
    let rig = standard_rig(RigOptions::default());
    let mut ctx = ExecutionContext::new(JobRequestInputs::new("   "));

    let status = rig.driver.run(&mut ctx).await;

    assert_eq!(status, TerminalStatus::Failed);
    assert!(ctx.job_specification().is_none());
    assert_eq!(rig.counters.resolve_calls.load(Ordering::SeqCst), 0);
    let failure = ctx.failure().expect("cause recorded");
    assert!(failure.chain().contains("missing required field"));
    // Still funnels through cleanup to DONE.
    assert_eq!(ctx.history().last().map(|r| r.to), Some(State::Done));
    assert_eq!(rig.counters.release_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn no_matching_resources_fails_after_exactly_one_resolution_call() {
    let rig = standard_rig(RigOptions {
        no_match: true,
        ..RigOptions::default()
    });
    let mut ctx = ExecutionContext::new(inputs());

    let status = rig.driver.run(&mut ctx).await;

    assert_eq!(status, TerminalStatus::Failed);
    assert_eq!(rig.counters.resolve_calls.load(Ordering::SeqCst), 1);
    assert!(ctx.job_specification().is_none());
    let failure = ctx.failure().expect("cause recorded");
    assert!(failure.chain().contains("no cluster or command matched"));

    let cleanup_visits = ctx
        .history()
        .iter()
        .filter(|r| r.to == State::Cleanup)
        .count();
    assert_eq!(cleanup_visits, 1);
}

#[tokio::test]
async fn cancellation_during_monitor_releases_handles_and_cancels() {
    let rig = standard_rig(RigOptions {
        block_monitor: true,
        ..RigOptions::default()
    });
    let mut ctx = ExecutionContext::new(inputs());

    let trigger = rig.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.trigger();
    });

    let status = tokio::time::timeout(Duration::from_secs(5), rig.driver.run(&mut ctx))
        .await
        .expect("driver must not stall on cancellation");

    assert_eq!(status, TerminalStatus::Cancelled);
    assert!(ctx.cancelled());
    assert!(ctx.runtime_handles().released());
    assert_eq!(rig.counters.release_calls.load(Ordering::SeqCst), 1);
    assert!(rig.counters.kills.load(Ordering::SeqCst) >= 1);
    assert!(path_of(&ctx).contains(&(State::MonitorJob, Event::JobCancelled, State::Cleanup)));
    assert_eq!(ctx.history().last().map(|r| r.to), Some(State::Done));
}

#[tokio::test]
async fn job_deadline_expiry_terminates_as_timed_out() {
    let rig = standard_rig(RigOptions {
        block_monitor: true,
        job_timeout: Some(Duration::from_millis(50)),
        ..RigOptions::default()
    });
    let mut ctx = ExecutionContext::new(inputs());

    let status = tokio::time::timeout(Duration::from_secs(5), rig.driver.run(&mut ctx))
        .await
        .expect("driver must not stall on deadline expiry");

    assert_eq!(status, TerminalStatus::TimedOut);
    assert!(ctx.timed_out());
    assert!(rig.counters.kills.load(Ordering::SeqCst) >= 1);
    assert!(path_of(&ctx).contains(&(State::MonitorJob, Event::JobTimedOut, State::Cleanup)));
}

#[tokio::test]
async fn transient_setup_failures_retry_with_backoff_then_succeed() {
    let rig = standard_rig(RigOptions {
        dependencies: vec!["http://repo/artifacts/tool.jar".into()],
        transient_failures: 1,
        ..RigOptions::default()
    });
    let mut ctx = ExecutionContext::new(inputs());

    let status = rig.driver.run(&mut ctx).await;

    assert_eq!(status, TerminalStatus::Succeeded);
    assert_eq!(ctx.setup_attempts(), 2);
    assert_eq!(rig.counters.fetch_calls.load(Ordering::SeqCst), 2);
    assert!(path_of(&ctx).contains(&(State::SetupJob, Event::SetupJobFailedRetryable, State::SetupJob)));
    assert!(ctx.failure().is_none());
}

#[tokio::test]
async fn exhausted_setup_budget_terminates_as_failed() {
    let rig = standard_rig(RigOptions {
        dependencies: vec!["http://repo/artifacts/tool.jar".into()],
        transient_failures: 10,
        max_attempts: 2,
        ..RigOptions::default()
    });
    let mut ctx = ExecutionContext::new(inputs());

    let status = rig.driver.run(&mut ctx).await;

    assert_eq!(status, TerminalStatus::Failed);
    assert_eq!(ctx.setup_attempts(), 2);
    assert_eq!(rig.counters.fetch_calls.load(Ordering::SeqCst), 2);
    let failure = ctx.failure().expect("last transient cause recorded");
    assert!(failure.chain().contains("transient fetch error"));
    assert!(path_of(&ctx).contains(&(State::SetupJob, Event::SetupJobFailedFatal, State::Cleanup)));
}

#[tokio::test]
async fn pre_cancelled_run_cleans_up_without_resolving() {
    let rig = standard_rig(RigOptions::default());
    rig.cancel.trigger();
    let mut ctx = ExecutionContext::new(inputs());

    let status = rig.driver.run(&mut ctx).await;

    assert_eq!(status, TerminalStatus::Cancelled);
    assert_eq!(rig.counters.resolve_calls.load(Ordering::SeqCst), 0);
    assert_eq!(rig.counters.release_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        path_of(&ctx).first(),
        Some(&(State::Initialize, Event::JobCancelled, State::Cleanup))
    );
}

#[tokio::test]
async fn terminal_runs_are_idempotent() {
    let rig = standard_rig(RigOptions::default());
    let mut ctx = ExecutionContext::new(inputs());

    let first = rig.driver.run(&mut ctx).await;
    assert_eq!(first, TerminalStatus::Succeeded);
    let transitions = ctx.history().len();

    let second = rig.driver.run(&mut ctx).await;
    assert_eq!(second, TerminalStatus::Succeeded);
    assert_eq!(ctx.history().len(), transitions);
    assert_eq!(rig.counters.resolve_calls.load(Ordering::SeqCst), 1);
    assert_eq!(rig.counters.launch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(rig.counters.release_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_job_exit_code_terminates_as_failed() {
    let rig = standard_rig(RigOptions {
        exit_code: 3,
        ..RigOptions::default()
    });
    let mut ctx = ExecutionContext::new(inputs());

    let status = rig.driver.run(&mut ctx).await;

    assert_eq!(status, TerminalStatus::Failed);
    assert_eq!(ctx.process_outcome(), Some(JobExit::from_code(3)));
    // A non-zero exit is an outcome, not an agent failure.
    assert!(ctx.failure().is_none());
}

// ---------------------------------------------------------------------------
// Defect backstops
// ---------------------------------------------------------------------------

struct PanickingAction;

#[async_trait::async_trait]
impl Action for PanickingAction {
    fn state(&self) -> State {
        State::SetupJob
    }

    fn legal_events(&self) -> &'static [Event] {
        &[Event::SetupJobComplete]
    }

    fn failure_event(&self) -> Event {
        Event::SetupJobFailedFatal
    }

    async fn perform(&self, _ctx: &mut ExecutionContext) -> Result<Event, StateFailure> {
        panic!("setup exploded")
    }
}

#[tokio::test]
async fn action_panic_is_caught_and_forces_aborted() {
    let rig = custom_rig(RigOptions::default(), |registry| {
        registry.register(Arc::new(PanickingAction));
    });
    let mut ctx = ExecutionContext::new(inputs());

    let status = rig.driver.run(&mut ctx).await;

    assert_eq!(status, TerminalStatus::Aborted);
    assert_eq!(status.process_exit_code(), 70);
    let failure = ctx.failure().expect("defect recorded");
    assert!(failure.chain().contains("setup exploded"));
    assert_eq!(
        ctx.history().last().map(|r| (r.event, r.to)),
        Some((Event::FatalAbort, State::Aborted))
    );
}

/// Declares only mapped events but emits one its state has no row for.
struct LyingAction;

#[async_trait::async_trait]
impl Action for LyingAction {
    fn state(&self) -> State {
        State::SetupJob
    }

    fn legal_events(&self) -> &'static [Event] {
        &[Event::SetupJobComplete]
    }

    fn failure_event(&self) -> Event {
        Event::SetupJobFailedFatal
    }

    async fn perform(&self, _ctx: &mut ExecutionContext) -> Result<Event, StateFailure> {
        Ok(Event::MonitorJobComplete)
    }
}

#[tokio::test]
async fn unmapped_event_at_run_time_forces_aborted() {
    let rig = custom_rig(RigOptions::default(), |registry| {
        registry.register(Arc::new(LyingAction));
    });
    let mut ctx = ExecutionContext::new(inputs());

    let status = rig.driver.run(&mut ctx).await;

    assert_eq!(status, TerminalStatus::Aborted);
    let failure = ctx.failure().expect("defect recorded");
    assert!(failure.chain().contains("no transition mapped"));
}

struct LoopingAction;

#[async_trait::async_trait]
impl Action for LoopingAction {
    fn state(&self) -> State {
        State::SetupJob
    }

    fn legal_events(&self) -> &'static [Event] {
        &[Event::SetupJobFailedRetryable]
    }

    fn failure_event(&self) -> Event {
        Event::SetupJobFailedFatal
    }

    async fn perform(&self, _ctx: &mut ExecutionContext) -> Result<Event, StateFailure> {
        Ok(Event::SetupJobFailedRetryable)
    }
}

#[tokio::test]
async fn transition_ceiling_breaks_a_livelocked_run() {
    let Rig {
        driver,
        counters: _,
        cancel: _,
        _workspace,
    } = custom_rig(RigOptions::default(), |registry| {
        registry.register(Arc::new(LoopingAction));
    });
    let driver = driver.with_max_transitions(16);
    let mut ctx = ExecutionContext::new(inputs());

    let status = driver.run(&mut ctx).await;

    assert_eq!(status, TerminalStatus::Aborted);
    let failure = ctx.failure().expect("defect recorded");
    assert!(failure.chain().contains("transition ceiling"));
}
