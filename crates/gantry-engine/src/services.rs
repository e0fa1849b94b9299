use crate::cancel::CancelSignal;
use crate::context::RuntimeHandles;
use async_trait::async_trait;
use gantry_core::types::{JobExit, JobRequest, JobRequestInputs, JobSpecification};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Failure kinds
// ---------------------------------------------------------------------------

/// Rejection of raw inputs while building the job request. Always a local,
/// non-retryable defect.
#[derive(Debug, thiserror::Error)]
pub enum ConversionFailure {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Why the resolution service could not produce a specification. All kinds
/// are fatal to the run — resolution is a one-shot negotiation.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionFailure {
    #[error("no cluster or command matched the request criteria: {0}")]
    NoMatchingResources(String),
    #[error("conflicting resolution criteria: {0}")]
    ConflictingCriteria(String),
    #[error("resolution rejected by server: {0}")]
    Rejected(String),
    #[error("resolution transport error: {0}")]
    Transport(String),
}

/// Why a dependency could not be staged into the job directory.
#[derive(Debug, thiserror::Error)]
pub enum FetchFailure {
    #[error("dependency not found: {0}")]
    NotFound(String),
    #[error("transient fetch error for {uri}: {reason}")]
    Transient { uri: String, reason: String },
    #[error("i/o error staging dependency: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchFailure {
    /// Transient failures are worth another setup attempt; missing
    /// dependencies and local disk errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchFailure::Transient { .. })
    }
}

/// Why the job process could not be started.
#[derive(Debug, thiserror::Error)]
pub enum LaunchFailure {
    #[error("job specification has an empty command line")]
    EmptyCommandLine,
    #[error("failed to prepare job log files: {0}")]
    LogFiles(#[source] std::io::Error),
    #[error("failed to spawn job process: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Why waiting on the job process broke down.
#[derive(Debug, thiserror::Error)]
pub enum MonitorFailure {
    #[error("failed waiting on job process: {0}")]
    Wait(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// RequestBuilder
// ---------------------------------------------------------------------------

/// Builds the normalized [`JobRequest`] from raw inputs. Pure and
/// synchronous: no I/O, no clocks beyond the capture timestamp.
pub trait RequestBuilder: Send + Sync {
    fn build(&self, inputs: &JobRequestInputs) -> Result<JobRequest, ConversionFailure>;
}

// ---------------------------------------------------------------------------
// SpecificationResolver
// ---------------------------------------------------------------------------

/// Negotiates the fully resolved [`JobSpecification`] with the central
/// resolution service.
#[async_trait]
pub trait SpecificationResolver: Send + Sync {
    async fn resolve(&self, request: &JobRequest) -> Result<JobSpecification, ResolutionFailure>;
}

// ---------------------------------------------------------------------------
// ResourceFetcher
// ---------------------------------------------------------------------------

/// Stages one dependency URI into the job directory.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, uri: &str, dest: &Path) -> Result<(), FetchFailure>;
}

// ---------------------------------------------------------------------------
// JobLauncher / JobHandle
// ---------------------------------------------------------------------------

/// Starts the job process described by a specification, rooted in the job
/// directory.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn launch(
        &self,
        spec: &JobSpecification,
        job_dir: &Path,
    ) -> Result<Box<dyn JobHandle>, LaunchFailure>;
}

/// A running (or finished) job process.
#[async_trait]
pub trait JobHandle: Send + Sync + std::fmt::Debug {
    /// OS process id, when still known.
    fn pid(&self) -> Option<u32>;

    /// Wait for the process to finish. Safe to call again after completion;
    /// returns the same exit.
    async fn wait(&mut self) -> Result<JobExit, MonitorFailure>;

    /// Kill and reap the process. Idempotent; a no-op once it has exited.
    async fn kill(&mut self);
}

// ---------------------------------------------------------------------------
// JobMonitor
// ---------------------------------------------------------------------------

/// What a bounded wait on the job process ended with.
#[derive(Debug)]
pub enum MonitorOutcome {
    Exited(JobExit),
    Failed(MonitorFailure),
    Cancelled,
    DeadlineExceeded,
}

/// Awaits job completion, bounded by an optional deadline and raceable
/// against cancellation. The monitor only observes; killing on
/// cancellation/deadline is the caller's job.
#[async_trait]
pub trait JobMonitor: Send + Sync {
    async fn await_completion(
        &self,
        handle: &mut dyn JobHandle,
        deadline: Option<Duration>,
        cancel: &CancelSignal,
    ) -> MonitorOutcome;
}

// ---------------------------------------------------------------------------
// CleanupHook
// ---------------------------------------------------------------------------

/// Releases runtime handles at the end of a run: kill/reap any live
/// process, optionally drop the job directory. Best-effort by contract —
/// the hook logs problems and never fails.
#[async_trait]
pub trait CleanupHook: Send + Sync {
    async fn release(&self, handles: &mut RuntimeHandles);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
