//! The concrete lifecycle actions and their composition helpers.
//!
//! Each action owns one state's work and one state's context fields; policy
//! (retry budgets, deadlines) lives in the action that needs it, injected
//! here from an [`ExecutionPolicy`]. [`standard_registry`] wires the full
//! set for a production run; tests wire registries by hand.

mod cleanup;
mod initialize;
mod launch;
mod monitor;
mod resolve;
mod setup;

pub use cleanup::CleanupAction;
pub use initialize::InitializeAction;
pub use launch::LaunchJobAction;
pub use monitor::MonitorJobAction;
pub use resolve::ResolveJobSpecificationAction;
pub use setup::SetupJobAction;

use crate::action::ActionRegistry;
use crate::cancel::CancelSignal;
use crate::services::{
    CleanupHook, JobLauncher, JobMonitor, RequestBuilder, ResourceFetcher, SpecificationResolver,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// The full set of collaborator implementations one run needs.
pub struct Collaborators {
    pub request_builder: Arc<dyn RequestBuilder>,
    pub resolver: Arc<dyn SpecificationResolver>,
    pub fetcher: Arc<dyn ResourceFetcher>,
    pub launcher: Arc<dyn JobLauncher>,
    pub monitor: Arc<dyn JobMonitor>,
    pub cleanup: Arc<dyn CleanupHook>,
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Attempt budget and backoff curve for the setup action.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first try included.
    pub max_attempts: u32,
    /// Delay before attempt 2; doubles per further attempt.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Backoff before re-running a failed attempt: `base * 2^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionPolicy
// ---------------------------------------------------------------------------

/// Run-level knobs distributed to the actions that own them.
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    /// Directory all per-job directories are created under.
    pub workspace_root: PathBuf,
    /// Deadline for the specification resolution call.
    pub resolve_timeout: Option<Duration>,
    /// Default wall-clock limit for the job process; a specification-level
    /// timeout takes precedence.
    pub job_timeout: Option<Duration>,
    pub setup_retry: RetryPolicy,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("gantry-jobs"),
            resolve_timeout: Some(Duration::from_secs(30)),
            job_timeout: None,
            setup_retry: RetryPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Wire the standard action set for one run.
pub fn standard_registry(
    collaborators: Collaborators,
    policy: &ExecutionPolicy,
    cancel: &CancelSignal,
) -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry.register(Arc::new(InitializeAction::new(policy.workspace_root.clone())));
    registry.register(Arc::new(ResolveJobSpecificationAction::new(
        collaborators.request_builder,
        collaborators.resolver,
        cancel.clone(),
        policy.resolve_timeout,
    )));
    registry.register(Arc::new(SetupJobAction::new(
        collaborators.fetcher,
        policy.workspace_root.clone(),
        policy.setup_retry.clone(),
        cancel.clone(),
    )));
    registry.register(Arc::new(LaunchJobAction::new(collaborators.launcher)));
    registry.register(Arc::new(MonitorJobAction::new(
        collaborators.monitor,
        cancel.clone(),
        policy.job_timeout,
    )));
    registry.register(Arc::new(CleanupAction::new(collaborators.cleanup)));
    registry
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
