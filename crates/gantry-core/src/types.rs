use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// JobRequestInputs
// ---------------------------------------------------------------------------

/// Raw job inputs as gathered from the CLI and config, before any
/// normalization or validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequestInputs {
    pub job_name: String,
    pub cluster_tags: Vec<String>,
    pub command_tags: Vec<String>,
    pub command_args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub timeout_secs: Option<u64>,
    pub metadata: Option<serde_json::Value>,
}

impl JobRequestInputs {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            ..Self::default()
        }
    }

    pub fn with_cluster_tag(mut self, tag: impl Into<String>) -> Self {
        self.cluster_tags.push(tag.into());
        self
    }

    pub fn with_command_tag(mut self, tag: impl Into<String>) -> Self {
        self.command_tags.push(tag.into());
        self
    }

    pub fn with_command_args(mut self, args: Vec<String>) -> Self {
        self.command_args = args;
        self
    }
}

// ---------------------------------------------------------------------------
// ResourceCriteria
// ---------------------------------------------------------------------------

/// Tag sets the resolution service matches against registered clusters and
/// commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCriteria {
    pub cluster_tags: Vec<String>,
    pub command_tags: Vec<String>,
}

impl ResourceCriteria {
    pub fn is_empty(&self) -> bool {
        self.cluster_tags.is_empty() && self.command_tags.is_empty()
    }
}

// ---------------------------------------------------------------------------
// JobRequest
// ---------------------------------------------------------------------------

/// Normalized description of what the user asked to run, before resource
/// selection. Built once from [`JobRequestInputs`] and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub id: Uuid,
    pub name: String,
    pub criteria: ResourceCriteria,
    pub command_args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub timeout_secs: Option<u64>,
    pub metadata: Option<serde_json::Value>,
    pub requested_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// JobSpecification
// ---------------------------------------------------------------------------

/// A resource the resolution service selected for the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedResource {
    pub id: String,
    pub name: String,
}

/// The fully resolved execution plan: concrete command line, environment,
/// and dependencies to stage. Produced by the resolution service; never
/// constructed or modified locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpecification {
    pub job_id: Uuid,
    pub cluster: ResolvedResource,
    pub command: ResolvedResource,
    /// Full argv, program first. Never empty for a well-formed specification.
    pub executable: Vec<String>,
    pub environment: BTreeMap<String, String>,
    /// URIs to download into the job directory before launch.
    pub dependencies: Vec<String>,
    pub timeout_secs: Option<u64>,
}

impl JobSpecification {
    /// The program portion of the argv, if present.
    pub fn program(&self) -> Option<&str> {
        self.executable.first().map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// JobExit
// ---------------------------------------------------------------------------

/// Exit classification of the launched job process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExit {
    /// Process exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl JobExit {
    pub fn from_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn killed() -> Self {
        Self { code: None }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for JobExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "killed by signal"),
        }
    }
}

// ---------------------------------------------------------------------------
// TerminalStatus
// ---------------------------------------------------------------------------

/// Final classification of a completed run. Exactly one is recorded per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    /// Lifecycle completed and the job process exited zero.
    Succeeded,
    /// Lifecycle completed but the job failed (setup, launch, resolution, or
    /// non-zero exit).
    Failed,
    /// An external cancellation ended the run.
    Cancelled,
    /// A resolution or execution deadline expired.
    TimedOut,
    /// The engine hit an internal defect and bailed out.
    Aborted,
}

impl TerminalStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TerminalStatus::Succeeded)
    }

    /// Exit code the agent process reports for this status. Follows the
    /// shell conventions for interrupt (130) and timeout (124); 70 is
    /// EX_SOFTWARE for internal defects.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            TerminalStatus::Succeeded => 0,
            TerminalStatus::Failed => 1,
            TerminalStatus::Cancelled => 130,
            TerminalStatus::TimedOut => 124,
            TerminalStatus::Aborted => 70,
        }
    }
}

impl std::fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TerminalStatus::Succeeded => "succeeded",
            TerminalStatus::Failed => "failed",
            TerminalStatus::Cancelled => "cancelled",
            TerminalStatus::TimedOut => "timed_out",
            TerminalStatus::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}
