use gantry_core::types::{JobExit, JobSpecification};
use gantry_engine::services::{JobHandle, JobLauncher, LaunchFailure, MonitorFailure};
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Launches the specification's argv with `tokio::process`, rooted in the
/// job directory, stdout/stderr captured to `logs/stdout.log` and
/// `logs/stderr.log`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl JobLauncher for ProcessLauncher {
    async fn launch(
        &self,
        spec: &JobSpecification,
        job_dir: &Path,
    ) -> Result<Box<dyn JobHandle>, LaunchFailure> {
        let (program, args) = spec
            .executable
            .split_first()
            .ok_or(LaunchFailure::EmptyCommandLine)?;

        let logs = job_dir.join("logs");
        let stdout =
            std::fs::File::create(logs.join("stdout.log")).map_err(LaunchFailure::LogFiles)?;
        let stderr =
            std::fs::File::create(logs.join("stderr.log")).map_err(LaunchFailure::LogFiles)?;

        // kill_on_drop: an abandoned handle must never leak a running job.
        let child = Command::new(program)
            .args(args)
            .current_dir(job_dir)
            .envs(&spec.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(LaunchFailure::Spawn)?;

        debug!(program = %program, pid = ?child.id(), "job process spawned");
        Ok(Box::new(LaunchedJob { child, exit: None }))
    }
}

/// A spawned job process. The exit is cached after the first successful
/// wait so later calls answer without touching the reaped process.
#[derive(Debug)]
pub struct LaunchedJob {
    child: Child,
    exit: Option<JobExit>,
}

impl LaunchedJob {
    fn classify(status: std::process::ExitStatus) -> JobExit {
        match status.code() {
            Some(code) => JobExit::from_code(code),
            None => JobExit::killed(),
        }
    }
}

#[async_trait::async_trait]
impl JobHandle for LaunchedJob {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<JobExit, MonitorFailure> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }
        let status = self.child.wait().await?;
        let exit = Self::classify(status);
        self.exit = Some(exit);
        Ok(exit)
    }

    async fn kill(&mut self) {
        if self.exit.is_some() {
            return;
        }
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "start_kill on an already-finished process");
        }
        match self.child.wait().await {
            Ok(status) => {
                let exit = Self::classify(status);
                self.exit = Some(exit);
                info!(exit = %exit, "job process killed and reaped");
            }
            Err(e) => debug!(error = %e, "waiting on killed process"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
