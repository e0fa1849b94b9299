//! gantry-agent — executes one orchestrated job on the host it runs on:
//! resolves the specification, stages dependencies, launches and monitors
//! the process, and cleans up. The process exit code encodes the terminal
//! status of the run.

mod cli;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ExecArgs};
use gantry_core::config::Config;
use gantry_core::types::TerminalStatus;
use gantry_engine::actions::{standard_registry, Collaborators, ExecutionPolicy, RetryPolicy};
use gantry_engine::cancel::CancelSignal;
use gantry_engine::context::{ExecutionContext, RunReport};
use gantry_engine::driver::StateMachineDriver;
use gantry_engine::transitions::TransitionTable;
use gantry_services::{
    CliRequestBuilder, HttpResourceFetcher, HttpSpecificationResolver, ProcessLauncher,
    ProcessMonitor, WorkspaceCleanup,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load().context("loading config")?,
    };

    if cli.json_logs {
        logging::init_logging_json(&config.general.log_level);
    } else {
        logging::init_logging(&config.general.log_level);
    }

    let Commands::Exec(args) = cli.command;
    let status = exec(args, &config).await?;
    std::process::exit(status.process_exit_code());
}

async fn exec(args: ExecArgs, config: &Config) -> Result<TerminalStatus> {
    let server_url = args
        .server_url
        .clone()
        .unwrap_or_else(|| config.server.base_url.clone());

    // Zero disables the resolution deadline; the HTTP client then keeps a
    // generous backstop against hung sockets.
    let resolve_timeout = match config.server.resolve_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let client_timeout = resolve_timeout.unwrap_or(Duration::from_secs(300));

    let policy = ExecutionPolicy {
        workspace_root: expand_home(&config.execution.workspace_root),
        resolve_timeout,
        job_timeout: config.execution.job_timeout_secs.map(Duration::from_secs),
        setup_retry: RetryPolicy {
            max_attempts: config.setup.retry_limit,
            base_delay: Duration::from_millis(config.setup.retry_delay_ms),
        },
    };

    let collaborators = Collaborators {
        request_builder: Arc::new(CliRequestBuilder::new()),
        resolver: Arc::new(HttpSpecificationResolver::new(server_url, client_timeout)),
        fetcher: Arc::new(HttpResourceFetcher::new(Duration::from_secs(
            config.setup.fetch_timeout_secs,
        ))),
        launcher: Arc::new(ProcessLauncher::new()),
        monitor: Arc::new(ProcessMonitor::new()),
        cleanup: Arc::new(WorkspaceCleanup::new(!config.execution.keep_workspace)),
    };

    let cancel = CancelSignal::new();
    let registry = standard_registry(collaborators, &policy, &cancel);
    let driver = StateMachineDriver::new(registry, TransitionTable::standard(), cancel.clone())
        .context("invalid engine composition")?;

    // First ctrl-c cancels gracefully; the run still unwinds through cleanup.
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, cancelling the run");
        cancel.trigger();
    });

    let mut ctx = ExecutionContext::new(args.into_inputs());
    let status = driver.run(&mut ctx).await;

    let report = ctx.report();
    info!(
        job = %report.job_name,
        status = %report.status,
        duration_ms = report.duration_ms,
        transitions = report.transitions.len(),
        "run finished"
    );
    if let Some(failure) = &report.failure {
        warn!(failure = %failure, "run ended with a failure");
    }
    write_report(&ctx, &report);

    Ok(status)
}

/// Drop the report next to the job's logs when the directory survived
/// cleanup. Best-effort: a report that cannot be written only warns.
fn write_report(ctx: &ExecutionContext, report: &RunReport) {
    let Some(dir) = ctx.runtime_handles().job_dir() else {
        return;
    };
    if !dir.exists() {
        return;
    }
    let path = dir.join("report.json");
    match serde_json::to_string_pretty(report) {
        Ok(body) => {
            if let Err(e) = std::fs::write(&path, body) {
                warn!(path = %path.display(), error = %e, "could not write the run report");
            } else {
                info!(path = %path.display(), "run report written");
            }
        }
        Err(e) => warn!(error = %e, "could not serialize the run report"),
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}
