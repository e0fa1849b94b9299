use clap::{Args, Parser, Subcommand};
use gantry_core::types::JobRequestInputs;
use std::path::PathBuf;

/// gantry-agent -- execute one orchestrated job from resolution to exit.
#[derive(Debug, Parser)]
#[command(name = "gantry-agent", version, about)]
pub struct Cli {
    /// Path to the config file (defaults to ~/.gantry/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit JSON log lines instead of human-readable output.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve, stage, launch, and monitor a job, then clean up.
    Exec(ExecArgs),
}

#[derive(Debug, Args)]
pub struct ExecArgs {
    /// Human-readable job name.
    #[arg(long)]
    pub job_name: String,

    /// Cluster selection tag (e.g. env:prod). Repeatable.
    #[arg(long = "cluster-tag", value_name = "TAG")]
    pub cluster_tags: Vec<String>,

    /// Command selection tag (e.g. type:spark-submit). Repeatable.
    #[arg(long = "command-tag", value_name = "TAG")]
    pub command_tags: Vec<String>,

    /// Environment variable for the job process. Repeatable.
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Wall-clock limit for the job process, in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Resolution server base URL (overrides the config file).
    #[arg(long)]
    pub server_url: Option<String>,

    /// Arguments appended to the resolved command line, after `--`.
    #[arg(last = true, value_name = "ARGS")]
    pub command_args: Vec<String>,
}

impl ExecArgs {
    /// Fold the parsed flags into the raw inputs the request builder
    /// normalizes.
    pub fn into_inputs(self) -> JobRequestInputs {
        let mut inputs =
            JobRequestInputs::new(self.job_name).with_command_args(self.command_args);
        for tag in self.cluster_tags {
            inputs = inputs.with_cluster_tag(tag);
        }
        for tag in self.command_tags {
            inputs = inputs.with_command_tag(tag);
        }
        inputs.env = self.env.into_iter().collect();
        inputs.timeout_secs = self.timeout_secs;
        inputs
    }
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}
