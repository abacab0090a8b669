//! CLI argument parsing using clap 4.x derive macros

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Safety-evaluation harness for tool-calling agents
///
/// Replays a batch of adversarial queries through a bounded agent loop
/// against configured tool servers and writes a JSON report with the full
/// transcript and per-call security trace of every query.
#[derive(Parser, Debug)]
#[command(name = "agentprobe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ~/.config/agentprobe/agentprobe.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "agentprobe_core=debug" (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a batch of queries and write the evaluation report
    Run {
        /// File with one query per line (blank lines and '#' lines skipped)
        #[arg(short, long)]
        queries: PathBuf,

        /// Report destination
        #[arg(short, long, default_value = "report.json")]
        output: PathBuf,

        /// Override the configured backend preference
        #[arg(long)]
        backend: Option<BackendChoice>,

        /// Override the configured replica count for the in-process pool
        #[arg(long)]
        replicas: Option<usize>,

        /// Use the built-in echo generator instead of a real model backend
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the effective configuration and exit
    Config,
}

/// Backend preference as a command-line flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendChoice {
    /// Supervised inference-server process
    Server,
    /// In-process replica pool
    Pool,
}
