//! `agentprobe` - batch front end of the safety-evaluation harness
//!
//! Reads a query file, runs each query through a bounded tool-calling agent
//! session against the configured backend and tool servers, and writes a
//! JSON report with the transcript and security trace of every query.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use agentprobe_core::{
    load_config, AgentSession, BackendPreference, ChatMessage, Generator, HarnessConfig,
    HttpToolServer, InferenceDispatcher, ModelLoader, PassthroughClassifier, ProbeError,
    RiskLabel, StubGenerator, ToolRegistry, ToolServer,
};

use crate::cli::{BackendChoice, Cli, Commands};

mod cli;

/// One line of the evaluation report
#[derive(Debug, Serialize)]
struct QueryRecord {
    query: String,
    transcript: Vec<ChatMessage>,
    security_trace: Vec<RiskLabel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Top-level evaluation report written as pretty-printed JSON
#[derive(Debug, Serialize)]
struct RunReport {
    run_id: Uuid,
    started_at: String,
    model: String,
    backend: String,
    records: Vec<QueryRecord>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config =
        load_config(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Run {
            queries,
            output,
            backend,
            replicas,
            dry_run,
        } => {
            if let Some(choice) = backend {
                config.backend.prefer = match choice {
                    BackendChoice::Server => BackendPreference::Server,
                    BackendChoice::Pool => BackendPreference::Pool,
                };
            }
            if let Some(n) = replicas {
                config.backend.replicas = n;
            }
            if dry_run {
                // The echo generator never talks to a server process.
                config.backend.prefer = BackendPreference::Pool;
            }

            run_batch(&config, &queries, &output, dry_run).await
        }
    }
}

async fn run_batch(
    config: &HarnessConfig,
    queries_path: &Path,
    output_path: &Path,
    dry_run: bool,
) -> Result<()> {
    let queries = read_queries(queries_path)?;
    if queries.is_empty() {
        anyhow::bail!("no queries found in {}", queries_path.display());
    }
    info!(count = queries.len(), "loaded query batch");

    let dispatcher = Arc::new(
        InferenceDispatcher::new(config, replica_loader(dry_run))
            .await
            .context("Failed to start inference backend")?,
    );

    let mut registry = ToolRegistry::new();
    for (name, endpoint) in &config.tool_servers {
        registry.register(
            name.clone(),
            Arc::new(HttpToolServer::new(name.clone(), endpoint.clone())) as Arc<dyn ToolServer>,
        );
    }
    if registry.is_empty() {
        warn!("no tool servers configured; every reply becomes a final answer");
    }

    let mut session = AgentSession::new(
        Arc::clone(&dispatcher),
        registry,
        Arc::new(PassthroughClassifier),
        config.system_prompt.clone(),
    );

    let mut report = RunReport {
        run_id: Uuid::new_v4(),
        started_at: Utc::now().to_rfc3339(),
        model: config.model.served_name.clone(),
        backend: format!("{:?}", dispatcher.backend_kind()),
        records: Vec::with_capacity(queries.len()),
    };

    let mut interrupted = false;
    for (i, query) in queries.iter().enumerate() {
        info!(query = i + 1, total = queries.len(), "running query");

        let outcome = tokio::select! {
            outcome = session.process_query(query) => outcome,
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, stopping after {} queries", i);
                interrupted = true;
                break;
            }
        };

        // A failed query is recorded, not fatal: the partial transcript
        // plus the error description stay in the report.
        report.records.push(match outcome {
            Ok((transcript, security_trace)) => QueryRecord {
                query: query.clone(),
                transcript,
                security_trace,
                error: None,
            },
            Err(e) => {
                error!(query = i + 1, "query failed: {}", e);
                QueryRecord {
                    query: query.clone(),
                    transcript: session.transcript().to_vec(),
                    security_trace: session.security_trace().to_vec(),
                    error: Some(e.to_string()),
                }
            }
        });
    }

    dispatcher.shutdown().await;

    std::fs::write(output_path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;
    info!(
        report = %output_path.display(),
        queries = report.records.len(),
        "evaluation run complete"
    );

    if interrupted {
        anyhow::bail!("run interrupted");
    }
    Ok(())
}

/// Loader backing the in-process pool.
///
/// The binary links no model runtime; the pool is reachable only in dry
/// runs or as the fallback target, where the echo generator stands in.
/// Embedders with a real in-process model supply their own loader through
/// the library API.
fn replica_loader(dry_run: bool) -> Arc<dyn ModelLoader> {
    if dry_run {
        Arc::new(|_replica: usize| Ok(Box::new(StubGenerator::new()) as Box<dyn Generator>))
    } else {
        Arc::new(|_replica: usize| -> agentprobe_core::Result<Box<dyn Generator>> {
            Err(ProbeError::InvalidConfig {
                message: "no in-process model runtime is linked; \
                          use the server backend or --dry-run"
                    .to_string(),
            })
        })
    }
}

fn read_queries(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}
