//! Supervised inference-process lifecycle
//!
//! Owns one externally supervised inference-server process: spawn it with
//! the configured launch contract, poll its port until it accepts TCP
//! connections, and tear it down gracefully on shutdown. If something is
//! already listening on the target port the supervisor adopts it as an
//! externally owned server and never spawns or kills anything.

use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{BackendConfig, ModelConfig};
use crate::error::{ProbeError, Result};

/// Interval between readiness probes
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long a terminated process gets to exit before the force-kill
pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Lifecycle state of the supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    NotStarted,
    Starting,
    Ready,
    Failed,
    Stopped,
}

/// Spawns and health-checks one inference-server process
pub struct BackendSupervisor {
    model: ModelConfig,
    config: BackendConfig,
    state: BackendState,
    child: Option<Child>,
    /// Adopted server owned by someone else; shutdown must not touch it
    external: bool,
}

impl BackendSupervisor {
    pub fn new(model: ModelConfig, config: BackendConfig) -> Self {
        BackendSupervisor {
            model,
            config,
            state: BackendState::NotStarted,
            child: None,
            external: false,
        }
    }

    pub fn state(&self) -> BackendState {
        self.state
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Launch arguments implementing the server CLI contract: model and
    /// tokenizer paths, bind address, parallelism degree, precision,
    /// batching limits, optional context length, then pass-through flags.
    fn launch_args(&self) -> Vec<String> {
        let mut args = vec![
            "--model".to_string(),
            self.model.model_path.clone(),
            "--tokenizer".to_string(),
            self.model.tokenizer().to_string(),
            "--host".to_string(),
            self.config.host.clone(),
            "--port".to_string(),
            self.config.port.to_string(),
            "--tensor-parallel-size".to_string(),
            self.config.parallelism.to_string(),
            "--dtype".to_string(),
            self.config.dtype.clone(),
            "--max-num-batched-tokens".to_string(),
            self.config.max_batched_tokens.to_string(),
            "--max-num-seqs".to_string(),
            self.config.max_sequences.to_string(),
        ];
        if let Some(len) = self.config.max_model_len {
            args.push("--max-model-len".to_string());
            args.push(len.to_string());
        }
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    async fn port_open(&self) -> bool {
        TcpStream::connect((self.config.host.as_str(), self.config.port))
            .await
            .is_ok()
    }

    /// Start the server process and wait until its port accepts connections.
    ///
    /// Returns immediately when something is already listening (an
    /// externally owned server is adopted, nothing is spawned). Fails with
    /// [`ProbeError::BackendStartup`] if the process exits before becoming
    /// ready, or [`ProbeError::BackendTimeout`] when `timeout` elapses.
    pub async fn start(&mut self, timeout: Duration) -> Result<()> {
        if self.state == BackendState::Ready {
            return Ok(());
        }

        if self.port_open().await {
            info!(
                host = %self.config.host,
                port = self.config.port,
                "adopting externally owned inference server"
            );
            self.external = true;
            self.state = BackendState::Ready;
            return Ok(());
        }

        self.state = BackendState::Starting;
        info!(
            command = %self.config.server_command,
            port = self.config.port,
            "launching inference server"
        );

        let child = Command::new(&self.config.server_command)
            .args(self.launch_args())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                self.state = BackendState::Failed;
                ProbeError::BackendStartup {
                    reason: format!("cannot spawn {}: {}", self.config.server_command, e),
                }
            })?;
        self.child = Some(child);

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(child) = self.child.as_mut() {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        self.state = BackendState::Failed;
                        self.child = None;
                        return Err(ProbeError::BackendStartup {
                            reason: format!("server exited during startup: {}", status),
                        });
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.state = BackendState::Failed;
                        return Err(ProbeError::BackendStartup {
                            reason: format!("cannot poll server process: {}", e),
                        });
                    }
                }
            }

            if self.port_open().await {
                self.state = BackendState::Ready;
                info!(port = self.config.port, "inference server ready");
                return Ok(());
            }

            if Instant::now() >= deadline {
                self.state = BackendState::Failed;
                self.kill_child().await;
                return Err(ProbeError::BackendTimeout { timeout });
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Terminate the supervised process: graceful signal, bounded wait,
    /// then force-kill. Idempotent; a second call is a no-op. Adopted
    /// external servers are left untouched.
    pub async fn shutdown(&mut self) {
        if self.state == BackendState::Stopped {
            return;
        }
        if self.external {
            self.state = BackendState::Stopped;
            return;
        }

        if let Some(mut child) = self.child.take() {
            request_termination(&child);
            match tokio::time::timeout(GRACE_PERIOD, child.wait()).await {
                Ok(Ok(status)) => {
                    info!("inference server exited: {}", status);
                }
                Ok(Err(e)) => {
                    warn!("error waiting for inference server: {}", e);
                }
                Err(_) => {
                    warn!("inference server ignored termination, force killing");
                    if let Err(e) = child.kill().await {
                        warn!("force kill failed: {}", e);
                    }
                }
            }
        }
        self.state = BackendState::Stopped;
    }

    async fn kill_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }
}

/// Ask the process to exit gracefully (SIGTERM on unix)
fn request_termination(child: &Child) {
    let Some(pid) = child.id() else {
        return;
    };

    #[cfg(unix)]
    {
        let _ = std::process::Command::new("kill")
            .arg(pid.to_string())
            .status();
    }

    #[cfg(windows)]
    {
        let _ = std::process::Command::new("taskkill")
            .arg("/PID")
            .arg(pid.to_string())
            .status();
    }
}
