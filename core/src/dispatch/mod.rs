//! Inference dispatcher
//!
//! Routes generation requests onto one of two backends, chosen once at
//! construction: an in-process pool of replica workers, or one worker
//! servicing an externally supervised inference-server endpoint. A failed
//! server startup logs its cause and falls back to the pool; the decision
//! is never revisited per request.

mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::backend::BackendSupervisor;
use crate::config::{BackendPreference, HarnessConfig};
use crate::error::{ProbeError, Result};
use crate::llm::{ChatMessage, EndpointGenerator, Generator, ModelLoader};
use worker::{least_loaded_index, spawn_replica_worker, InferenceRequest, ReplicaSlot, WorkItem};

/// Which backend the dispatcher ended up serving from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process replica pool, one worker thread per replica
    ReplicaPool,
    /// One shared worker in front of a supervised server endpoint
    SupervisedServer,
}

/// Routes generation requests across replica queues; owns worker and
/// supervised-process lifecycles. Explicitly constructed and passed by
/// reference to every session; the process entry point owns `shutdown`.
pub struct InferenceDispatcher {
    kind: BackendKind,
    slots: Vec<ReplicaSlot>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    supervisor: tokio::sync::Mutex<Option<BackendSupervisor>>,
    shut: AtomicBool,
}

impl InferenceDispatcher {
    /// Build the dispatcher for `config`, deciding the backend once.
    ///
    /// With `prefer: server`, a supervised-process startup failure is
    /// logged and the in-process pool is used instead; the error is fatal
    /// only if the pool also fails to come up.
    pub async fn new(config: &HarnessConfig, loader: Arc<dyn ModelLoader>) -> Result<Self> {
        if config.backend.prefer == BackendPreference::Server {
            match Self::try_server_backend(config).await {
                Ok(dispatcher) => return Ok(dispatcher),
                Err(e) => {
                    warn!("supervised backend unavailable, falling back to replica pool: {}", e);
                }
            }
        }
        Self::pool_backend(config, loader)
    }

    async fn try_server_backend(config: &HarnessConfig) -> Result<Self> {
        let mut supervisor =
            BackendSupervisor::new(config.model.clone(), config.backend.clone());
        let timeout = Duration::from_secs(config.backend.startup_timeout_secs);

        if let Err(e) = supervisor.start(timeout).await {
            // Never leak a partially started process into the fallback.
            supervisor.shutdown().await;
            return Err(e);
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| ProbeError::BackendStartup {
            reason: format!("no async runtime for endpoint client: {}", e),
        });
        let runtime = match runtime {
            Ok(handle) => handle,
            Err(e) => {
                supervisor.shutdown().await;
                return Err(e);
            }
        };

        let generator = EndpointGenerator::new(
            runtime,
            supervisor.host(),
            supervisor.port(),
            config.model.served_name.clone(),
        );

        match spawn_replica_worker(0, Box::new(generator)) {
            Ok((slot, handle)) => {
                info!(
                    host = supervisor.host(),
                    port = supervisor.port(),
                    "dispatcher serving from supervised server"
                );
                Ok(InferenceDispatcher {
                    kind: BackendKind::SupervisedServer,
                    slots: vec![slot],
                    workers: parking_lot::Mutex::new(vec![handle]),
                    supervisor: tokio::sync::Mutex::new(Some(supervisor)),
                    shut: AtomicBool::new(false),
                })
            }
            Err(e) => {
                supervisor.shutdown().await;
                Err(e)
            }
        }
    }

    fn pool_backend(config: &HarnessConfig, loader: Arc<dyn ModelLoader>) -> Result<Self> {
        let replicas = config.backend.replicas.max(1);
        let mut slots = Vec::with_capacity(replicas);
        let mut workers = Vec::with_capacity(replicas);

        for index in 0..replicas {
            let generator: Box<dyn Generator> = loader.load(index)?;
            let (slot, handle) = spawn_replica_worker(index, generator)?;
            slots.push(slot);
            workers.push(handle);
        }

        info!(replicas, "dispatcher serving from in-process replica pool");
        Ok(InferenceDispatcher {
            kind: BackendKind::ReplicaPool,
            slots,
            workers: parking_lot::Mutex::new(workers),
            supervisor: tokio::sync::Mutex::new(None),
            shut: AtomicBool::new(false),
        })
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    /// Generate the next assistant reply for `messages`.
    ///
    /// Exactly one enqueue and one reply publication per call: the request
    /// goes to the least-loaded queue (sole queue on the server backend)
    /// and the caller suspends on its private reply channel.
    pub async fn generate_response(&self, messages: Vec<ChatMessage>) -> Result<String> {
        if self.shut.load(Ordering::SeqCst) {
            return Err(ProbeError::DispatcherClosed);
        }

        let index = self.pick_queue();
        let slot = &self.slots[index];

        let (reply_tx, reply_rx) = oneshot::channel();
        slot.depth.fetch_add(1, Ordering::SeqCst);
        let sent = slot.tx.send(WorkItem::Request(InferenceRequest {
            messages,
            reply: reply_tx,
        }));
        if sent.is_err() {
            slot.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(ProbeError::DispatcherClosed);
        }

        match reply_rx.await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(message)) => Err(ProbeError::Generation { message }),
            Err(_) => Err(ProbeError::DispatcherClosed),
        }
    }

    /// Depth read and enqueue are two steps; two concurrent callers may
    /// both route to the same "least loaded" replica. Accepted skew.
    fn pick_queue(&self) -> usize {
        if self.slots.len() == 1 {
            return 0;
        }
        let depths: Vec<usize> = self
            .slots
            .iter()
            .map(|s| s.depth.load(Ordering::SeqCst))
            .collect();
        least_loaded_index(&depths)
    }

    /// Stop every worker and tear down the supervised process if one is
    /// active. Idempotent: the second call observes no live workers and
    /// returns immediately.
    pub async fn shutdown(&self) {
        if self.shut.swap(true, Ordering::SeqCst) {
            return;
        }

        for slot in &self.slots {
            let _ = slot.tx.send(WorkItem::Shutdown);
        }

        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("replica worker panicked during shutdown");
            }
        }

        if let Some(supervisor) = self.supervisor.lock().await.as_mut() {
            supervisor.shutdown().await;
        }
        info!("inference dispatcher shut down");
    }
}
