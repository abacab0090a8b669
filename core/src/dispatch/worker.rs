//! Replica worker plumbing
//!
//! One worker per replica: a dedicated OS thread consuming a private FIFO
//! queue, owning the only handle that ever generates on its replica.
//! Failures are published through the request's reply channel instead of
//! crossing the thread boundary.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::Result;
use crate::llm::{ChatMessage, Generator};

/// Reply payload: generated text, or the error description captured in the
/// worker and re-raised by the requesting context.
pub(crate) type ReplyPayload = std::result::Result<String, String>;

/// One generation request, owned by the enqueuing caller until handed to a
/// worker, then exclusively by that worker until the reply is published.
pub(crate) struct InferenceRequest {
    pub messages: Vec<ChatMessage>,
    pub reply: oneshot::Sender<ReplyPayload>,
}

/// Queue items consumed by a replica worker
pub(crate) enum WorkItem {
    Request(InferenceRequest),
    /// Sentinel: drain nothing further and exit the worker loop
    Shutdown,
}

/// Routing handle for one replica: queue sender and live depth
pub(crate) struct ReplicaSlot {
    pub tx: mpsc::UnboundedSender<WorkItem>,
    pub depth: Arc<AtomicUsize>,
}

/// Spawn the dedicated worker thread for one replica; the worker takes
/// exclusive ownership of the generator for its lifetime.
pub(crate) fn spawn_replica_worker(
    index: usize,
    mut generator: Box<dyn Generator>,
) -> Result<(ReplicaSlot, JoinHandle<()>)> {
    let (tx, mut rx) = mpsc::unbounded_channel::<WorkItem>();
    let depth = Arc::new(AtomicUsize::new(0));

    let worker_depth = Arc::clone(&depth);
    let handle = std::thread::Builder::new()
        .name(format!("replica-{}", index))
        .spawn(move || {
            while let Some(item) = rx.blocking_recv() {
                let request = match item {
                    WorkItem::Shutdown => break,
                    WorkItem::Request(request) => request,
                };
                worker_depth.fetch_sub(1, Ordering::SeqCst);

                let outcome = generator.generate(&request.messages);
                if let Err(e) = &outcome {
                    debug!(replica = index, "generation failed: {}", e);
                }

                // The caller may have given up; a dropped receiver is fine.
                let _ = request.reply.send(outcome.map_err(|e| e.to_string()));
            }
            debug!(replica = index, "worker exiting");
        })?;

    Ok((ReplicaSlot { tx, depth }, handle))
}

/// Index of the least-loaded queue: smallest depth, ties broken toward the
/// lowest index. Best-effort only; a concurrent enqueue can invalidate the
/// reading before it is used.
pub(crate) fn least_loaded_index(depths: &[usize]) -> usize {
    let mut best = 0;
    for (i, &d) in depths.iter().enumerate() {
        if d < depths[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubGenerator;

    #[test]
    fn test_least_loaded_picks_first_minimum() {
        assert_eq!(least_loaded_index(&[3, 1, 4, 1]), 1);
        assert_eq!(least_loaded_index(&[0]), 0);
        assert_eq!(least_loaded_index(&[2, 2, 2]), 0);
        assert_eq!(least_loaded_index(&[5, 4, 3]), 2);
    }

    #[tokio::test]
    async fn test_worker_serves_fifo_and_exits_on_sentinel() {
        let (slot, handle) = spawn_replica_worker(0, Box::new(StubGenerator::new())).unwrap();

        let mut replies = Vec::new();
        for text in ["a", "b", "c"] {
            let (reply_tx, reply_rx) = oneshot::channel();
            slot.depth.fetch_add(1, Ordering::SeqCst);
            slot.tx
                .send(WorkItem::Request(InferenceRequest {
                    messages: vec![ChatMessage::user(text)],
                    reply: reply_tx,
                }))
                .unwrap();
            replies.push(reply_rx);
        }

        for (rx, expected) in replies.into_iter().zip(["a", "b", "c"]) {
            let payload = rx.await.unwrap().unwrap();
            assert_eq!(payload, format!("echo: {}", expected));
        }
        assert_eq!(slot.depth.load(Ordering::SeqCst), 0);

        slot.tx.send(WorkItem::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_generation_error_travels_as_payload() {
        let (slot, handle) =
            spawn_replica_worker(0, Box::new(StubGenerator::failing("cuda oom"))).unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        slot.depth.fetch_add(1, Ordering::SeqCst);
        slot.tx
            .send(WorkItem::Request(InferenceRequest {
                messages: vec![ChatMessage::user("q")],
                reply: reply_tx,
            }))
            .unwrap();

        let payload = reply_rx.await.unwrap();
        let message = payload.unwrap_err();
        assert!(message.contains("cuda oom"));

        // Worker survived the failure and still honors the sentinel.
        slot.tx.send(WorkItem::Shutdown).unwrap();
        handle.join().unwrap();
    }
}
