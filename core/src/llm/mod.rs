//! LLM surface of the harness
//!
//! Chat message types plus the `Generator` seam the dispatcher routes
//! requests through. A generator is one exclusive model handle; the pool
//! backend loads one per replica via `ModelLoader`, the server backend
//! wraps a single HTTP endpoint.

pub mod chat;
pub mod endpoint;
pub mod stub;

pub use chat::{ChatMessage, MessageRole};
pub use endpoint::EndpointGenerator;
pub use stub::StubGenerator;

use crate::error::Result;

/// One exclusive generation handle.
///
/// `generate` runs on a dedicated worker thread and may block; the replica
/// mutex around the handle guarantees no two generations run concurrently
/// on one replica.
pub trait Generator: Send {
    /// Produce the next assistant reply for the given conversation
    fn generate(&mut self, messages: &[ChatMessage]) -> Result<String>;
}

/// Loader for the in-process replica pool.
///
/// Called once per replica index at dispatcher startup; each returned
/// generator is owned by exactly one worker for the process lifetime.
pub trait ModelLoader: Send + Sync {
    fn load(&self, replica: usize) -> Result<Box<dyn Generator>>;
}

impl<F> ModelLoader for F
where
    F: Fn(usize) -> Result<Box<dyn Generator>> + Send + Sync,
{
    fn load(&self, replica: usize) -> Result<Box<dyn Generator>> {
        self(replica)
    }
}
