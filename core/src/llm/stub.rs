//! Scripted stub generator
//!
//! Deterministic generator for tests and `--dry-run` batches: plays back a
//! scripted sequence of replies, then echoes. Tracks how many times it was
//! invoked so delivery guarantees can be asserted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{ProbeError, Result};
use crate::llm::chat::ChatMessage;
use crate::llm::Generator;

/// Generator that replays a fixed script of replies
pub struct StubGenerator {
    script: VecDeque<String>,
    fail_with: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl StubGenerator {
    /// Stub that echoes the last message once the script is exhausted
    pub fn new() -> Self {
        StubGenerator {
            script: VecDeque::new(),
            fail_with: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Stub that plays back `replies` in order
    pub fn scripted(replies: Vec<String>) -> Self {
        StubGenerator {
            script: replies.into(),
            fail_with: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Stub whose every generation fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        StubGenerator {
            script: VecDeque::new(),
            fail_with: Some(message.into()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared call counter, usable after the stub moves into a worker
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Default for StubGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for StubGenerator {
    fn generate(&mut self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.fail_with {
            return Err(ProbeError::Generation {
                message: message.clone(),
            });
        }

        if let Some(reply) = self.script.pop_front() {
            return Ok(reply);
        }

        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        Ok(format!("echo: {}", last))
    }
}
