//! Retrying tool invoker
//!
//! Tool collaborators are flaky by assumption. Every call gets a fixed
//! budget of attempts with exponential backoff between them; the final
//! attempt's failure is propagated instead of swallowed. The delay is a
//! timer suspension, so concurrent sessions keep making progress while one
//! of them backs off.

use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::error::{ProbeError, Result};
use crate::tools::{ToolResponse, ToolServer};

/// Fixed attempt budget per invocation
pub const MAX_CALL_RETRY: u32 = 10;

/// Backoff base: the delay before attempt `i+1` is `BASE_BACKOFF * 2^(i-1)`
pub const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Retrying caller for one external tool collaborator
#[derive(Debug, Clone)]
pub struct ToolInvoker {
    max_attempts: u32,
    base_backoff: Duration,
}

impl ToolInvoker {
    pub fn new() -> Self {
        ToolInvoker {
            max_attempts: MAX_CALL_RETRY,
            base_backoff: BASE_BACKOFF,
        }
    }

    /// Override the budget and base delay (tests, aggressive profiles)
    pub fn with_policy(max_attempts: u32, base_backoff: Duration) -> Self {
        ToolInvoker {
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    /// Invoke `tool` on `server`, retrying until the budget is exhausted.
    ///
    /// Fails with [`ProbeError::ToolInvocation`] only after the final
    /// attempt; any earlier failure sleeps `base * 2^(attempt-1)` and
    /// retries.
    pub async fn call(
        &self,
        server_name: &str,
        server: &dyn ToolServer,
        tool: &str,
        params: &Value,
    ) -> Result<ToolResponse> {
        for attempt in 1..=self.max_attempts {
            match server.call(tool, params).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        server = server_name,
                        tool,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "tool call failed, backing off: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(ProbeError::ToolInvocation {
                        server: server_name.to_string(),
                        tool: tool.to_string(),
                        attempts: self.max_attempts,
                        cause: e.to_string(),
                    });
                }
            }
        }
        unreachable!("attempt budget is at least 1")
    }

    /// Delay after the `attempt`-th failure (1-indexed)
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(1 << (attempt - 1))
    }
}

impl Default for ToolInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolServer;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    /// Fails the first `fail_first` calls, then succeeds
    struct FlakyServer {
        fail_first: u32,
        calls: AtomicU32,
    }

    impl FlakyServer {
        fn new(fail_first: u32) -> Self {
            FlakyServer {
                fail_first,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ToolServer for FlakyServer {
        async fn call(&self, _tool: &str, _params: &Value) -> crate::error::Result<ToolResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(ProbeError::Http(format!("transient failure {}", n)));
            }
            Ok(ToolResponse {
                result: json!({"attempt": n}),
                environment_status: json!("benign"),
            })
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let invoker = ToolInvoker::new();
        assert_eq!(invoker.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(invoker.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(invoker.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_after_cumulative_backoff() {
        let server = FlakyServer::new(2);
        let invoker = ToolInvoker::new();

        let started = Instant::now();
        let response = invoker
            .call("s", &server, "t", &json!({}))
            .await
            .expect("third attempt succeeds");

        // Two failures back off 1s + 2s before the successful attempt.
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(response.result["attempt"], 3);
        assert_eq!(server.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_exact_budget_then_propagates() {
        let server = FlakyServer::new(u32::MAX);
        let invoker = ToolInvoker::new();

        let err = invoker.call("bank", &server, "transfer", &json!({})).await;
        assert_eq!(server.calls.load(Ordering::SeqCst), MAX_CALL_RETRY);
        match err {
            Err(ProbeError::ToolInvocation {
                server,
                tool,
                attempts,
                ..
            }) => {
                assert_eq!(server, "bank");
                assert_eq!(tool, "transfer");
                assert_eq!(attempts, MAX_CALL_RETRY);
            }
            other => panic!("expected ToolInvocation error, got {:?}", other),
        }
    }
}
