//! Tool collaborators
//!
//! External tool servers are untrusted collaborators behind a fixed wire
//! contract; this module owns the trait seam, the name registry, the HTTP
//! client and the retrying invoker. The servers' behavior is out of scope.

pub mod http;
pub mod invoker;

pub use http::HttpToolServer;
pub use invoker::ToolInvoker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;

/// Successful reply from a tool collaborator.
///
/// Wire contract: `{"Tool_result": any, "Environment_status": any}`. Both
/// keys are required; anything else is an invocation failure and subject
/// to the invoker's retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(rename = "Tool_result")]
    pub result: Value,
    #[serde(rename = "Environment_status")]
    pub environment_status: Value,
}

/// One external tool service exposing named callable operations
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Invoke `tool` with `params` and return the raw collaborator reply
    async fn call(&self, tool: &str, params: &Value) -> Result<ToolResponse>;
}

/// Known tool servers, keyed by the `server` field of a command
#[derive(Default, Clone)]
pub struct ToolRegistry {
    servers: BTreeMap<String, Arc<dyn ToolServer>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server under `name`, replacing any previous entry
    pub fn register(&mut self, name: impl Into<String>, server: Arc<dyn ToolServer>) {
        self.servers.insert(name.into(), server);
    }

    /// Look up a server; `None` means the command naming it is invalid
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolServer>> {
        self.servers.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
