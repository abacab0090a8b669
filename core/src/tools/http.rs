//! HTTP tool-server client
//!
//! Posts the fixed-format command envelope to one tool server endpoint and
//! decodes the `{Tool_result, Environment_status}` reply. Decode failures
//! surface as errors so the invoker's retry policy applies to malformed
//! responses exactly as it does to transport failures.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{ProbeError, Result};
use crate::tools::{ToolResponse, ToolServer};

/// Client for one tool collaborator reachable over HTTP
pub struct HttpToolServer {
    client: reqwest::Client,
    name: String,
    endpoint: String,
}

impl HttpToolServer {
    /// `name` is the `server` field commands address this collaborator by;
    /// `endpoint` is the URL the command envelope is posted to.
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        HttpToolServer {
            client: reqwest::Client::new(),
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ToolServer for HttpToolServer {
    async fn call(&self, tool: &str, params: &Value) -> Result<ToolResponse> {
        let envelope = json!({
            "server": self.name,
            "tool": tool,
            "tool_params": params,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&envelope)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProbeError::Http(format!(
                "{} returned {}: {}",
                self.endpoint, status, detail
            )));
        }

        // A non-decodable body is an invocation failure, not a success.
        let body = response.text().await?;
        let parsed: ToolResponse = serde_json::from_str(&body)?;
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let envelope = json!({
            "server": "bank",
            "tool": "transfer",
            "tool_params": {"amount": 10},
        });
        assert_eq!(envelope["server"], "bank");
        assert_eq!(envelope["tool_params"]["amount"], 10);
    }
}
