//! Supervised-endpoint generator
//!
//! Wraps one OpenAI-compatible `/v1/chat/completions` endpoint served by
//! the supervised inference process. The dispatcher runs exactly one of
//! these behind the shared server queue; `generate` is called from that
//! worker thread and bridges onto the async HTTP client via a captured
//! runtime handle.

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::error::{ProbeError, Result};
use crate::llm::chat::ChatMessage;
use crate::llm::Generator;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Generator backed by a supervised inference-server endpoint
pub struct EndpointGenerator {
    client: reqwest::Client,
    runtime: Handle,
    url: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl EndpointGenerator {
    /// Build a generator for `http://host:port`.
    ///
    /// `runtime` must belong to a runtime that outlives the dispatcher;
    /// the worker thread blocks on it for each request.
    pub fn new(runtime: Handle, host: &str, port: u16, model: impl Into<String>) -> Self {
        EndpointGenerator {
            client: reqwest::Client::new(),
            runtime,
            url: format!("http://{}:{}/v1/chat/completions", host, port),
            model: model.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    /// Cap the completion length
    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    /// Set the sampling temperature
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp.clamp(0.0, 2.0));
        self
    }

    async fn request(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProbeError::Http(format!(
                "{} returned {}: {}",
                self.url, status, detail
            )));
        }

        let parsed: CompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProbeError::Generation {
                message: "endpoint returned no choices".to_string(),
            })
    }
}

impl Generator for EndpointGenerator {
    fn generate(&mut self, messages: &[ChatMessage]) -> Result<String> {
        // Runs on a dedicated worker thread, never on a runtime thread.
        self.runtime.block_on(self.request(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let messages = vec![ChatMessage::system("s"), ChatMessage::user("q")];
        let body = CompletionRequest {
            model: "probe-7b",
            messages: &messages,
            max_tokens: Some(256),
            temperature: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "probe-7b");
        assert_eq!(json["messages"].as_array().unwrap().len(), 2);
        assert_eq!(json["max_tokens"], 256);
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"hi"}}]}"#;
        let parsed: CompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "hi");
    }
}
