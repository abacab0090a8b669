//! Bounded agent-conversation loop
//!
//! One session serves one query at a time: ask the dispatcher for the next
//! model reply, recognize structured tool commands in it, execute them
//! against their tool collaborators, and record a risk label per executed
//! call. The loop is bounded by `MAX_STEPS` and stops early the moment a
//! reply fails to produce a well-formed command — that reply becomes the
//! final answer, which is also the anti-runaway guard.

use std::sync::Arc;
use tracing::{debug, info};

use crate::dispatch::InferenceDispatcher;
use crate::error::Result;
use crate::llm::ChatMessage;
use crate::protocol::{self, ToolCommand};
use crate::risk::{RiskClassifier, RiskLabel};
use crate::tools::{ToolInvoker, ToolRegistry, ToolServer};

/// Maximum model/tool alternations per query
pub const MAX_STEPS: usize = 6;

/// Bounded conversation loop over one dispatcher and one tool registry.
///
/// Reusable across queries: the conversation is truncated back to the
/// system turn at the start of every `process_query`, so nothing leaks
/// between queries beyond the system prompt.
pub struct AgentSession {
    dispatcher: Arc<InferenceDispatcher>,
    tools: ToolRegistry,
    invoker: ToolInvoker,
    classifier: Arc<dyn RiskClassifier>,
    system_prompt: String,
    history: Vec<ChatMessage>,
    trace: Vec<RiskLabel>,
}

impl AgentSession {
    pub fn new(
        dispatcher: Arc<InferenceDispatcher>,
        tools: ToolRegistry,
        classifier: Arc<dyn RiskClassifier>,
        system_prompt: impl Into<String>,
    ) -> Self {
        AgentSession {
            dispatcher,
            tools,
            invoker: ToolInvoker::new(),
            classifier,
            system_prompt: system_prompt.into(),
            history: Vec::new(),
            trace: Vec::new(),
        }
    }

    /// Replace the default retry policy (tests, aggressive profiles)
    pub fn with_invoker(mut self, invoker: ToolInvoker) -> Self {
        self.invoker = invoker;
        self
    }

    /// Conversation so far; partial when the last query failed mid-loop
    pub fn transcript(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Risk labels accumulated for the current/last query
    pub fn security_trace(&self) -> &[RiskLabel] {
        &self.trace
    }

    /// Run one query through the bounded loop.
    ///
    /// Returns the full transcript (`2 + 2k + 1` turns for `k` executed
    /// tool calls with no parse failure) and the per-call security trace.
    /// Tool-invocation failures propagate to the caller after the retry
    /// budget; the outer batch pipeline owns any policy beyond that.
    pub async fn process_query(
        &mut self,
        query: &str,
    ) -> Result<(Vec<ChatMessage>, Vec<RiskLabel>)> {
        self.history.clear();
        self.history.push(ChatMessage::system(self.system_prompt.clone()));
        self.history.push(ChatMessage::user(query));
        self.trace.clear();

        let mut final_answer = None;

        for step in 0..MAX_STEPS {
            let reply = self
                .dispatcher
                .generate_response(self.history.clone())
                .await?;

            let commands = match self.recognize_commands(&reply) {
                Some(commands) if !commands.is_empty() => commands,
                // Nothing executable in this reply: it is the final
                // answer, and stopping here is the anti-runaway guard.
                _ => {
                    final_answer = Some(reply);
                    break;
                }
            };

            debug!(step, commands = commands.len(), "executing tool commands");
            for (command, server) in commands {
                let response = self
                    .invoker
                    .call(
                        &command.server,
                        server.as_ref(),
                        &command.tool,
                        &command.tool_params,
                    )
                    .await?;

                // Two consecutive assistant turns per executed call: the
                // call itself, then the result with environment status.
                self.history
                    .push(ChatMessage::assistant(serde_json::to_string(&command)?));
                self.history
                    .push(ChatMessage::assistant(serde_json::to_string(&response)?));

                self.trace
                    .push(self.classifier.classify(&response.environment_status));
            }
        }

        // Step bound exhausted right after a tool-executing step leaves no
        // model text to return; synthesize an explicit final answer.
        let answer = final_answer
            .unwrap_or_else(|| format!("[step limit reached after {} steps]", MAX_STEPS));
        self.history.push(ChatMessage::assistant(answer));

        info!(
            turns = self.history.len(),
            tool_calls = self.trace.len(),
            "query complete"
        );
        Ok((self.history.clone(), self.trace.clone()))
    }

    /// Recognize and validate tool commands in a reply.
    ///
    /// `None` when the reply holds no decodable payload, or when any
    /// candidate is malformed (missing keys, non-string names, unknown
    /// server) — per contract a partially valid batch is not executed.
    fn recognize_commands(
        &self,
        reply: &str,
    ) -> Option<Vec<(ToolCommand, Arc<dyn ToolServer>)>> {
        let payload = protocol::extract_payload(reply)?;
        let candidates = protocol::command_candidates(payload);

        let mut commands = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let command = ToolCommand::from_value(candidate)?;
            let server = self.tools.get(&command.server)?;
            commands.push((command, server));
        }
        Some(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, BackendPreference, HarnessConfig, ModelConfig};
    use crate::error::ProbeError;
    use crate::llm::{Generator, MessageRole, ModelLoader, StubGenerator};
    use crate::risk::PassthroughClassifier;
    use crate::tools::ToolResponse;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct MockToolServer {
        status: Value,
        fail: bool,
        calls: AtomicU32,
    }

    impl MockToolServer {
        fn ok(status: &str) -> Self {
            MockToolServer {
                status: json!(status),
                fail: false,
                calls: AtomicU32::new(0),
            }
        }

        fn failing() -> Self {
            MockToolServer {
                status: Value::Null,
                fail: true,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ToolServer for MockToolServer {
        async fn call(&self, tool: &str, _params: &Value) -> Result<ToolResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProbeError::Http("connection refused".to_string()));
            }
            Ok(ToolResponse {
                result: json!({ "tool": tool, "ok": true }),
                environment_status: self.status.clone(),
            })
        }
    }

    fn config() -> HarnessConfig {
        HarnessConfig {
            model: ModelConfig {
                model_path: "/models/m".to_string(),
                tokenizer_path: None,
                served_name: "m".to_string(),
            },
            backend: BackendConfig {
                prefer: BackendPreference::Pool,
                replicas: 1,
                ..BackendConfig::default()
            },
            tool_servers: Default::default(),
            system_prompt: "probe".to_string(),
        }
    }

    async fn scripted_dispatcher(replies: Vec<&str>) -> Arc<InferenceDispatcher> {
        let replies: Vec<String> = replies.into_iter().map(String::from).collect();
        let loader: Arc<dyn ModelLoader> = Arc::new(move |_replica: usize| {
            Ok(Box::new(StubGenerator::scripted(replies.clone())) as Box<dyn Generator>)
        });
        Arc::new(InferenceDispatcher::new(&config(), loader).await.unwrap())
    }

    fn session_with(
        dispatcher: Arc<InferenceDispatcher>,
        servers: Vec<(&str, Arc<MockToolServer>)>,
    ) -> AgentSession {
        let mut tools = ToolRegistry::new();
        for (name, server) in servers {
            tools.register(name, server as Arc<dyn ToolServer>);
        }
        AgentSession::new(dispatcher, tools, Arc::new(PassthroughClassifier), "probe")
    }

    const CMD: &str = r#"{"server":"bank","tool":"transfer","tool_params":{"amount":5}}"#;

    #[tokio::test]
    async fn test_plain_prose_is_three_turn_transcript() {
        let dispatcher = scripted_dispatcher(vec!["The answer is 4."]).await;
        let mut session = session_with(dispatcher.clone(), vec![]);

        let (history, trace) = session.process_query("what is 2+2?").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, MessageRole::System);
        assert_eq!(history[1].content, "what is 2+2?");
        assert_eq!(history[2].content, "The answer is 4.");
        assert!(trace.is_empty());

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_one_tool_call_transcript_shape() {
        let dispatcher = scripted_dispatcher(vec![CMD, "transfer complete"]).await;
        let bank = Arc::new(MockToolServer::ok("attack_success"));
        let mut session = session_with(dispatcher.clone(), vec![("bank", bank.clone())]);

        let (history, trace) = session.process_query("move my money").await.unwrap();

        // 2 + 2k + 1 with k = 1
        assert_eq!(history.len(), 5);
        assert_eq!(bank.calls.load(Ordering::SeqCst), 1);
        assert_eq!(history[2].role, MessageRole::Assistant);
        assert!(history[2].content.contains("\"server\":\"bank\""));
        assert!(history[3].content.contains("Tool_result"));
        assert!(history[3].content.contains("Environment_status"));
        assert_eq!(history[4].content, "transfer complete");

        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].as_str(), "attack_success");

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_command_batch_executes_in_order() {
        let batch = r#"[{"server":"bank","tool":"balance","tool_params":{}},
                        {"server":"bank","tool":"transfer","tool_params":{"amount":1}}]"#;
        let dispatcher = scripted_dispatcher(vec![batch, "done"]).await;
        let bank = Arc::new(MockToolServer::ok("benign"));
        let mut session = session_with(dispatcher.clone(), vec![("bank", bank.clone())]);

        let (history, trace) = session.process_query("audit").await.unwrap();

        // 2 + 2k + 1 with k = 2
        assert_eq!(history.len(), 7);
        assert_eq!(bank.calls.load(Ordering::SeqCst), 2);
        assert!(history[2].content.contains("\"tool\":\"balance\""));
        assert!(history[4].content.contains("\"tool\":\"transfer\""));
        assert_eq!(trace.len(), 2);

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_command_becomes_final_answer() {
        let missing_params = r#"{"server":"bank","tool":"transfer"}"#;
        let dispatcher = scripted_dispatcher(vec![missing_params]).await;
        let bank = Arc::new(MockToolServer::ok("benign"));
        let mut session = session_with(dispatcher.clone(), vec![("bank", bank.clone())]);

        let (history, trace) = session.process_query("go").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].content, missing_params);
        assert!(trace.is_empty());
        assert_eq!(bank.calls.load(Ordering::SeqCst), 0);

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_server_stops_the_loop() {
        let unknown = r#"{"server":"shadow","tool":"t","tool_params":{}}"#;
        let dispatcher = scripted_dispatcher(vec![unknown]).await;
        let mut session = session_with(dispatcher.clone(), vec![]);

        let (history, trace) = session.process_query("go").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].content, unknown);
        assert!(trace.is_empty());

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_step_limit_synthesizes_final_answer() {
        // Every reply executes one tool call; the bound cuts the loop off.
        let dispatcher = scripted_dispatcher(vec![CMD; MAX_STEPS]).await;
        let bank = Arc::new(MockToolServer::ok("benign"));
        let mut session = session_with(dispatcher.clone(), vec![("bank", bank.clone())]);

        let (history, trace) = session.process_query("loop forever").await.unwrap();

        // 2 + 2k + 1 with k = MAX_STEPS
        assert_eq!(history.len(), 2 + 2 * MAX_STEPS + 1);
        assert_eq!(trace.len(), MAX_STEPS);
        assert_eq!(
            history.last().unwrap().content,
            format!("[step limit reached after {} steps]", MAX_STEPS)
        );

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_tool_failure_propagates_to_caller() {
        let dispatcher = scripted_dispatcher(vec![CMD]).await;
        let bank = Arc::new(MockToolServer::failing());
        let mut session = session_with(dispatcher.clone(), vec![("bank", bank.clone())])
            .with_invoker(ToolInvoker::with_policy(3, Duration::from_millis(1)));

        let err = session.process_query("go").await.unwrap_err();
        assert!(matches!(err, ProbeError::ToolInvocation { .. }));
        assert_eq!(bank.calls.load(Ordering::SeqCst), 3);

        // Partial transcript stays readable for the batch pipeline.
        assert_eq!(session.transcript().len(), 2);

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_leakage_between_queries() {
        let dispatcher = scripted_dispatcher(vec![CMD, "first done", "just prose"]).await;
        let bank = Arc::new(MockToolServer::ok("benign"));
        let mut session = session_with(dispatcher.clone(), vec![("bank", bank)]);

        let (first, first_trace) = session.process_query("one").await.unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(first_trace.len(), 1);

        let (second, second_trace) = session.process_query("two").await.unwrap();
        assert_eq!(second.len(), 3);
        assert_eq!(second[0].role, MessageRole::System);
        assert_eq!(second[1].content, "two");
        assert!(second_trace.is_empty());

        dispatcher.shutdown().await;
    }
}
