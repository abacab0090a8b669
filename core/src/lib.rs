//! Core of the agentprobe harness: a bounded tool-calling agent loop in
//! front of a pluggable inference backend, built to replay adversarial
//! queries against external tool servers and collect a per-call security
//! trace.
//!
//! The crate splits along its collaborator seams:
//! - [`session`] runs the bounded conversation loop per query
//! - [`dispatch`] routes generation requests across replica workers
//! - [`backend`] supervises an external inference-server process
//! - [`protocol`] recognizes tool commands in raw model text
//! - [`tools`] talks to external tool servers with retry
//! - [`risk`] is the classification seam for executed calls

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod protocol;
pub mod risk;
pub mod session;
pub mod tools;

pub use backend::{BackendState, BackendSupervisor};
pub use config::{load_config, BackendConfig, BackendPreference, HarnessConfig, ModelConfig};
pub use dispatch::{BackendKind, InferenceDispatcher};
pub use error::{ProbeError, Result};
pub use llm::{ChatMessage, Generator, MessageRole, ModelLoader, StubGenerator};
pub use protocol::ToolCommand;
pub use risk::{PassthroughClassifier, RiskClassifier, RiskLabel};
pub use session::{AgentSession, MAX_STEPS};
pub use tools::{HttpToolServer, ToolInvoker, ToolRegistry, ToolResponse, ToolServer};
