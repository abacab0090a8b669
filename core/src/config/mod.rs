//! Harness configuration
//!
//! YAML configuration for the orchestration core: model paths, replica
//! count, backend preference, the supervised-server launch contract and
//! the tool-server endpoint map. All of this is read-only to the core.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ProbeError, Result};

/// Default configuration file name
const CONFIG_FILE_NAME: &str = "agentprobe.yaml";

/// Default config directory name
const CONFIG_DIR_NAME: &str = "agentprobe";

/// Which generation backend the dispatcher should prefer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Externally supervised inference-server process (falls back to `Pool`)
    Server,
    /// In-process replica pool
    Pool,
}

impl Default for BackendPreference {
    fn default() -> Self {
        BackendPreference::Pool
    }
}

/// Model/tokenizer pair loaded by each replica or passed to the server process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the model weights
    pub model_path: String,
    /// Path to the tokenizer (defaults to the model path)
    #[serde(default)]
    pub tokenizer_path: Option<String>,
    /// Model name reported to an OpenAI-compatible endpoint
    #[serde(default = "default_served_name")]
    pub served_name: String,
}

impl ModelConfig {
    /// Tokenizer path, falling back to the model path
    pub fn tokenizer(&self) -> &str {
        self.tokenizer_path.as_deref().unwrap_or(&self.model_path)
    }
}

fn default_served_name() -> String {
    "agentprobe-model".to_string()
}

/// Launch and routing settings for the generation backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Preferred backend; `server` falls back to `pool` on startup failure
    #[serde(default)]
    pub prefer: BackendPreference,

    /// Number of replicas for the in-process pool
    #[serde(default = "default_replicas")]
    pub replicas: usize,

    /// Host the supervised server binds to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the supervised server binds to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Command used to launch the supervised server
    #[serde(default = "default_server_command")]
    pub server_command: String,

    /// Tensor-parallelism degree passed to the server
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Numeric precision flag (e.g. "bfloat16")
    #[serde(default = "default_dtype")]
    pub dtype: String,

    /// Batching limit: maximum tokens batched together
    #[serde(default = "default_max_batched_tokens")]
    pub max_batched_tokens: usize,

    /// Batching limit: maximum concurrent sequences
    #[serde(default = "default_max_sequences")]
    pub max_sequences: usize,

    /// Optional context-length cap forwarded to the server
    #[serde(default)]
    pub max_model_len: Option<usize>,

    /// Extra flags appended verbatim to the launch command
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Seconds to wait for the server port to accept connections
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
}

fn default_replicas() -> usize {
    1
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_server_command() -> String {
    "vllm-serve".to_string()
}

fn default_parallelism() -> usize {
    1
}

fn default_dtype() -> String {
    "bfloat16".to_string()
}

fn default_max_batched_tokens() -> usize {
    8192
}

fn default_max_sequences() -> usize {
    64
}

fn default_startup_timeout_secs() -> u64 {
    300
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            prefer: BackendPreference::default(),
            replicas: default_replicas(),
            host: default_host(),
            port: default_port(),
            server_command: default_server_command(),
            parallelism: default_parallelism(),
            dtype: default_dtype(),
            max_batched_tokens: default_max_batched_tokens(),
            max_sequences: default_max_sequences(),
            max_model_len: None,
            extra_args: Vec::new(),
            startup_timeout_secs: default_startup_timeout_secs(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Model/tokenizer settings
    pub model: ModelConfig,

    /// Backend launch and routing settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Tool server name -> base endpoint URL
    #[serde(default)]
    pub tool_servers: BTreeMap<String, String>,

    /// System prompt opening every conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_system_prompt() -> String {
    "You are a helpful assistant with access to external tools. \
     To call a tool, reply with a JSON object {\"server\": ..., \"tool\": ..., \"tool_params\": {...}}. \
     Reply with plain text when you have the final answer."
        .to_string()
}

/// Resolve the default configuration file path (`~/.config/agentprobe/agentprobe.yaml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Load configuration from an explicit path, or from the default location
pub fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path().ok_or_else(|| ProbeError::InvalidConfig {
            message: "could not determine a configuration directory".to_string(),
        })?,
    };

    let raw = fs::read_to_string(&path).map_err(|e| ProbeError::InvalidConfig {
        message: format!("cannot read {}: {}", path.display(), e),
    })?;

    serde_yml::from_str(&raw).map_err(|e| ProbeError::InvalidConfig {
        message: format!("cannot parse {}: {}", path.display(), e),
    })
}
