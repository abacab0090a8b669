//! Risk classification seam
//!
//! The "environment" collaborator turns a tool result's opaque
//! `Environment_status` into a risk label. The harness consumes labels; it
//! never computes them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque classification value produced by the environment collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiskLabel(pub String);

impl RiskLabel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// External classifier collaborator
pub trait RiskClassifier: Send + Sync {
    /// Classify one executed tool call from its environment status
    fn classify(&self, environment_status: &Value) -> RiskLabel;
}

/// Classifier that records the environment status verbatim.
///
/// Default wiring for dry runs and tests; real batches plug the external
/// environment component in behind the same trait.
#[derive(Debug, Default, Clone)]
pub struct PassthroughClassifier;

impl RiskClassifier for PassthroughClassifier {
    fn classify(&self, environment_status: &Value) -> RiskLabel {
        match environment_status {
            Value::String(s) => RiskLabel(s.clone()),
            other => RiskLabel(other.to_string()),
        }
    }
}
