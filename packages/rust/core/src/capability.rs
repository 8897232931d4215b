//! The generative capability port.
//!
//! A stage hands the capability a [`StageRequest`] and gets raw text back.
//! Everything about prompting, transport and model choice lives behind the
//! trait; the executor only validates what comes back.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use styleguide_shared::Result;

use crate::contract::OutputField;

/// Keyed JSON values flowing between stages.
pub type Payload = BTreeMap<String, serde_json::Value>;

/// One invocation of a generative stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageRequest {
    /// Stage name (e.g. `schema_inference`).
    pub stage: String,
    /// What the stage is expected to do.
    pub description: String,
    /// Required inputs plus whichever optional inputs were present.
    pub input: Payload,
    /// Fields the response must contain.
    pub output_schema: Vec<OutputField>,
}

impl StageRequest {
    /// Names of the output keys, in declaration order.
    pub fn output_keys(&self) -> Vec<&str> {
        self.output_schema.iter().map(|f| f.name.as_str()).collect()
    }
}

/// An opaque text-producing backend.
#[async_trait]
pub trait GenerativeCapability: Send + Sync {
    /// Run one stage and return the raw response text.
    async fn invoke(&self, request: &StageRequest) -> Result<String>;

    /// Short backend name for logs.
    fn name(&self) -> &str;
}
