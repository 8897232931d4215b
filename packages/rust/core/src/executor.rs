//! Runs one stage: contract check, capability call under timeout, output
//! validation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, instrument, warn};

use styleguide_shared::{Result, StyleGuideError};

use crate::capability::{GenerativeCapability, Payload, StageRequest};
use crate::contract::StageContract;

/// Outcome of a single stage invocation.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage: String,
    /// Validated output fields. Empty when `success` is false.
    pub output: Payload,
    /// Raw response text, if the capability produced any.
    pub raw: String,
    pub success: bool,
    pub reason: Option<String>,
    pub elapsed: Duration,
}

impl StageResult {
    fn failed(stage: &str, raw: String, reason: String, elapsed: Duration) -> Self {
        Self {
            stage: stage.to_string(),
            output: Payload::new(),
            raw,
            success: false,
            reason: Some(reason),
            elapsed,
        }
    }

    /// A text output field, if present.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.output.get(key).and_then(Value::as_str)
    }

    /// A list output field, or an empty slice.
    pub fn list(&self, key: &str) -> &[Value] {
        self.output
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Failure reason, or a placeholder for successful results.
    pub fn reason_or_default(&self) -> &str {
        self.reason.as_deref().unwrap_or("unknown failure")
    }
}

/// Executes stages against one generative capability.
pub struct StageExecutor {
    capability: Arc<dyn GenerativeCapability>,
    stage_timeout: Duration,
}

impl StageExecutor {
    pub fn new(capability: Arc<dyn GenerativeCapability>, stage_timeout: Duration) -> Self {
        Self {
            capability,
            stage_timeout,
        }
    }

    /// Run `contract` with `input`.
    ///
    /// Only a missing required input or a fatal capability error is an
    /// `Err`. Timeouts, backend failures and malformed output come back as
    /// `success = false`.
    #[instrument(skip_all, fields(stage = %contract.name(), backend = %self.capability.name()))]
    pub async fn execute(&self, contract: &StageContract, input: &Payload) -> Result<StageResult> {
        let missing = contract.missing_inputs(input);
        if !missing.is_empty() {
            return Err(StyleGuideError::contract(
                contract.name(),
                format!("missing required input(s): {}", missing.join(", ")),
            ));
        }

        let request = StageRequest {
            stage: contract.name().to_string(),
            description: contract.description().to_string(),
            input: contract.select_inputs(input),
            output_schema: contract.outputs().to_vec(),
        };

        let start = Instant::now();
        let outcome = tokio::time::timeout(self.stage_timeout, self.capability.invoke(&request)).await;
        let elapsed = start.elapsed();

        let raw = match outcome {
            Err(_) => {
                let err = StyleGuideError::Timeout {
                    operation: format!("stage '{}'", contract.name()),
                    after: self.stage_timeout,
                };
                warn!(error = %err, "stage timed out");
                return Ok(StageResult::failed(
                    contract.name(),
                    String::new(),
                    err.to_string(),
                    elapsed,
                ));
            }
            Ok(Err(e)) if e.is_fatal() => return Err(e),
            Ok(Err(e)) => {
                warn!(error = %e, "capability call failed");
                return Ok(StageResult::failed(
                    contract.name(),
                    String::new(),
                    e.to_string(),
                    elapsed,
                ));
            }
            Ok(Ok(raw)) => raw,
        };

        match contract.parse_output(&raw) {
            Ok(output) => {
                debug!(
                    elapsed_ms = elapsed.as_millis(),
                    fields = output.len(),
                    "stage succeeded"
                );
                Ok(StageResult {
                    stage: contract.name().to_string(),
                    output,
                    raw,
                    success: true,
                    reason: None,
                    elapsed,
                })
            }
            Err(reason) => {
                warn!(%reason, raw_len = raw.len(), "malformed stage output");
                Ok(StageResult::failed(contract.name(), raw, reason, elapsed))
            }
        }
    }
}
