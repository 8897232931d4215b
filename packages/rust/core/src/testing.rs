//! Scripted capability and fixtures for orchestration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use styleguide_shared::{Result, ScopeKey, StyleGuideError};

use crate::capability::{GenerativeCapability, StageRequest};
use crate::knowledge::InMemoryKnowledge;

/// One scripted response.
pub(crate) enum Reply {
    Text(String),
    Error(StyleGuideError),
    /// Never answers; trips the stage timeout.
    Hang,
}

impl Reply {
    pub(crate) fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub(crate) fn json(v: serde_json::Value) -> Self {
        Self::Text(v.to_string())
    }
}

/// Replies are keyed by `stage` or `stage:field`. Queued replies are used
/// first, then the fallback text with `{field}` substituted.
#[derive(Default)]
pub(crate) struct ScriptedCapability {
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    fallback: HashMap<String, String>,
    seen: Mutex<Vec<StageRequest>>,
}

impl ScriptedCapability {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot reply.
    pub(crate) fn reply(self, key: &str, reply: Reply) -> Self {
        self.queued
            .lock()
            .expect("script lock")
            .entry(key.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Set the reply used once the queue for `key` is drained.
    pub(crate) fn fallback(mut self, key: &str, value: serde_json::Value) -> Self {
        self.fallback.insert(key.to_string(), value.to_string());
        self
    }

    /// Deterministic replies for every standard stage.
    pub(crate) fn fashion() -> Self {
        Self::new()
            .fallback(
                "knowledge_retrieval",
                json!({
                    "baseline_rules_summary": "Lead with brand then silhouette.",
                    "legal_guidelines_summary": "Never reproduce brand logos without permission."
                }),
            )
            .fallback(
                "domain_breakdown",
                json!({"category_insights": ["seasonal collections", "size inclusivity"]}),
            )
            .fallback(
                "product_type_analysis",
                json!({
                    "product_type_analysis": "Dresses sell on fit, fabric and occasion.",
                    "field_guidelines": ["title under 80 chars", "longDesc covers fabric care"]
                }),
            )
            .fallback(
                "schema_inference",
                json!({
                    "final_schema": "title, shortDesc, longDesc",
                    "fields": ["title", "shortDesc", {"field": "longDesc"}, "title"]
                }),
            )
            .fallback(
                "construction",
                json!({"draft_style_guide": "Draft guide for {field}"}),
            )
            .fallback(
                "legal_review",
                json!({"verdict": "approved", "legal_issues_found": []}),
            )
            .fallback(
                "final_refinement",
                json!({"final_style_guide": "Final guide for {field}", "notes": []}),
            )
    }

    /// Requests received for `stage`, in arrival order.
    pub(crate) fn requests(&self, stage: &str) -> Vec<StageRequest> {
        self.seen
            .lock()
            .expect("seen lock")
            .iter()
            .filter(|r| r.stage == stage)
            .cloned()
            .collect()
    }

    pub(crate) fn calls(&self, stage: &str) -> usize {
        self.requests(stage).len()
    }

    /// Calls for `stage` made on behalf of `field`.
    pub(crate) fn field_calls(&self, stage: &str, field: &str) -> usize {
        self.requests(stage)
            .iter()
            .filter(|r| r.input.get("field").and_then(|v| v.as_str()) == Some(field))
            .count()
    }

    fn next_reply(&self, request: &StageRequest) -> Reply {
        let field = request
            .input
            .get("field")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let specific = field.as_ref().map(|f| format!("{}:{f}", request.stage));
        let keys: Vec<&str> = specific
            .as_deref()
            .into_iter()
            .chain(std::iter::once(request.stage.as_str()))
            .collect();

        {
            let mut queued = self.queued.lock().expect("script lock");
            for key in &keys {
                if let Some(reply) = queued.get_mut(*key).and_then(VecDeque::pop_front) {
                    return reply;
                }
            }
        }

        for key in &keys {
            if let Some(text) = self.fallback.get(*key) {
                let text = match &field {
                    Some(f) => text.replace("{field}", f),
                    None => text.clone(),
                };
                return Reply::Text(text);
            }
        }

        Reply::Error(StyleGuideError::Capability(format!(
            "no scripted reply for stage '{}'",
            request.stage
        )))
    }
}

#[async_trait]
impl GenerativeCapability for ScriptedCapability {
    async fn invoke(&self, request: &StageRequest) -> Result<String> {
        self.seen
            .lock()
            .expect("seen lock")
            .push(request.clone());

        match self.next_reply(request) {
            Reply::Text(text) => Ok(text),
            Reply::Error(e) => Err(e),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(StyleGuideError::Capability("hung reply woke up".into()))
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Knowledge for the Fashion / Women's Dress scenario.
pub(crate) fn fashion_knowledge() -> InMemoryKnowledge {
    let exact = |s: &str| ScopeKey::Exact(s.to_string());
    let mut store = InMemoryKnowledge::default();
    store.add_baseline(
        exact("Fashion"),
        exact("Women's Dress"),
        "Dress titles lead with brand, then silhouette, then color.",
    );
    store.add_baseline(exact("Fashion"), ScopeKey::Wildcard, "Fashion copy uses title case.");
    store.add_baseline(
        ScopeKey::Wildcard,
        ScopeKey::Wildcard,
        "Never exceed 200 characters in a title.",
    );
    store.add_legal(
        exact("Fashion"),
        "Do not reproduce brand logos or trademarks without written permission.",
    );
    store.add_legal(ScopeKey::Wildcard, "Avoid unverifiable claims such as 'best ever'.");
    store
}
