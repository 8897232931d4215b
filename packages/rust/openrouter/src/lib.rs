//! OpenRouter chat-completions backend for [`GenerativeCapability`].
//!
//! Each stage becomes one chat request: a system message naming the stage
//! and the JSON keys it must return, and a user message carrying the input
//! payload as JSON.

use std::fmt::Write;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use url::Url;

use styleguide_core::{FieldKind, GenerativeCapability, StageRequest};
use styleguide_shared::{AppConfig, Result, StyleGuideError};

/// Connection settings for [`OpenRouterCapability`].
#[derive(Debug, Clone)]
pub struct OpenRouterSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: Url,
    pub temperature: f32,
    /// HTTP client timeout.
    pub timeout: Duration,
}

impl OpenRouterSettings {
    /// Settings from the `[openrouter]` config section.
    pub fn from_config(config: &AppConfig, api_key: String) -> Result<Self> {
        let base_url = Url::parse(&config.openrouter.base_url).map_err(|e| {
            StyleGuideError::config(format!(
                "invalid openrouter.base_url '{}': {e}",
                config.openrouter.base_url
            ))
        })?;
        Ok(Self {
            api_key,
            model: config.openrouter.default_model.clone(),
            base_url,
            temperature: config.openrouter.temperature,
            timeout: Duration::from_secs(config.pipeline.stage_timeout_secs),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// Calls OpenRouter's `/chat/completions` endpoint.
pub struct OpenRouterCapability {
    client: reqwest::Client,
    settings: OpenRouterSettings,
    endpoint: String,
}

impl OpenRouterCapability {
    pub fn new(settings: OpenRouterSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("StyleGuide/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()
            .map_err(|e| StyleGuideError::Capability(format!("client build: {e}")))?;

        let endpoint = format!(
            "{}/chat/completions",
            settings.base_url.as_str().trim_end_matches('/')
        );

        Ok(Self {
            client,
            settings,
            endpoint,
        })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }
}

#[async_trait]
impl GenerativeCapability for OpenRouterCapability {
    #[instrument(skip_all, fields(stage = %request.stage, model = %self.settings.model))]
    async fn invoke(&self, request: &StageRequest) -> Result<String> {
        let user = serde_json::to_string_pretty(&request.input)
            .map_err(|e| StyleGuideError::Capability(format!("encode input: {e}")))?;

        let body = ChatRequest {
            model: &self.settings.model,
            temperature: self.settings.temperature,
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: Some(system_prompt(request)),
                },
                ChatMessage {
                    role: "user".into(),
                    content: Some(user),
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        debug!(endpoint = %self.endpoint, "sending chat completion");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.settings.api_key)
            .header("X-Title", "styleguide")
            .json(&body)
            .send()
            .await
            .map_err(|e| StyleGuideError::Capability(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(StyleGuideError::config(format!(
                "OpenRouter rejected the API key (HTTP {status})"
            )));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(StyleGuideError::Capability(format!(
                "OpenRouter returned HTTP {status}: {}",
                truncate(&detail, 300)
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| StyleGuideError::Capability(format!("invalid response body: {e}")))?;

        if let Some(usage) = &parsed.usage {
            info!(
                model = parsed.model.as_deref().unwrap_or(&self.settings.model),
                tokens_in = usage.prompt_tokens,
                tokens_out = usage.completion_tokens,
                "chat completion"
            );
        }

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| StyleGuideError::Capability("response contained no content".into()))
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}

/// The system message for one stage.
fn system_prompt(request: &StageRequest) -> String {
    let mut prompt = format!(
        "You are the `{}` stage of a product listing style guide pipeline.\n{}\n\n\
         The user message is a JSON object with your inputs. Respond with one JSON object \
         and nothing else, using exactly these keys:\n",
        request.stage, request.description
    );
    for field in &request.output_schema {
        let kind = match field.kind {
            FieldKind::Text => "string",
            FieldKind::List => "array",
        };
        let presence = if field.required { "required" } else { "optional" };
        let _ = write!(prompt, "- \"{}\": {kind}, {presence}", field.name);
        if field.non_empty {
            prompt.push_str(", at least one item");
        }
        prompt.push('\n');
    }
    prompt
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use styleguide_core::{OutputField, Payload};

    fn request() -> StageRequest {
        let mut input = Payload::new();
        input.insert("product_type_analysis".into(), json!("Dresses sell on fit."));
        StageRequest {
            stage: "schema_inference".into(),
            description: "Decide the output schema.".into(),
            input,
            output_schema: vec![
                OutputField::text("final_schema"),
                OutputField::list("fields").non_empty(),
                OutputField::list("notes").optional(),
            ],
        }
    }

    fn capability(server: &wiremock::MockServer) -> OpenRouterCapability {
        let base_url = Url::parse(&format!("{}/api/v1", server.uri())).unwrap();
        OpenRouterCapability::new(OpenRouterSettings {
            api_key: "test-key".into(),
            model: "openai/gpt-4o".into(),
            base_url,
            temperature: 0.2,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn system_prompt_lists_output_keys() {
        let prompt = system_prompt(&request());
        assert!(prompt.contains("`schema_inference`"));
        assert!(prompt.contains("- \"final_schema\": string, required"));
        assert!(prompt.contains("- \"fields\": array, required, at least one item"));
        assert!(prompt.contains("- \"notes\": array, optional"));
    }

    #[test]
    fn settings_from_default_config() {
        let settings = OpenRouterSettings::from_config(&AppConfig::default(), "k".into())
            .unwrap()
            .with_model("anthropic/claude-sonnet-4");
        assert_eq!(settings.base_url.as_str(), "https://openrouter.ai/api/v1");
        assert_eq!(settings.model, "anthropic/claude-sonnet-4");
        assert_eq!(settings.timeout, Duration::from_secs(120));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/api/v1/chat/completions"))
            .and(wiremock::matchers::header("authorization", "Bearer test-key"))
            .and(wiremock::matchers::body_partial_json(json!({
                "model": "openai/gpt-4o",
                "response_format": {"type": "json_object"}
            })))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(json!({
                "model": "openai/gpt-4o",
                "choices": [{"message": {"role": "assistant", "content": "{\"fields\": [\"title\"]}"}}],
                "usage": {"prompt_tokens": 120, "completion_tokens": 12}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = capability(&server).invoke(&request()).await.unwrap();
        assert_eq!(text, "{\"fields\": [\"title\"]}");
    }

    #[tokio::test]
    async fn user_message_carries_input_payload() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "{}"}}]
            })))
            .mount(&server)
            .await;

        capability(&server).invoke(&request()).await.unwrap();

        let received = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("Dresses sell on fit."));
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[tokio::test]
    async fn server_error_is_non_fatal_capability_error() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = capability(&server).invoke(&request()).await.unwrap_err();
        assert!(matches!(err, StyleGuideError::Capability(_)));
        assert!(err.to_string().contains("503"));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn rejected_key_is_fatal() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = capability(&server).invoke(&request()).await.unwrap_err();
        assert!(matches!(err, StyleGuideError::Config { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn empty_choices_are_an_error() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_json(json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let err = capability(&server).invoke(&request()).await.unwrap_err();
        assert!(err.to_string().contains("no content"));
    }
}
