//! Application configuration for the style guide pipeline.
//!
//! User config lives at `~/.styleguide/styleguide.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StyleGuideError};
use crate::types::DEFAULT_FIELDS;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "styleguide.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".styleguide";

// ---------------------------------------------------------------------------
// Config structs (matching styleguide.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Orchestration budgets and limits.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Fields requested when `--fields` is not given.
    #[serde(default = "default_fields")]
    pub fields_needed: Vec<String>,

    /// Knowledge and publication database.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            fields_needed: default_fields(),
            db_path: default_db_path(),
        }
    }
}

fn default_fields() -> Vec<String> {
    DEFAULT_FIELDS.iter().map(|f| (*f).to_string()).collect()
}
fn default_db_path() -> String {
    "~/.styleguide/styleguide.db".into()
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Maximum construction attempts per field.
    #[serde(default = "default_max_review_iterations")]
    pub max_review_iterations: u32,

    /// Extra attempts granted to each prefix stage.
    #[serde(default = "default_prefix_retries")]
    pub prefix_retries: u32,

    /// Field loops allowed to run at once.
    #[serde(default = "default_max_concurrent_fields")]
    pub max_concurrent_fields: u32,

    /// Per-call timeout for generative stages.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    /// Per-call timeout for knowledge lookups.
    #[serde(default = "default_knowledge_timeout")]
    pub knowledge_timeout_secs: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_review_iterations: default_max_review_iterations(),
            prefix_retries: default_prefix_retries(),
            max_concurrent_fields: default_max_concurrent_fields(),
            stage_timeout_secs: default_stage_timeout(),
            knowledge_timeout_secs: default_knowledge_timeout(),
        }
    }
}

fn default_max_review_iterations() -> u32 {
    3
}
fn default_prefix_retries() -> u32 {
    1
}
fn default_max_concurrent_fields() -> u32 {
    3
}
fn default_stage_timeout() -> u64 {
    120
}
fn default_knowledge_timeout() -> u64 {
    10
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Default model to use for every stage.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// API base URL (the `/chat/completions` path is appended).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "openai/gpt-4o".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_temperature() -> f32 {
    0.2
}

impl AppConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.max_review_iterations == 0 {
            return Err(StyleGuideError::config(
                "pipeline.max_review_iterations must be at least 1",
            ));
        }
        if p.max_concurrent_fields == 0 {
            return Err(StyleGuideError::config(
                "pipeline.max_concurrent_fields must be at least 1",
            ));
        }
        if p.stage_timeout_secs == 0 || p.knowledge_timeout_secs == 0 {
            return Err(StyleGuideError::config("pipeline timeouts must be non-zero"));
        }
        url::Url::parse(&self.openrouter.base_url).map_err(|e| {
            StyleGuideError::config(format!(
                "invalid openrouter.base_url '{}': {e}",
                self.openrouter.base_url
            ))
        })?;
        if self.defaults.fields_needed.iter().any(|f| f.trim().is_empty()) {
            return Err(StyleGuideError::config(
                "defaults.fields_needed must not contain empty names",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime orchestration configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Ceiling on construction attempts per field.
    pub max_review_iterations: u32,
    /// Local retry budget for each prefix stage.
    pub prefix_retries: u32,
    /// Concurrency bound for field loops.
    pub max_concurrent_fields: usize,
    /// Timeout applied to each generative call.
    pub stage_timeout: Duration,
    /// Timeout applied to each knowledge lookup.
    pub knowledge_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_review_iterations: config.pipeline.max_review_iterations,
            prefix_retries: config.pipeline.prefix_retries,
            max_concurrent_fields: config.pipeline.max_concurrent_fields as usize,
            stage_timeout: Duration::from_secs(config.pipeline.stage_timeout_secs),
            knowledge_timeout: Duration::from_secs(config.pipeline.knowledge_timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.styleguide/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| StyleGuideError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.styleguide/styleguide.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| StyleGuideError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load and validate the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| StyleGuideError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        StyleGuideError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| StyleGuideError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| StyleGuideError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| StyleGuideError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the OpenRouter API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(StyleGuideError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_review_iterations"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
        assert!(toml_str.contains("shortDesc"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.pipeline.max_review_iterations, 3);
        assert_eq!(parsed.pipeline.prefix_retries, 1);
        assert_eq!(parsed.openrouter.api_key_env, "OPENROUTER_API_KEY");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[pipeline]
max_review_iterations = 5

[defaults]
fields_needed = ["title"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.pipeline.max_review_iterations, 5);
        assert_eq!(config.pipeline.max_concurrent_fields, 3);
        assert_eq!(config.defaults.fields_needed, vec!["title".to_string()]);
        assert_eq!(config.openrouter.default_model, "openai/gpt-4o");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn pipeline_config_from_app_config() {
        let app = AppConfig::default();
        let runtime = PipelineConfig::from(&app);
        assert_eq!(runtime.max_review_iterations, 3);
        assert_eq!(runtime.max_concurrent_fields, 3);
        assert_eq!(runtime.stage_timeout, Duration::from_secs(120));
        assert_eq!(runtime.knowledge_timeout, Duration::from_secs(10));
    }

    #[test]
    fn validation_rejects_zero_budgets() {
        let mut config = AppConfig::default();
        config.pipeline.max_review_iterations = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.max_concurrent_fields = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.openrouter.base_url = "not a url".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn expand_home_leaves_plain_paths() {
        assert_eq!(
            expand_home("/tmp/guides.db").unwrap(),
            PathBuf::from("/tmp/guides.db")
        );
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.openrouter.api_key_env = "SG_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
