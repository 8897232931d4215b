//! Shared types, error model, and configuration for the style guide pipeline.
//!
//! This crate is the foundation depended on by all other workspace crates.
//! It provides:
//! - [`StyleGuideError`]: the unified error type and run failure taxonomy
//! - Domain types ([`GuidelineRecord`], [`StyleGuideDocument`], [`FinalFieldResult`], [`RecordId`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, OpenRouterConfig, PipelineConfig, PipelineSection, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{Result, StyleGuideError};
pub use types::{
    DEFAULT_FIELDS, FinalFieldResult, GuidelineKind, GuidelineRecord, GuidelineScope,
    PublishedGuideRow, RecordId, ScopeKey, StyleGuideDocument,
};
