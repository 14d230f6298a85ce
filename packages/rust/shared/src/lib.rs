//! Shared types, error model, configuration, and collaborator traits for Sourcebound.
//!
//! This crate is the foundation depended on by all other Sourcebound crates.
//! It provides:
//! - [`SourceboundError`]: the unified error type
//! - Domain types ([`Source`], [`SourceSet`], [`CitationIndex`], [`ChatContext`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)
//! - Collaborator traits ([`SearchProvider`], [`ContextExtractor`], [`FinanceProvider`],
//!   [`Generator`])

pub mod collab;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use collab::{ContextExtractor, FinanceProvider, Generator, PromptPair, SearchProvider};
pub use config::{
    AppConfig, LlmConfig, LlmSection, PipelineConfig, PipelineSection, SearchConfig,
    SearchSection, TimeoutsSection, config_dir, config_file_path, init_config, load_config,
    load_config_from, validate_api_key,
};
pub use error::{Result, SourceboundError};
pub use types::{
    ChatContext, ChatType, CitationIndex, ExecutionId, OfficialData, Role, Source, SourceSet,
    Turn,
};
