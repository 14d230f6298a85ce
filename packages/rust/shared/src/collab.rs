//! Collaborator contracts consumed by the pipeline.
//!
//! The pipeline holds these as `Arc<dyn Trait>` so implementations can be
//! swapped for HTTP adapters in production and in-memory fakes in tests.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatContext, Source};

/// External web search.
///
/// Failures are recovered by the caller and treated as zero results.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one query, returning sources in the provider's own order.
    async fn search(&self, query: &str) -> Result<Vec<Source>>;

    /// Human-readable provider name for tracing.
    fn name(&self) -> &str;
}

/// Campaign-finance profile lookup, consulted only for donor and funding questions.
///
/// `Ok(None)` means the query names nobody the provider can look up.
#[async_trait]
pub trait FinanceProvider: Send + Sync {
    async fn lookup(&self, query: &str) -> Result<Option<Source>>;

    fn name(&self) -> &str;
}

/// Pulls citable sources out of the conversation so far. Best-effort, never fails.
#[async_trait]
pub trait ContextExtractor: Send + Sync {
    async fn extract(&self, context: &ChatContext) -> Vec<Source>;
}

/// The system and user messages sent to the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

/// Opaque text-completion service.
///
/// Failures are fatal to the execution that issued the call.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, prompt: &PromptPair) -> Result<String>;

    /// Model identifier for tracing and reports.
    fn model(&self) -> &str;
}
