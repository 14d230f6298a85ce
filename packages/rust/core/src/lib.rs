//! Citation-consistent retrieval pipeline for Sourcebound.
//!
//! This crate classifies questions, gathers and validates sources, fills gaps
//! with one bounded round of follow-up searches, renders a citation-indexed
//! prompt, and returns the generated answer paired with the exact source set
//! the generator was shown (see [`pipeline::Pipeline`]).

pub mod aggregator;
pub mod classifier;
pub mod context;
mod deadline;
pub mod dedupe;
pub mod gaps;
pub mod generator;
pub mod observe;
pub mod pipeline;
pub mod prompt;
pub mod sanitize;

pub use aggregator::{Aggregated, SourceAggregator};
pub use classifier::{Signal, classify, needs_current_info};
pub use context::ConversationContextExtractor;
pub use dedupe::{UrlPolicy, dedupe_and_validate};
pub use gaps::{GapAnalysisResult, GapConfig, analyze_count, analyze_gaps};
pub use generator::ChatCompletionsGenerator;
pub use observe::{Observability, PipelineEvent, PipelineState, SilentObserver, TracingObserver};
pub use pipeline::{Collaborators, Pipeline, PipelineReport, PipelineResult};
pub use prompt::{
    CitationPromptBuilder, fallback_message, neutralize_markers, render_context, system_prompt,
};
pub use sanitize::{SanitizedAnswer, sanitize_answer};
