//! Pipeline states and the diagnostic event sink.
//!
//! Observers are fire-and-forget: `record` is synchronous, returns nothing,
//! and is never awaited on the critical path.

use std::fmt;

use serde::Serialize;
use sourcebound_shared::SourceSet;
use tracing::{debug, info, warn};

use crate::classifier::Signal;

// ---------------------------------------------------------------------------
// PipelineState
// ---------------------------------------------------------------------------

/// Phases of one pipeline execution, in the order they can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Classify,
    Aggregate,
    Validate,
    GapCheck,
    AggregateMore,
    BuildPrompt,
    Generate,
    Assemble,
    Done,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Aggregate => "aggregate",
            Self::Validate => "validate",
            Self::GapCheck => "gap_check",
            Self::AggregateMore => "aggregate_more",
            Self::BuildPrompt => "build_prompt",
            Self::Generate => "generate",
            Self::Assemble => "assemble",
            Self::Done => "done",
        }
    }

    /// Short human label for progress displays.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Classify => "Classifying question",
            Self::Aggregate => "Gathering sources",
            Self::Validate => "Validating sources",
            Self::GapCheck => "Checking coverage",
            Self::AggregateMore => "Running follow-up searches",
            Self::BuildPrompt => "Building prompt",
            Self::Generate => "Generating answer",
            Self::Assemble => "Assembling answer",
            Self::Done => "Done",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

/// A diagnostic event emitted during an execution.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Transition {
        from: PipelineState,
        to: PipelineState,
    },
    Classified {
        signals: Vec<Signal>,
    },
    SearchCompleted {
        query: String,
        results: usize,
    },
    /// A search or context call failed and was treated as zero sources.
    RetrievalFailed {
        operation: &'static str,
        error: String,
    },
    ContextExtracted {
        sources: usize,
    },
    Validated {
        candidates: usize,
        kept: usize,
    },
    GapsFound {
        follow_ups: Vec<String>,
    },
    /// Carries a handle to the exact set rendered into the prompt.
    PromptBuilt {
        sources: SourceSet,
        chars: usize,
    },
    Generated {
        chars: usize,
    },
    Sanitized {
        hallucinated: usize,
        duplicates: usize,
    },
}

/// Fire-and-forget diagnostic sink.
pub trait Observability: Send + Sync {
    fn record(&self, event: &PipelineEvent);
}

// ---------------------------------------------------------------------------
// Built-in observers
// ---------------------------------------------------------------------------

/// Forwards events to `tracing`.
pub struct TracingObserver;

impl Observability for TracingObserver {
    fn record(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Transition { from, to } => {
                debug!(%from, %to, "state transition");
            }
            PipelineEvent::Classified { signals } => {
                let signals: Vec<&str> = signals.iter().map(Signal::as_str).collect();
                info!(?signals, needs_current_info = !signals.is_empty(), "query classified");
            }
            PipelineEvent::SearchCompleted { query, results } => {
                info!(%query, results, "search completed");
            }
            PipelineEvent::RetrievalFailed { operation, error } => {
                warn!(operation, %error, "retrieval failed, continuing with fewer sources");
            }
            PipelineEvent::ContextExtracted { sources } => {
                debug!(sources, "context sources extracted");
            }
            PipelineEvent::Validated { candidates, kept } => {
                info!(candidates, kept, "sources validated");
            }
            PipelineEvent::GapsFound { follow_ups } => {
                info!(follow_ups = follow_ups.len(), "coverage gaps found");
            }
            PipelineEvent::PromptBuilt { sources, chars } => {
                info!(
                    sources = sources.len(),
                    chars,
                    fingerprint = %sources.fingerprint(),
                    "prompt built"
                );
            }
            PipelineEvent::Generated { chars } => {
                info!(chars, "answer generated");
            }
            PipelineEvent::Sanitized {
                hallucinated,
                duplicates,
            } => {
                if *hallucinated > 0 {
                    warn!(hallucinated, duplicates, "removed out-of-range citations");
                } else {
                    debug!(duplicates, "answer sanitized");
                }
            }
        }
    }
}

/// No-op observer for headless/test usage.
pub struct SilentObserver;

impl Observability for SilentObserver {
    fn record(&self, _event: &PipelineEvent) {}
}
