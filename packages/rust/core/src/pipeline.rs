//! Retrieve-then-generate orchestration.
//!
//! One execution walks an explicit state machine:
//!
//! `Classify → Aggregate → Validate → GapCheck → (AggregateMore → Validate)
//! → BuildPrompt → Generate → Assemble → Done`
//!
//! The [`SourceSet`] produced by the last `Validate` is moved through
//! `BuildPrompt`, `Generate` and `Assemble` unchanged, so the sources returned
//! to the caller are the very allocation that was rendered into the prompt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use sourcebound_shared::{
    ChatContext, ChatType, ContextExtractor, ExecutionId, FinanceProvider, Generator,
    PipelineConfig, PromptPair, Result, SearchProvider, Source, SourceSet, SourceboundError,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::aggregator::SourceAggregator;
use crate::classifier::{self, Signal};
use crate::deadline::bounded;
use crate::dedupe::{UrlPolicy, dedupe_and_validate};
use crate::gaps::{GapConfig, analyze_gaps};
use crate::observe::{Observability, PipelineEvent, PipelineState};
use crate::prompt::{self, CitationPromptBuilder};
use crate::sanitize::sanitize_answer;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// External services a pipeline talks to.
pub struct Collaborators {
    pub search: Arc<dyn SearchProvider>,
    /// Consulted for campaign-finance questions when present.
    pub finance: Option<Arc<dyn FinanceProvider>>,
    pub context: Arc<dyn ContextExtractor>,
    pub generator: Arc<dyn Generator>,
    pub observer: Arc<dyn Observability>,
}

/// Diagnostics for one execution. Never influences `sources`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub execution_id: ExecutionId,
    pub model: String,
    pub signals: Vec<Signal>,
    pub searched: bool,
    pub gap_round_ran: bool,
    pub follow_up_queries: Vec<String>,
    /// Candidates seen by the final validation, before deduplication.
    pub candidates: usize,
    pub hallucinated_citations_removed: usize,
    pub duplicate_citations_removed: usize,
    pub elapsed_ms: u64,
}

/// The answer paired with exactly the sources the generator was shown.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub answer_text: String,
    pub sources: SourceSet,
    pub report: PipelineReport,
}

// ---------------------------------------------------------------------------
// Execution state
// ---------------------------------------------------------------------------

/// Candidates grouped by origin; merged in a fixed order for validation.
#[derive(Debug, Default)]
struct Candidates {
    searched: Vec<Source>,
    follow_ups: Vec<Source>,
    context: Vec<Source>,
}

impl Candidates {
    fn len(&self) -> usize {
        self.searched.len() + self.follow_ups.len() + self.context.len()
    }

    /// Initial search results, then follow-up results, then context sources.
    fn merged(&self) -> impl Iterator<Item = Source> + '_ {
        self.searched
            .iter()
            .chain(&self.follow_ups)
            .chain(&self.context)
            .cloned()
    }
}

enum Step {
    Classify,
    Aggregate {
        signals: Vec<Signal>,
    },
    Validate {
        candidates: Candidates,
        gap_check: bool,
    },
    GapCheck {
        candidates: Candidates,
        sources: SourceSet,
    },
    AggregateMore {
        candidates: Candidates,
        follow_ups: Vec<String>,
    },
    BuildPrompt {
        sources: SourceSet,
    },
    Generate {
        sources: SourceSet,
        prompt: PromptPair,
    },
    Assemble {
        sources: SourceSet,
        raw: String,
    },
    Done {
        answer_text: String,
        sources: SourceSet,
    },
}

impl Step {
    fn state(&self) -> PipelineState {
        match self {
            Self::Classify => PipelineState::Classify,
            Self::Aggregate { .. } => PipelineState::Aggregate,
            Self::Validate { .. } => PipelineState::Validate,
            Self::GapCheck { .. } => PipelineState::GapCheck,
            Self::AggregateMore { .. } => PipelineState::AggregateMore,
            Self::BuildPrompt { .. } => PipelineState::BuildPrompt,
            Self::Generate { .. } => PipelineState::Generate,
            Self::Assemble { .. } => PipelineState::Assemble,
            Self::Done { .. } => PipelineState::Done,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Citation-consistent answer pipeline.
///
/// Holds only shared collaborators and immutable settings, so one instance
/// serves any number of concurrent executions.
pub struct Pipeline {
    aggregator: SourceAggregator,
    generator: Arc<dyn Generator>,
    observer: Arc<dyn Observability>,
    policy: UrlPolicy,
    gaps: GapConfig,
    prompts: CitationPromptBuilder,
    generation_timeout: Duration,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            search,
            finance,
            context,
            generator,
            observer,
        } = collaborators;

        Self {
            aggregator: SourceAggregator::new(config, search, finance, context, observer.clone()),
            generator,
            observer,
            policy: UrlPolicy::from(config),
            gaps: GapConfig::from(config),
            prompts: CitationPromptBuilder::from(config),
            generation_timeout: config.generation_timeout,
        }
    }

    pub fn model(&self) -> &str {
        self.generator.model()
    }

    /// Answer one question.
    ///
    /// Returns a complete [`PipelineResult`] or an error: `Generation` when the
    /// generator fails or times out, `Cancelled` when `cancel` fires first.
    /// Retrieval problems only shrink the source list.
    #[instrument(skip_all, fields(execution = tracing::field::Empty, chat_type = %chat_type))]
    pub async fn run(
        &self,
        query: &str,
        context: &ChatContext,
        chat_type: ChatType,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult> {
        let start = Instant::now();
        let mut report = PipelineReport {
            model: self.generator.model().to_string(),
            ..PipelineReport::default()
        };
        tracing::Span::current().record("execution", tracing::field::display(report.execution_id));
        info!(query = %query, "pipeline started");

        let mut step = Step::Classify;
        loop {
            if cancel.is_cancelled() && !matches!(step, Step::Done { .. }) {
                return Err(SourceboundError::Cancelled);
            }
            let from = step.state();

            step = match step {
                Step::Classify => {
                    let signals = classifier::classify(query, context.last_answer());
                    self.observer.record(&PipelineEvent::Classified {
                        signals: signals.clone(),
                    });
                    report.searched = !signals.is_empty();
                    report.signals = signals.clone();
                    Step::Aggregate { signals }
                }

                Step::Aggregate { signals } => {
                    let found = self
                        .aggregator
                        .aggregate(query, &signals, context, cancel)
                        .await?;
                    Step::Validate {
                        candidates: Candidates {
                            searched: found.searched,
                            follow_ups: Vec::new(),
                            context: found.context,
                        },
                        gap_check: !signals.is_empty(),
                    }
                }

                Step::Validate {
                    candidates,
                    gap_check,
                } => {
                    let sources = dedupe_and_validate(candidates.merged(), &self.policy);
                    report.candidates = candidates.len();
                    self.observer.record(&PipelineEvent::Validated {
                        candidates: candidates.len(),
                        kept: sources.len(),
                    });
                    if gap_check {
                        Step::GapCheck {
                            candidates,
                            sources,
                        }
                    } else {
                        Step::BuildPrompt { sources }
                    }
                }

                Step::GapCheck {
                    candidates,
                    sources,
                } => {
                    let gaps = analyze_gaps(&sources, query, &self.gaps);
                    if gaps.needs_more_data {
                        self.observer.record(&PipelineEvent::GapsFound {
                            follow_ups: gaps.follow_up_queries.clone(),
                        });
                        report.follow_up_queries = gaps.follow_up_queries.clone();
                        Step::AggregateMore {
                            candidates,
                            follow_ups: gaps.follow_up_queries,
                        }
                    } else {
                        Step::BuildPrompt { sources }
                    }
                }

                Step::AggregateMore {
                    mut candidates,
                    follow_ups,
                } => {
                    report.gap_round_ran = true;
                    candidates.follow_ups =
                        self.aggregator.search_follow_ups(&follow_ups, cancel).await?;
                    // One bounded round: the next validation goes straight to BuildPrompt.
                    Step::Validate {
                        candidates,
                        gap_check: false,
                    }
                }

                Step::BuildPrompt { sources } => {
                    let context_text = prompt::render_context(context);
                    let user = self
                        .prompts
                        .build_prompt(query, &context_text, chat_type, &sources);
                    let system = prompt::system_prompt(chat_type, Utc::now());
                    self.observer.record(&PipelineEvent::PromptBuilt {
                        sources: sources.clone(),
                        chars: user.len(),
                    });
                    Step::Generate {
                        sources,
                        prompt: PromptPair { system, user },
                    }
                }

                Step::Generate { sources, prompt } => {
                    let raw = bounded(
                        "generation",
                        self.generation_timeout,
                        cancel,
                        self.generator.complete(&prompt),
                    )
                    .await
                    .map_err(into_generation_error)?;
                    self.observer
                        .record(&PipelineEvent::Generated { chars: raw.len() });
                    Step::Assemble { sources, raw }
                }

                Step::Assemble { sources, raw } => {
                    let cleaned = sanitize_answer(&raw, sources.len());
                    report.hallucinated_citations_removed = cleaned.hallucinated_removed;
                    report.duplicate_citations_removed = cleaned.duplicates_removed;
                    self.observer.record(&PipelineEvent::Sanitized {
                        hallucinated: cleaned.hallucinated_removed,
                        duplicates: cleaned.duplicates_removed,
                    });
                    Step::Done {
                        answer_text: cleaned.text,
                        sources,
                    }
                }

                Step::Done {
                    answer_text,
                    sources,
                } => {
                    report.elapsed_ms = start.elapsed().as_millis() as u64;
                    info!(
                        sources = sources.len(),
                        gap_round = report.gap_round_ran,
                        elapsed_ms = report.elapsed_ms,
                        "pipeline complete"
                    );
                    return Ok(PipelineResult {
                        answer_text,
                        sources,
                        report,
                    });
                }
            };

            self.observer.record(&PipelineEvent::Transition {
                from,
                to: step.state(),
            });
        }
    }
}

/// Everything but cancellation becomes a generation failure.
fn into_generation_error(err: SourceboundError) -> SourceboundError {
    match err {
        SourceboundError::Cancelled => SourceboundError::Cancelled,
        SourceboundError::Generation(message) => SourceboundError::Generation(message),
        other => SourceboundError::Generation(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::observe::SilentObserver;

    // -- fakes ---------------------------------------------------------------

    /// Answers known queries from a table; unknown queries get nothing.
    #[derive(Default)]
    struct ScriptedSearch {
        results: HashMap<String, Vec<Source>>,
        delay: Option<Duration>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedSearch {
        fn with(mut self, query: &str, urls: &[&str]) -> Self {
            let sources = urls
                .iter()
                .map(|u| Source::new(*u, format!("Title for {u}"), "web"))
                .collect();
            self.results.insert(query.to_string(), sources);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchProvider for ScriptedSearch {
        async fn search(&self, query: &str) -> Result<Vec<Source>> {
            self.calls.lock().unwrap().push(query.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.results.get(query).cloned().unwrap_or_default())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct StaticContext(Vec<Source>);

    #[async_trait]
    impl ContextExtractor for StaticContext {
        async fn extract(&self, _context: &ChatContext) -> Vec<Source> {
            self.0.clone()
        }
    }

    enum Reply {
        Text(String),
        Fail,
        Hang,
    }

    struct FakeGenerator {
        reply: Reply,
        prompts: Mutex<Vec<PromptPair>>,
        calls: AtomicUsize,
    }

    impl FakeGenerator {
        fn new(reply: Reply) -> Self {
            Self {
                reply,
                prompts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }

        fn answering(text: &str) -> Self {
            Self::new(Reply::Text(text.to_string()))
        }

        fn last_user_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().unwrap().user.clone()
        }
    }

    #[async_trait]
    impl Generator for FakeGenerator {
        async fn complete(&self, prompt: &PromptPair) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.clone());
            match &self.reply {
                Reply::Text(text) => Ok(text.clone()),
                Reply::Fail => Err(SourceboundError::Generation("HTTP 503".into())),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok("too late".into())
                }
            }
        }

        fn model(&self) -> &str {
            "fake-model"
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<PipelineEvent>>,
    }

    impl RecordingObserver {
        fn transitions(&self) -> Vec<PipelineState> {
            let events = self.events.lock().unwrap();
            let mut states = vec![PipelineState::Classify];
            states.extend(events.iter().filter_map(|e| match e {
                PipelineEvent::Transition { to, .. } => Some(*to),
                _ => None,
            }));
            states
        }

        fn prompt_sources(&self) -> Option<SourceSet> {
            self.events.lock().unwrap().iter().find_map(|e| match e {
                PipelineEvent::PromptBuilt { sources, .. } => Some(sources.clone()),
                _ => None,
            })
        }
    }

    impl Observability for RecordingObserver {
        fn record(&self, event: &PipelineEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn pipeline(
        search: Arc<ScriptedSearch>,
        context: Vec<Source>,
        generator: Arc<FakeGenerator>,
        observer: Arc<dyn Observability>,
    ) -> Pipeline {
        Pipeline::new(
            &PipelineConfig::default(),
            Collaborators {
                search,
                finance: None,
                context: Arc::new(StaticContext(context)),
                generator,
                observer,
            },
        )
    }

    fn urls(set: &SourceSet) -> Vec<&str> {
        set.iter().map(|s| s.url.as_str()).collect()
    }

    fn ctx_source(url: &str) -> Source {
        Source::new(url, "From the conversation", "conversation")
    }

    const SNAP_QUERY: &str = "SNAP benefits cuts 2025";
    const SNAP_FOLLOW_UP: &str = "SNAP benefits cuts 2025 statistics dollar amounts";

    // -- scenarios -----------------------------------------------------------

    #[tokio::test]
    async fn thin_results_trigger_one_gap_round() {
        let search = Arc::new(
            ScriptedSearch::default()
                .with(SNAP_QUERY, &["https://a.org", "https://b.org", "https://c.org"])
                .with(SNAP_FOLLOW_UP, &["https://d.org", "https://a.org"])
                .with(
                    "SNAP benefits economic impact data poverty rates",
                    &["https://e.org"],
                ),
        );
        let generator = Arc::new(FakeGenerator::answering("Cuts deepen [1][4]."));
        let p = pipeline(
            search.clone(),
            vec![ctx_source("https://ctx.org")],
            generator.clone(),
            Arc::new(SilentObserver),
        );

        let result = p
            .run(SNAP_QUERY, &ChatContext::default(), ChatType::General, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.report.gap_round_ran);
        assert!(result.report.follow_up_queries.contains(&SNAP_FOLLOW_UP.to_string()));
        assert_eq!(result.report.follow_up_queries.len(), 5);
        // Initial + 5 follow-ups, no second gap round.
        assert_eq!(search.calls().len(), 6);
        assert_eq!(
            urls(&result.sources),
            vec![
                "https://a.org",
                "https://b.org",
                "https://c.org",
                "https://d.org",
                "https://e.org",
                "https://ctx.org",
            ]
        );
        assert_eq!(result.answer_text, "Cuts deepen [1][4].");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn search_timeout_still_answers_with_context_sources() {
        let search = Arc::new(ScriptedSearch {
            delay: Some(Duration::from_secs(120)),
            ..ScriptedSearch::default().with("latest SNAP cuts", &["https://late.org"])
        });
        let generator = Arc::new(FakeGenerator::answering("Benefits were cut [1]."));
        let p = pipeline(
            search,
            vec![ctx_source("https://ctx.org/bill")],
            generator.clone(),
            Arc::new(SilentObserver),
        );

        let result = p
            .run(
                "latest SNAP cuts",
                &ChatContext::default(),
                ChatType::General,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(urls(&result.sources), vec!["https://ctx.org/bill"]);
        assert_eq!(result.answer_text, "Benefits were cut [1].");
        assert!(generator.last_user_prompt().contains("[1] conversation"));
    }

    #[tokio::test]
    async fn non_current_query_skips_search_and_gap_check() {
        let search = Arc::new(ScriptedSearch::default());
        let observer = Arc::new(RecordingObserver::default());
        let generator = Arc::new(FakeGenerator::answering("Plants make sugar [1]."));
        let p = pipeline(search.clone(), vec![], generator.clone(), observer.clone());

        let result = p
            .run(
                "Explain how photosynthesis works",
                &ChatContext::default(),
                ChatType::General,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(search.calls().is_empty());
        assert!(!result.report.searched);
        assert!(!result.report.gap_round_ran);
        assert!(result.sources.is_empty());
        // No sources means every marker is out of range.
        assert_eq!(result.answer_text, "Plants make sugar.");
        assert_eq!(result.report.hallucinated_citations_removed, 1);
        assert!(!generator.last_user_prompt().contains("Sources Available"));
        assert_eq!(
            observer.transitions(),
            vec![
                PipelineState::Classify,
                PipelineState::Aggregate,
                PipelineState::Validate,
                PipelineState::BuildPrompt,
                PipelineState::Generate,
                PipelineState::Assemble,
                PipelineState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn enough_sources_skip_follow_ups() {
        let many: Vec<String> = (0..12).map(|i| format!("https://s{i}.org")).collect();
        let many_refs: Vec<&str> = many.iter().map(String::as_str).collect();
        let search = Arc::new(ScriptedSearch::default().with(SNAP_QUERY, &many_refs));
        let observer = Arc::new(RecordingObserver::default());
        let p = pipeline(
            search.clone(),
            vec![],
            Arc::new(FakeGenerator::answering("ok [12].")),
            observer.clone(),
        );

        let result = p
            .run(SNAP_QUERY, &ChatContext::default(), ChatType::General, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(search.calls(), vec![SNAP_QUERY.to_string()]);
        assert!(!result.report.gap_round_ran);
        assert_eq!(result.sources.len(), 12);
        assert_eq!(result.answer_text, "ok [12].");
        assert_eq!(
            observer.transitions(),
            vec![
                PipelineState::Classify,
                PipelineState::Aggregate,
                PipelineState::Validate,
                PipelineState::GapCheck,
                PipelineState::BuildPrompt,
                PipelineState::Generate,
                PipelineState::Assemble,
                PipelineState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn returned_sources_are_the_prompt_sources() {
        let search = Arc::new(
            ScriptedSearch::default().with(
                "latest court ruling",
                &[
                    "https://a.org",
                    "https://www.google.com/search?q=ruling",
                    "https://b.org",
                    "https://a.org",
                ],
            ),
        );
        let observer = Arc::new(RecordingObserver::default());
        let generator = Arc::new(FakeGenerator::answering("It was upheld [2] [9]."));
        let p = pipeline(
            search,
            vec![ctx_source("https://b.org"), ctx_source("https://c.org")],
            generator.clone(),
            observer.clone(),
        );

        let result = p
            .run(
                "latest court ruling",
                &ChatContext::default(),
                ChatType::SupremeCourt,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let prompt_sources = observer.prompt_sources().expect("prompt built");
        assert!(prompt_sources.same_as(&result.sources));
        assert_eq!(
            urls(&result.sources),
            vec!["https://a.org", "https://b.org", "https://c.org"]
        );

        let user = generator.last_user_prompt();
        for (index, source) in result.sources.citations() {
            assert!(user.contains(&format!("{index} {}", source.origin_label)));
        }
        assert!(!user.contains("[4]"));
        assert_eq!(result.answer_text, "It was upheld [2].");
        assert_eq!(result.report.hallucinated_citations_removed, 1);
    }

    struct OneProfile;

    #[async_trait]
    impl FinanceProvider for OneProfile {
        async fn lookup(&self, _query: &str) -> Result<Option<Source>> {
            Ok(Some(Source::new(
                "https://www.opensecrets.org/members-of-congress/jane-doe",
                "Campaign Finance: Jane Doe",
                "opensecrets.org",
            )))
        }

        fn name(&self) -> &str {
            "one profile"
        }
    }

    #[tokio::test]
    async fn finance_profile_is_cited_after_web_results() {
        const QUERY: &str = "Who are Jane Doe's donors";
        let search = Arc::new(ScriptedSearch::default().with(QUERY, &["https://a.org"]));
        let generator = Arc::new(FakeGenerator::answering("Mostly PACs [2]."));
        let p = Pipeline::new(
            &PipelineConfig::default(),
            Collaborators {
                search,
                finance: Some(Arc::new(OneProfile)),
                context: Arc::new(StaticContext(vec![ctx_source("https://ctx.org")])),
                generator: generator.clone(),
                observer: Arc::new(SilentObserver),
            },
        );

        let context = ChatContext::default();
        let cancel = CancellationToken::new();
        let result = p
            .run(QUERY, &context, ChatType::General, &cancel)
            .await
            .unwrap();

        assert_eq!(
            urls(&result.sources),
            vec![
                "https://a.org",
                "https://www.opensecrets.org/members-of-congress/jane-doe",
                "https://ctx.org",
            ]
        );
        assert!(generator.last_user_prompt().contains("[2] opensecrets.org"));
        assert_eq!(result.answer_text, "Mostly PACs [2].");
    }

    #[tokio::test]
    async fn generation_failure_is_fatal() {
        let p = pipeline(
            Arc::new(ScriptedSearch::default()),
            vec![],
            Arc::new(FakeGenerator::new(Reply::Fail)),
            Arc::new(SilentObserver),
        );
        let err = p
            .run("hello", &ChatContext::default(), ChatType::General, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceboundError::Generation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn generation_timeout_is_fatal() {
        let p = pipeline(
            Arc::new(ScriptedSearch::default()),
            vec![],
            Arc::new(FakeGenerator::new(Reply::Hang)),
            Arc::new(SilentObserver),
        );
        let err = p
            .run("hello", &ChatContext::default(), ChatType::General, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            SourceboundError::Generation(message) => {
                assert!(message.contains("generation timed out after 60s"), "{message}");
            }
            other => panic!("expected Generation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let generator = Arc::new(FakeGenerator::answering("never"));
        let p = pipeline(
            Arc::new(ScriptedSearch::default()),
            vec![],
            generator.clone(),
            Arc::new(SilentObserver),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = p
            .run("latest news", &ChatContext::default(), ChatType::General, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceboundError::Cancelled));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_during_generation() {
        let p = pipeline(
            Arc::new(ScriptedSearch::default()),
            vec![],
            Arc::new(FakeGenerator::new(Reply::Hang)),
            Arc::new(SilentObserver),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let context = ChatContext::default();
        let (outcome, ()) = tokio::join!(
            p.run("hello", &context, ChatType::General, &cancel),
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                trigger.cancel();
            }
        );
        assert!(matches!(outcome, Err(SourceboundError::Cancelled)));
    }

    #[tokio::test]
    async fn prior_answer_uncertainty_triggers_search() {
        let search = Arc::new(ScriptedSearch::default().with("and the vote?", &["https://a.org"]));
        let p = pipeline(
            search.clone(),
            vec![],
            Arc::new(FakeGenerator::answering("It passed [1].")),
            Arc::new(SilentObserver),
        );
        let context = ChatContext {
            prior_turns: vec![sourcebound_shared::Turn {
                role: sourcebound_shared::Role::Assistant,
                content: "I don't have information on that.".into(),
            }],
            ..ChatContext::default()
        };

        let result = p
            .run("and the vote?", &context, ChatType::Bills, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.report.signals.contains(&Signal::PriorUncertainty));
        assert_eq!(search.calls().first().map(String::as_str), Some("and the vote?"));
        assert_eq!(result.sources.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_executions_are_independent() {
        let search = Arc::new(
            ScriptedSearch::default()
                .with("latest alpha", &["https://alpha.org"])
                .with("latest beta", &["https://beta.org"]),
        );
        let p = Arc::new(pipeline(
            search,
            vec![],
            Arc::new(FakeGenerator::answering("ok [1].")),
            Arc::new(SilentObserver),
        ));

        let context = ChatContext::default();
        let (cancel_a, cancel_b) = (CancellationToken::new(), CancellationToken::new());
        let (a, b) = tokio::join!(
            p.run("latest alpha", &context, ChatType::General, &cancel_a),
            p.run("latest beta", &context, ChatType::General, &cancel_b),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(urls(&a.sources), vec!["https://alpha.org"]);
        assert_eq!(urls(&b.sources), vec!["https://beta.org"]);
        assert_ne!(a.report.execution_id, b.report.execution_id);
    }
}
