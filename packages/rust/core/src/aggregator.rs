//! Candidate gathering from web search and conversation context.
//!
//! Retrieval failures never abort an execution: they are logged, reported to
//! the observer, and become zero sources. Only cancellation propagates.

use std::sync::Arc;
use std::time::Duration;

use sourcebound_shared::{
    ChatContext, ContextExtractor, FinanceProvider, PipelineConfig, Result, SearchProvider,
    Source, SourceboundError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::classifier::Signal;
use crate::deadline::bounded;
use crate::dedupe::host_matches;
use crate::observe::{Observability, PipelineEvent};

/// Candidates from one aggregation, grouped by origin.
#[derive(Debug, Default)]
pub struct Aggregated {
    /// Web results, then the finance profile when one was found.
    pub searched: Vec<Source>,
    pub context: Vec<Source>,
}

impl Aggregated {
    /// Searched sources followed by context sources.
    pub fn into_candidates(self) -> Vec<Source> {
        let mut candidates = self.searched;
        candidates.extend(self.context);
        candidates
    }
}

/// Gathers candidate sources. Owns no mutable state; share it freely.
pub struct SourceAggregator {
    search: Arc<dyn SearchProvider>,
    finance: Option<Arc<dyn FinanceProvider>>,
    context: Arc<dyn ContextExtractor>,
    observer: Arc<dyn Observability>,
    search_timeout: Duration,
    context_timeout: Duration,
    trusted_domains: Vec<String>,
}

impl SourceAggregator {
    pub fn new(
        config: &PipelineConfig,
        search: Arc<dyn SearchProvider>,
        finance: Option<Arc<dyn FinanceProvider>>,
        context: Arc<dyn ContextExtractor>,
        observer: Arc<dyn Observability>,
    ) -> Self {
        Self {
            search,
            finance,
            context,
            observer,
            search_timeout: config.search_timeout,
            context_timeout: config.context_timeout,
            trusted_domains: config.trusted_domains.clone(),
        }
    }

    /// Search results (only when the classifier raised a signal) followed by
    /// context-derived sources.
    ///
    /// A campaign-finance signal adds a finance lookup, run alongside the web
    /// search; its source lands after the web results.
    #[instrument(skip_all, fields(query = %query, signals = signals.len()))]
    pub async fn aggregate(
        &self,
        query: &str,
        signals: &[Signal],
        context: &ChatContext,
        cancel: &CancellationToken,
    ) -> Result<Aggregated> {
        let mut found = Aggregated::default();
        if signals.is_empty() {
            debug!("query does not need current information, skipping search");
        } else {
            let wants_finance = signals.contains(&Signal::CampaignFinance);
            let (web, finance) = tokio::join!(
                self.search(query, cancel),
                self.finance(query, wants_finance, cancel)
            );
            found.searched = web?;
            found.searched.extend(finance?);
        }
        found.context = self.extract_context(context, cancel).await?;
        Ok(found)
    }

    /// One search under the search timeout. Failures yield an empty list.
    pub async fn search(&self, query: &str, cancel: &CancellationToken) -> Result<Vec<Source>> {
        let outcome = bounded(
            "search",
            self.search_timeout,
            cancel,
            self.search.search(query),
        )
        .await;

        match outcome {
            Ok(sources) => {
                let sources: Vec<Source> =
                    sources.into_iter().map(|s| self.flag_trusted(s)).collect();
                self.observer.record(&PipelineEvent::SearchCompleted {
                    query: query.to_string(),
                    results: sources.len(),
                });
                Ok(sources)
            }
            Err(SourceboundError::Cancelled) => Err(SourceboundError::Cancelled),
            Err(e) => {
                warn!(
                    provider = self.search.name(),
                    error = %e,
                    "search failed, treating as no results"
                );
                self.observer.record(&PipelineEvent::RetrievalFailed {
                    operation: "search",
                    error: e.to_string(),
                });
                Ok(Vec::new())
            }
        }
    }

    /// Finance profile under the search timeout, when wanted and configured.
    async fn finance(
        &self,
        query: &str,
        wanted: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<Source>> {
        let Some(finance) = self.finance.as_ref().filter(|_| wanted) else {
            return Ok(None);
        };

        let outcome = bounded(
            "finance lookup",
            self.search_timeout,
            cancel,
            finance.lookup(query),
        )
        .await;

        match outcome {
            Ok(found) => Ok(found.map(|s| self.flag_trusted(s))),
            Err(SourceboundError::Cancelled) => Err(SourceboundError::Cancelled),
            Err(e) => {
                warn!(
                    provider = finance.name(),
                    error = %e,
                    "finance lookup failed, continuing without it"
                );
                self.observer.record(&PipelineEvent::RetrievalFailed {
                    operation: "finance lookup",
                    error: e.to_string(),
                });
                Ok(None)
            }
        }
    }

    /// Context sources under the context timeout. A timeout yields nothing.
    pub async fn extract_context(
        &self,
        context: &ChatContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<Source>> {
        let outcome = bounded("context extraction", self.context_timeout, cancel, async {
            Ok(self.context.extract(context).await)
        })
        .await;

        match outcome {
            Ok(sources) => {
                self.observer.record(&PipelineEvent::ContextExtracted {
                    sources: sources.len(),
                });
                Ok(sources)
            }
            Err(SourceboundError::Cancelled) => Err(SourceboundError::Cancelled),
            Err(e) => {
                warn!(error = %e, "context extraction failed, continuing without it");
                self.observer.record(&PipelineEvent::RetrievalFailed {
                    operation: "context extraction",
                    error: e.to_string(),
                });
                Ok(Vec::new())
            }
        }
    }

    /// Run follow-up queries one after another, concatenating their results
    /// in query order.
    #[instrument(skip_all, fields(queries = queries.len()))]
    pub async fn search_follow_ups(
        &self,
        queries: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Source>> {
        let mut found = Vec::new();
        for query in queries {
            found.extend(self.search(query, cancel).await?);
        }
        info!(sources = found.len(), "follow-up searches complete");
        Ok(found)
    }

    fn flag_trusted(&self, source: Source) -> Source {
        if source.trusted || !self.is_trusted_url(&source.url) {
            return source;
        }
        source.trusted()
    }

    fn is_trusted_url(&self, url: &str) -> bool {
        Url::parse(url.trim())
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .is_some_and(|host| {
                self.trusted_domains
                    .iter()
                    .any(|domain| host_matches(&host, domain))
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::observe::SilentObserver;

    struct StaticSearch {
        results: Vec<Source>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SearchProvider for StaticSearch {
        async fn search(&self, query: &str) -> Result<Vec<Source>> {
            self.calls.lock().unwrap().push(query.to_string());
            Ok(self.results.clone())
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    struct SlowSearch;

    #[async_trait]
    impl SearchProvider for SlowSearch {
        async fn search(&self, _query: &str) -> Result<Vec<Source>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![Source::new("https://late.org", "Late", "late.org")])
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    struct FailingSearch;

    #[async_trait]
    impl SearchProvider for FailingSearch {
        async fn search(&self, _query: &str) -> Result<Vec<Source>> {
            Err(SourceboundError::Network("connection refused".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct StaticContext(Vec<Source>);

    #[async_trait]
    impl ContextExtractor for StaticContext {
        async fn extract(&self, _context: &ChatContext) -> Vec<Source> {
            self.0.clone()
        }
    }

    struct StaticFinance {
        profile: Option<Source>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FinanceProvider for StaticFinance {
        async fn lookup(&self, query: &str) -> Result<Option<Source>> {
            self.calls.lock().unwrap().push(query.to_string());
            Ok(self.profile.clone())
        }

        fn name(&self) -> &str {
            "static finance"
        }
    }

    struct FailingFinance;

    #[async_trait]
    impl FinanceProvider for FailingFinance {
        async fn lookup(&self, _query: &str) -> Result<Option<Source>> {
            Err(SourceboundError::Network("HTTP 503".into()))
        }

        fn name(&self) -> &str {
            "failing finance"
        }
    }

    fn aggregator(search: Arc<dyn SearchProvider>, context: Vec<Source>) -> SourceAggregator {
        with_finance(search, None, context)
    }

    fn with_finance(
        search: Arc<dyn SearchProvider>,
        finance: Option<Arc<dyn FinanceProvider>>,
        context: Vec<Source>,
    ) -> SourceAggregator {
        SourceAggregator::new(
            &PipelineConfig::default(),
            search,
            finance,
            Arc::new(StaticContext(context)),
            Arc::new(SilentObserver),
        )
    }

    fn static_search(urls: &[&str]) -> Arc<StaticSearch> {
        Arc::new(StaticSearch {
            results: urls.iter().map(|u| Source::new(*u, "t", "web")).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn static_finance(url: &str) -> Arc<StaticFinance> {
        Arc::new(StaticFinance {
            profile: Some(Source::new(url, "Campaign Finance: Jane Doe", "opensecrets.org")),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Classify `query` the way the pipeline does, then aggregate.
    async fn gather(agg: &SourceAggregator, query: &str) -> Vec<Source> {
        let signals = crate::classifier::classify(query, "");
        agg.aggregate(query, &signals, &ChatContext::default(), &CancellationToken::new())
            .await
            .unwrap()
            .into_candidates()
    }

    fn urls(sources: &[Source]) -> Vec<&str> {
        sources.iter().map(|s| s.url.as_str()).collect()
    }

    #[tokio::test]
    async fn search_results_precede_context() {
        let agg = aggregator(
            static_search(&["https://a.org", "https://b.org"]),
            vec![Source::new("https://ctx.org", "ctx", "conversation")],
        );
        let out = gather(&agg, "latest SNAP news").await;
        assert_eq!(urls(&out), vec!["https://a.org", "https://b.org", "https://ctx.org"]);
    }

    #[tokio::test]
    async fn no_search_when_not_needed() {
        let search = static_search(&["https://a.org"]);
        let agg = aggregator(
            search.clone(),
            vec![Source::new("https://ctx.org", "ctx", "conversation")],
        );
        let out = gather(&agg, "explain photosynthesis").await;
        assert_eq!(urls(&out), vec!["https://ctx.org"]);
        assert!(search.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn finance_profile_follows_web_results() {
        let finance = static_finance("https://www.opensecrets.org/members-of-congress/jane-doe");
        let agg = with_finance(
            static_search(&["https://a.org", "https://b.org"]),
            Some(finance.clone()),
            vec![Source::new("https://ctx.org", "ctx", "conversation")],
        );
        let out = gather(&agg, "Who are Jane Doe's biggest donors").await;
        assert_eq!(
            urls(&out),
            vec![
                "https://a.org",
                "https://b.org",
                "https://www.opensecrets.org/members-of-congress/jane-doe",
                "https://ctx.org",
            ]
        );
        assert_eq!(finance.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn finance_lookup_needs_finance_signal() {
        let finance = static_finance("https://www.opensecrets.org/x");
        let agg = with_finance(
            static_search(&["https://a.org"]),
            Some(finance.clone()),
            vec![],
        );
        let out = gather(&agg, "latest SNAP news").await;
        assert_eq!(urls(&out), vec!["https://a.org"]);
        assert!(finance.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn finance_failure_keeps_web_results() {
        let agg = with_finance(
            static_search(&["https://a.org"]),
            Some(Arc::new(FailingFinance)),
            vec![],
        );
        let out = gather(&agg, "pac funding in the senate race").await;
        assert_eq!(urls(&out), vec!["https://a.org"]);
    }

    #[tokio::test(start_paused = true)]
    async fn search_timeout_keeps_context_sources() {
        let agg = aggregator(
            Arc::new(SlowSearch),
            vec![Source::new("https://ctx.org", "ctx", "conversation")],
        );
        let out = gather(&agg, "latest news").await;
        assert_eq!(urls(&out), vec!["https://ctx.org"]);
    }

    #[tokio::test]
    async fn search_failure_is_empty() {
        let agg = aggregator(Arc::new(FailingSearch), vec![]);
        let out = agg.search("snap", &CancellationToken::new()).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn cancellation_propagates() {
        let agg = aggregator(Arc::new(SlowSearch), vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = agg.search("snap", &cancel).await.unwrap_err();
        assert!(matches!(err, SourceboundError::Cancelled));
    }

    #[tokio::test]
    async fn trusted_domains_are_flagged() {
        let agg = aggregator(
            static_search(&[
                "https://www.democracynow.org/2025/11/3/snap",
                "https://propublica.org/article/x",
                "https://cnn.com/x",
                "https://notpropublica.org/x",
            ]),
            vec![],
        );
        let out = agg.search("snap", &CancellationToken::new()).await.unwrap();
        let trusted: Vec<bool> = out.iter().map(|s| s.trusted).collect();
        assert_eq!(trusted, vec![true, true, false, false]);
    }

    #[tokio::test]
    async fn follow_ups_run_in_order() {
        let search = static_search(&["https://a.org"]);
        let agg = aggregator(search.clone(), vec![]);
        let queries = vec!["first".to_string(), "second".to_string()];
        let out = agg
            .search_follow_ups(&queries, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(*search.calls.lock().unwrap(), vec!["first", "second"]);
    }
}
