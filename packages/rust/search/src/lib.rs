//! Web search adapters: DuckDuckGo HTML results and OpenSecrets finance profiles.
//!
//! The HTML endpoint needs no API key and returns a stable, scrapeable
//! results page. Each organic hit becomes a [`Source`] whose origin label is
//! the destination host. Trust flags are assigned later by the aggregator.

mod finance;
mod parser;

use async_trait::async_trait;
use reqwest::Client;
use sourcebound_shared::{Result, SearchConfig, SearchProvider, Source, SourceboundError};
use tracing::{debug, info, instrument};
use url::Url;

pub use finance::OpenSecretsLookup;
pub use parser::SearchHit;

/// Maximum number of redirects to follow for a results page.
const MAX_REDIRECTS: usize = 3;

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("Sourcebound/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// DuckDuckGoSearch
// ---------------------------------------------------------------------------

/// [`SearchProvider`] over `GET {endpoint}/html/?q=...`.
#[derive(Debug, Clone)]
pub struct DuckDuckGoSearch {
    client: Client,
    endpoint: Url,
    max_results: usize,
}

impl DuckDuckGoSearch {
    pub fn new(config: SearchConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            SourceboundError::config(format!("invalid search endpoint {}: {e}", config.endpoint))
        })?;

        Ok(Self {
            client: build_client(&config)?,
            endpoint,
            max_results: config.max_results,
        })
    }

    /// Results page URL for `query`.
    fn results_url(&self, query: &str) -> Result<Url> {
        let mut url = self
            .endpoint
            .join("/html/")
            .map_err(|e| SourceboundError::config(format!("invalid search endpoint: {e}")))?;
        url.query_pairs_mut().append_pair("q", query);
        Ok(url)
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    #[instrument(skip_all, fields(provider = "duckduckgo", query = %query))]
    async fn search(&self, query: &str) -> Result<Vec<Source>> {
        let url = self.results_url(query)?;
        debug!(%url, "fetching results page");

        let html = fetch_page(&self.client, &url).await?;
        let sources: Vec<Source> = parser::parse_results(&html, self.max_results)
            .into_iter()
            .map(hit_to_source)
            .collect();

        info!(results = sources.len(), "search complete");
        Ok(sources)
    }

    fn name(&self) -> &str {
        "duckduckgo"
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a reqwest client with appropriate settings.
fn build_client(config: &SearchConfig) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(config.timeout)
        .build()
        .map_err(|e| SourceboundError::Network(format!("failed to build HTTP client: {e}")))
}

async fn fetch_page(client: &Client, url: &Url) -> Result<String> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| SourceboundError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SourceboundError::Network(format!("{url}: HTTP {status}")));
    }

    response
        .text()
        .await
        .map_err(|e| SourceboundError::Network(format!("{url}: failed to read body: {e}")))
}

fn hit_to_source(hit: SearchHit) -> Source {
    let label = Url::parse(&hit.url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| "web".to_string());

    let source = Source::new(hit.url, hit.title, label);
    match hit.snippet {
        Some(snippet) => source.with_excerpt(snippet),
        None => source,
    }
}
