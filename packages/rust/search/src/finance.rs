//! Campaign-finance profile lookup against the OpenSecrets site search.
//!
//! Only queries naming a person (two capitalised words) are looked up. The
//! first `/members-of-congress/` link on the results page becomes the source
//! URL; without one, the search page itself is cited.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use sourcebound_shared::{FinanceProvider, Result, SearchConfig, Source, SourceboundError};
use tracing::{debug, info, instrument};
use url::Url;

use crate::{build_client, fetch_page};

/// Summary excerpts are cut to this many characters.
const MAX_SUMMARY_CHARS: usize = 200;

static PERSON_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-z]+\s+[A-Z][a-z]+)\b").expect("person name regex")
});

static PROFILE_LINK: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"a[href*="/members-of-congress/"]"#).expect("profile link selector")
});

static SUMMARY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".search-results").expect("summary selector"));

// ---------------------------------------------------------------------------
// OpenSecretsLookup
// ---------------------------------------------------------------------------

/// [`FinanceProvider`] over `GET {finance_endpoint}/search?q=<name>`.
#[derive(Debug, Clone)]
pub struct OpenSecretsLookup {
    client: Client,
    endpoint: Url,
}

impl OpenSecretsLookup {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.finance_endpoint).map_err(|e| {
            SourceboundError::config(format!(
                "invalid finance endpoint {}: {e}",
                config.finance_endpoint
            ))
        })?;

        Ok(Self {
            client: build_client(config)?,
            endpoint,
        })
    }

    fn search_url(&self, name: &str) -> Result<Url> {
        let mut url = self
            .endpoint
            .join("/search")
            .map_err(|e| SourceboundError::config(format!("invalid finance endpoint: {e}")))?;
        url.query_pairs_mut().append_pair("q", name);
        Ok(url)
    }
}

#[async_trait]
impl FinanceProvider for OpenSecretsLookup {
    #[instrument(skip_all, fields(provider = "opensecrets"))]
    async fn lookup(&self, query: &str) -> Result<Option<Source>> {
        let Some(name) = person_name(query) else {
            debug!("no person named in finance query");
            return Ok(None);
        };

        let url = self.search_url(name)?;
        let html = fetch_page(&self.client, &url).await?;
        let profile = parse_profile(&html, &url, name)?;

        info!(name, url = %profile.url, "finance profile found");
        Ok(Some(
            Source::new(
                profile.url.to_string(),
                format!("Campaign Finance: {name}"),
                "opensecrets.org",
            )
            .with_excerpt(profile.summary),
        ))
    }

    fn name(&self) -> &str {
        "opensecrets"
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Profile {
    url: Url,
    summary: String,
}

/// First "Firstname Lastname" pair in the query.
fn person_name(query: &str) -> Option<&str> {
    PERSON_NAME
        .captures(query)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn parse_profile(html: &str, search_url: &Url, name: &str) -> Result<Profile> {
    let document = Html::parse_document(html);

    let url = match document
        .select(&PROFILE_LINK)
        .next()
        .and_then(|a| a.value().attr("href"))
    {
        Some(href) => search_url.join(href).map_err(|e| {
            SourceboundError::parse(format!("bad profile link {href:?}: {e}"))
        })?,
        None => search_url.clone(),
    };

    let summary = document
        .select(&SUMMARY)
        .next()
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| format!("Campaign finance information for {name}"));

    Ok(Profile {
        url,
        summary: summary.chars().take(MAX_SUMMARY_CHARS).collect(),
    })
}
