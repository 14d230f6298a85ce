//! Collapse candidate sources into a unique, well-formed [`SourceSet`].

use std::collections::HashSet;

use sourcebound_shared::{PipelineConfig, Source, SourceSet};
use tracing::debug;
use url::Url;

/// Which URLs may never become citations.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    /// Substrings that mark a URL as a search-results page.
    pub disallowed_patterns: Vec<String>,
    /// Hosts (and their subdomains) that only serve search results.
    pub search_result_domains: Vec<String>,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for UrlPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            disallowed_patterns: config.disallowed_url_patterns.clone(),
            search_result_domains: config.search_result_domains.clone(),
        }
    }
}

impl UrlPolicy {
    /// Whether a parsed, absolute URL points at a search-results page.
    pub fn is_disallowed(&self, raw: &str, url: &Url) -> bool {
        if self.disallowed_patterns.iter().any(|p| raw.contains(p.as_str())) {
            return true;
        }
        url.host_str().is_some_and(|host| {
            self.search_result_domains
                .iter()
                .any(|domain| host_matches(host, domain))
        })
    }
}

/// `host` equals `domain` or is one of its subdomains. Case-insensitive.
pub(crate) fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return false;
    }
    host == domain
        || host
            .strip_suffix(domain.as_str())
            .is_some_and(|rest| rest.ends_with('.'))
}

/// Absolute `http`/`https` URL, or `None`.
fn parse_web_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    (matches!(url.scheme(), "http" | "https") && url.host_str().is_some()).then_some(url)
}

/// Scan candidates in order, keeping the first occurrence of each valid,
/// allowed URL.
///
/// Blank, malformed and disallowed URLs are dropped silently. URLs are
/// trimmed before comparison. The result is an order-preserving subsequence of
/// the input and running it again on its own output changes nothing.
pub fn dedupe_and_validate<I>(candidates: I, policy: &UrlPolicy) -> SourceSet
where
    I: IntoIterator<Item = Source>,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept = Vec::new();

    for mut source in candidates {
        let raw = source.url.trim();
        if raw.is_empty() {
            debug!(title = %source.title, "skipping source without url");
            continue;
        }
        let Some(parsed) = parse_web_url(raw) else {
            debug!(url = %raw, "skipping malformed url");
            continue;
        };
        if seen.contains(raw) {
            debug!(url = %raw, "skipping duplicate url");
            continue;
        }
        if policy.is_disallowed(raw, &parsed) {
            debug!(url = %raw, "skipping search-results url");
            continue;
        }

        let raw = raw.to_string();
        seen.insert(raw.clone());
        source.url = raw;
        kept.push(source);
    }

    kept.into_iter().collect()
}
