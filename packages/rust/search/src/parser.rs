//! DuckDuckGo HTML results parser.
//!
//! The HTML endpoint renders each hit as a `.result` block:
//! - `.result__a`: title link (usually a `//duckduckgo.com/l/?uddg=` redirect)
//! - `.result__snippet`: optional excerpt
//! - `.result--ad`: sponsored blocks, skipped

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One organic hit from a results page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    /// Link text with whitespace collapsed.
    pub title: String,
    /// Destination URL after redirect unwrapping.
    pub url: String,
    pub snippet: Option<String>,
}

// ---------------------------------------------------------------------------
// Selectors (compiled once)
// ---------------------------------------------------------------------------

static RESULT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".result").expect("result selector"));

static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.result__a").expect("title selector"));

static SNIPPET_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".result__snippet").expect("snippet selector"));

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse a results page into at most `max` organic hits, in page order.
pub(crate) fn parse_results(html: &str, max: usize) -> Vec<SearchHit> {
    let doc = Html::parse_document(html);
    let mut hits = Vec::new();

    for block in doc.select(&RESULT_SEL) {
        if hits.len() >= max {
            break;
        }
        if block.value().classes().any(|c| c == "result--ad") {
            continue;
        }

        let Some(link) = block.select(&TITLE_SEL).next() else {
            continue;
        };
        let Some(url) = link.value().attr("href").and_then(unwrap_redirect) else {
            continue;
        };

        let title = collapse_text(link);
        if title.is_empty() {
            continue;
        }

        let snippet = block
            .select(&SNIPPET_SEL)
            .next()
            .map(collapse_text)
            .filter(|s| !s.is_empty());

        hits.push(SearchHit {
            title,
            url,
            snippet,
        });
    }

    hits
}

/// Resolve a result href to the destination URL.
///
/// Protocol-relative and `/l/?uddg=` redirect links are unwrapped; relative
/// links (pagination, internal navigation) yield `None`.
pub(crate) fn unwrap_redirect(href: &str) -> Option<String> {
    let href = href.trim();
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };

    let url = Url::parse(&absolute).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    let is_ddg = url
        .host_str()
        .is_some_and(|h| h == "duckduckgo.com" || h.ends_with(".duckduckgo.com"));

    if is_ddg && url.path() == "/l/" {
        return url
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned())
            .filter(|v| v.starts_with("http://") || v.starts_with("https://"));
    }

    Some(url.to_string())
}

fn collapse_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
