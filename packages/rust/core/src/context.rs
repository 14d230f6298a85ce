//! Citable sources already present in the conversation.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use sourcebound_shared::{ChatContext, ContextExtractor, Role, Source};
use url::Url;

/// Title used when official data arrives without one.
const OFFICIAL_DATA_TITLE: &str = "Official Government Document";

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>()\[\]"'`]+"#).expect("url regex"));

/// Yields the official-data source, then every `http(s)` URL cited in prior
/// assistant turns, in turn order.
///
/// Duplicates are left in; the validator collapses them.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConversationContextExtractor;

impl ConversationContextExtractor {
    pub fn extract_sync(&self, context: &ChatContext) -> Vec<Source> {
        let mut sources = Vec::new();

        if let Some(data) = &context.official_data {
            if let Some(url) = data.source_url.as_deref().filter(|u| !u.trim().is_empty()) {
                let title = data
                    .title
                    .as_deref()
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or(OFFICIAL_DATA_TITLE);
                sources.push(Source::new(url.trim(), title, "government").trusted());
            }
        }

        for turn in context.prior_turns.iter().filter(|t| t.role == Role::Assistant) {
            sources.extend(urls_in(&turn.content).map(|url| {
                let label = Url::parse(&url)
                    .ok()
                    .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
                    .unwrap_or_else(|| "conversation".to_string());
                Source::new(url, label.clone(), label)
            }));
        }

        sources
    }
}

#[async_trait]
impl ContextExtractor for ConversationContextExtractor {
    async fn extract(&self, context: &ChatContext) -> Vec<Source> {
        self.extract_sync(context)
    }
}

fn urls_in(text: &str) -> impl Iterator<Item = String> + '_ {
    URL_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']).to_string())
}
