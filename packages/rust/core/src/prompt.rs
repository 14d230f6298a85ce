//! Citation-indexed prompt construction.
//!
//! The user message binds citation numbers `[1]..[N]` to the exact
//! [`SourceSet`] it is given; nothing here adds, drops or reorders sources.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use sourcebound_shared::{ChatContext, ChatType, PipelineConfig, SourceSet};

/// How many recent turns are replayed into the prompt.
const RECENT_TURNS: usize = 3;

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("citation marker regex"));

/// Rewrite bracketed numbers in quoted text as `(k)` so the only `[k]`
/// markers in a prompt are the ones bound to sources.
pub fn neutralize_markers(text: &str) -> Cow<'_, str> {
    MARKER_RE.replace_all(text, "($1)")
}

// ---------------------------------------------------------------------------
// Context rendering
// ---------------------------------------------------------------------------

/// Render conversation context as plain text for the user message.
///
/// Empty when there is nothing to add.
pub fn render_context(context: &ChatContext) -> String {
    let mut out = String::new();

    if let Some(data) = &context.official_data {
        let json = serde_json::to_string_pretty(&data.payload)
            .unwrap_or_else(|_| data.payload.to_string());
        let _ = writeln!(out, "Official Data:");
        if let Some(title) = &data.title {
            let _ = writeln!(out, "Title: {title}");
        }
        if let Some(url) = &data.source_url {
            let _ = writeln!(out, "Source: {url}");
        }
        let _ = writeln!(out, "{json}\n");
    }

    if !context.prior_turns.is_empty() {
        let start = context.prior_turns.len().saturating_sub(RECENT_TURNS);
        let _ = writeln!(out, "Recent Conversation (USE THIS CONTEXT):");
        for turn in &context.prior_turns[start..] {
            let content = neutralize_markers(turn.content.trim());
            let _ = writeln!(out, "{}: {content}", turn.role.as_str());
        }
        let _ = writeln!(
            out,
            "This is a continuing conversation. Resolve references like \"it\" or \"they\" from the turns above.\n"
        );
    }

    if let Some(location) = context.user_location.as_deref().filter(|l| !l.trim().is_empty()) {
        let _ = writeln!(out, "User Location: {}\n", location.trim());
    }

    out.trim_end().to_string()
}

// ---------------------------------------------------------------------------
// CitationPromptBuilder
// ---------------------------------------------------------------------------

/// Renders the user message for one generation call.
#[derive(Debug, Clone, Copy)]
pub struct CitationPromptBuilder {
    pub max_excerpt_chars: usize,
}

impl Default for CitationPromptBuilder {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for CitationPromptBuilder {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_excerpt_chars: config.max_excerpt_chars,
        }
    }
}

impl CitationPromptBuilder {
    /// Build the user message.
    ///
    /// With sources, emits a numbered block stating the exact count, one
    /// entry per source at its 1-based position, and the valid range restated
    /// at the end. Without sources, emits no citation block and no citation
    /// instructions.
    pub fn build_prompt(
        &self,
        query: &str,
        context: &str,
        chat_type: ChatType,
        sources: &SourceSet,
    ) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "User Question: {}\n", query.trim());

        let context = context.trim();
        if !context.is_empty() {
            let _ = writeln!(out, "{context}\n");
        }

        if !sources.is_empty() {
            self.write_citation_block(&mut out, sources);
        }

        if let Some(focus) = chat_focus(chat_type) {
            let _ = writeln!(out, "Focus: {focus}\n");
        }

        out.push_str(
            "Answer the question directly. Start with the answer itself, in plain language, without commentary about your process.",
        );
        out
    }

    fn write_citation_block(&self, out: &mut String, sources: &SourceSet) {
        let n = sources.len();
        let _ = writeln!(out, "Web Search Results - EXACTLY {n} Sources Available:\n");

        for (index, source) in sources.citations() {
            let marker = if source.trusted { " [TRUSTED]" } else { "" };
            let _ = writeln!(out, "{index} {}{marker}", source.origin_label);
            let _ = writeln!(out, "    Title: {}", neutralize_markers(&source.title));
            let _ = writeln!(out, "    URL: {}", source.url);
            if let Some(excerpt) = source.excerpt.as_deref() {
                let excerpt = neutralize_markers(excerpt);
                let _ = writeln!(
                    out,
                    "    Excerpt: {}",
                    truncate_excerpt(&excerpt, self.max_excerpt_chars)
                );
            }
            out.push('\n');
        }

        let range = if n == 1 {
            "[1]".to_string()
        } else {
            format!("[1] through [{n}]")
        };
        let _ = writeln!(out, "CITATION RULES:");
        let _ = writeln!(
            out,
            "You have been given exactly {n} sources. Cite them only as {range}."
        );
        let _ = writeln!(out, "1. Cite a source only where it directly supports the claim.");
        let _ = writeln!(out, "2. Place citations inline, next to the claim they support.");
        let _ = writeln!(
            out,
            "3. Never cite a number outside this range and never invent sources."
        );
        let _ = writeln!(out, "4. Do not append a separate list of sources.");
        let _ = writeln!(out, "Maximum citation number: [{n}]\n");
    }
}

/// Truncate to at most `max` characters, appending `...` when cut.
pub fn truncate_excerpt(text: &str, max: usize) -> Cow<'_, str> {
    let text = text.trim();
    match text.char_indices().nth(max) {
        None => Cow::Borrowed(text),
        Some((cut, _)) => Cow::Owned(format!("{}...", text[..cut].trim_end())),
    }
}

fn chat_focus(chat_type: ChatType) -> Option<&'static str> {
    match chat_type {
        ChatType::General => None,
        ChatType::SupremeCourt => Some("Supreme Court decisions and how they affect people."),
        ChatType::Bills => Some("legislation, who it helps and who it may harm."),
        ChatType::Representatives => Some("representatives' votes, positions and funding."),
        ChatType::Labor => Some("labor law and worker protections."),
        ChatType::Ethical => Some("worker cooperatives and ethical business alternatives."),
    }
}

// ---------------------------------------------------------------------------
// System prompt and fallbacks
// ---------------------------------------------------------------------------

const BASE_PERSONA: &str = "\
You are a civic information assistant. Help people understand how government \
works, what policies mean for their communities, and how to take part in \
democracy.

Present verifiable facts directly: voting records, official documents, court \
filings, campaign finance data. Show who a policy helps and who it affects, \
especially workers and vulnerable communities. Use plain language, state what \
you know and what you do not, and never manufacture false balance.

When you are given numbered sources, rely on them for anything recent and cite \
them inline. Never claim that your knowledge stops at a training cutoff.";

fn persona_addendum(chat_type: ChatType) -> &'static str {
    match chat_type {
        ChatType::General => "",
        ChatType::SupremeCourt => {
            "\n\nSUPREME COURT:\n- Explain decisions in plain language and their effect on everyday people.\n- Give historical context when relevant and point to official court documents."
        }
        ChatType::Bills => {
            "\n\nBILLS & LEGISLATION:\n- Summarize bills in everyday language, including sponsors.\n- Explain who the bill helps and who it might harm, and point to the official text."
        }
        ChatType::Representatives => {
            "\n\nREPRESENTATIVES:\n- Cover voting records, policy positions and funding sources.\n- Note potential conflicts of interest without judgment."
        }
        ChatType::Labor => {
            "\n\nLABOR RIGHTS:\n- Explain labor law and worker protections clearly and with compassion.\n- Prefer official labor department sources and independent labor journalism."
        }
        ChatType::Ethical => {
            "\n\nETHICAL BUSINESS:\n- Highlight worker cooperatives and ethical businesses.\n- Explain cooperative ownership models and their benefits to workers."
        }
    }
}

/// System message for `chat_type`, anchored to the current date and time.
pub fn system_prompt(chat_type: ChatType, now: DateTime<Utc>) -> String {
    let date = now.format("%A, %B %-d, %Y");
    let time = now.format("%H:%M UTC");
    format!(
        "CURRENT DATE & TIME: {date} at {time}\n\
         Today is {date}. Questions about \"today\" or \"tonight\" refer to this date.\n\n\
         {BASE_PERSONA}{}",
        persona_addendum(chat_type)
    )
}

/// What a caller may show when generation fails. Never used by the pipeline.
pub fn fallback_message(chat_type: ChatType) -> &'static str {
    match chat_type {
        ChatType::SupremeCourt => {
            "I'm having trouble reaching the answer service right now. Supreme Court decisions can affect all of us, and I want you to get accurate information. Which case or topic are you interested in?"
        }
        ChatType::Bills => {
            "I'm having a technical issue reaching the answer service, but I'm still here. Which bill are you asking about? Knowing that will help me find the full text and analysis."
        }
        ChatType::Representatives => {
            "I'm having trouble reaching the answer service right now. Which representative or vote are you interested in? I can help you look into their record."
        }
        ChatType::Labor => {
            "The answer service is temporarily unavailable, but labor rights matter too much to leave you without help. Which part of labor law or worker rights are you asking about?"
        }
        ChatType::Ethical => {
            "I'm having a connection issue with the answer service. What kind of business or service are you looking for? I can help you find cooperatives and ethical alternatives."
        }
        ChatType::General => {
            "I'm having trouble reaching the answer service right now, but I want to help you find what you need. Could you tell me more about what you're looking for?"
        }
    }
}
