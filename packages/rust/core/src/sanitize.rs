//! Post-generation cleanup of answer text.
//!
//! Works on the text only. The source set is never consulted beyond its length.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

static THINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("think regex"));

/// A model-written "Sources:" or "References:" heading, alone on its line after
/// a blank line, and everything below it.
static SOURCES_TAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)\n[ \t]*\n[ \t]*(?:#{1,6}[ \t]*)?(?:\*\*)?(?:sources?|references?)(?::\*\*|\*\*:|:|\*\*)?[ \t]*(?:\n.*)?\z",
    )
    .expect("sources tail regex")
});

static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("citation regex"));

static SPACE_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("space run regex"));

static SPACE_BEFORE_PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+([.,;:!?])").expect("space before punctuation regex"));

static DOT_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.{2,}").expect("dot run regex"));

/// Cleaned answer text plus what was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanitizedAnswer {
    pub text: String,
    /// Markers `[k]` with `k == 0` or `k > N`.
    pub hallucinated_removed: usize,
    /// Immediate repeats such as the second `[4]` in `[4][4]`.
    pub duplicates_removed: usize,
}

/// Clean generated text against a set of `source_count` sources.
///
/// When `source_count` is zero every citation marker is removed.
pub fn sanitize_answer(text: &str, source_count: usize) -> SanitizedAnswer {
    let text = THINK_RE.replace_all(text, "");
    let text = SOURCES_TAIL_RE.replace(&text, "");

    let mut hallucinated = 0;
    let mut duplicates = 0;
    // (index, byte offset just past the marker) of the last kept marker
    let mut last_kept: Option<(usize, usize)> = None;

    let text = CITATION_RE.replace_all(&text, |caps: &Captures<'_>| {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        let index = caps[1].parse::<usize>().unwrap_or(0);

        if index == 0 || index > source_count {
            hallucinated += 1;
            return String::new();
        }

        if let Some((prev, end)) = last_kept {
            let between = text.get(end..whole.start).unwrap_or("x");
            if prev == index && between.trim().is_empty() {
                duplicates += 1;
                last_kept = Some((index, whole.end));
                return String::new();
            }
        }

        last_kept = Some((index, whole.end));
        caps[0].to_string()
    });

    let text = tidy(&text);

    SanitizedAnswer {
        text,
        hallucinated_removed: hallucinated,
        duplicates_removed: duplicates,
    }
}

fn tidy(text: &str) -> String {
    let text = SPACE_RUN_RE.replace_all(text, " ");
    let text = SPACE_BEFORE_PUNCT_RE.replace_all(&text, "$1");
    // Two dots become one; a real ellipsis stays.
    let text = DOT_RUN_RE.replace_all(&text, |caps: &Captures<'_>| {
        if caps[0].len() == 2 {
            ".".to_string()
        } else {
            caps[0].to_string()
        }
    });
    text.trim().to_string()
}
