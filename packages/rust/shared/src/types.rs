//! Core domain types for a single pipeline execution.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ExecutionId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline execution (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    /// Generate a new time-sortable execution identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// A retrievable reference usable as a citation.
///
/// `url` is the identity key: two sources with the same URL are the same source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    /// Where the source came from ("democracynow.org", "government", ...).
    pub origin_label: String,
    /// Flagged by its origin as higher-confidence.
    #[serde(default)]
    pub trusted: bool,
}

impl Source {
    /// Create an untrusted source without an excerpt.
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        origin_label: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            excerpt: None,
            origin_label: origin_label.into(),
            trusted: false,
        }
    }

    /// Attach an excerpt. Blank excerpts are dropped.
    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        let excerpt = excerpt.into();
        self.excerpt = if excerpt.trim().is_empty() {
            None
        } else {
            Some(excerpt)
        };
        self
    }

    /// Mark the source as trusted.
    pub fn trusted(mut self) -> Self {
        self.trusted = true;
        self
    }
}

// ---------------------------------------------------------------------------
// CitationIndex
// ---------------------------------------------------------------------------

/// A 1-based citation number bound to a position in a [`SourceSet`].
///
/// Index `i` always refers to `sources[i - 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CitationIndex(NonZeroUsize);

impl CitationIndex {
    /// Build an index valid for a set of `len` sources, or `None` if out of range.
    pub fn new(index: usize, len: usize) -> Option<Self> {
        if index > len {
            return None;
        }
        NonZeroUsize::new(index).map(Self)
    }

    /// The 1-based number.
    pub fn get(self) -> usize {
        self.0.get()
    }

    /// The 0-based position in the source set.
    pub fn position(self) -> usize {
        self.0.get() - 1
    }
}

impl std::fmt::Display for CitationIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

// ---------------------------------------------------------------------------
// SourceSet
// ---------------------------------------------------------------------------

/// An ordered, immutable set of sources keyed by URL.
///
/// Order is first-seen order and determines citation numbering. Cloning is
/// cheap and shares the underlying buffer, so the set rendered into a prompt
/// and the set returned to the caller can be the very same allocation.
///
/// Collecting from an iterator keeps the first occurrence of each URL.
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    sources: Arc<[Source]>,
}

impl SourceSet {
    /// An empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Source> {
        self.sources.iter()
    }

    pub fn as_slice(&self) -> &[Source] {
        &self.sources
    }

    /// Each source paired with its citation index, in order.
    pub fn citations(&self) -> impl Iterator<Item = (CitationIndex, &Source)> {
        self.sources.iter().enumerate().filter_map(|(i, source)| {
            CitationIndex::new(i + 1, self.sources.len()).map(|idx| (idx, source))
        })
    }

    /// Resolve a citation number to its source.
    pub fn cite(&self, index: usize) -> Option<&Source> {
        CitationIndex::new(index, self.len()).map(|idx| &self.sources[idx.position()])
    }

    /// Whether both handles point at the same underlying buffer.
    pub fn same_as(&self, other: &SourceSet) -> bool {
        Arc::ptr_eq(&self.sources, &other.sources)
    }

    /// SHA-256 over the ordered URLs; identifies exactly which sources were cited.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for source in self.sources.iter() {
            hasher.update(source.url.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

impl FromIterator<Source> for SourceSet {
    fn from_iter<I: IntoIterator<Item = Source>>(iter: I) -> Self {
        let mut seen = HashSet::new();
        let sources: Vec<Source> = iter
            .into_iter()
            .filter(|s| seen.insert(s.url.clone()))
            .collect();
        Self {
            sources: sources.into(),
        }
    }
}

impl<'a> IntoIterator for &'a SourceSet {
    type Item = &'a Source;
    type IntoIter = std::slice::Iter<'a, Source>;

    fn into_iter(self) -> Self::IntoIter {
        self.sources.iter()
    }
}

impl std::ops::Deref for SourceSet {
    type Target = [Source];

    fn deref(&self) -> &[Source] {
        &self.sources
    }
}

impl PartialEq for SourceSet {
    fn eq(&self, other: &Self) -> bool {
        self.sources[..] == other.sources[..]
    }
}

impl Eq for SourceSet {}

impl Serialize for SourceSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.sources.iter())
    }
}

impl<'de> Deserialize<'de> for SourceSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Source>::deserialize(deserializer).map(SourceSet::from_iter)
    }
}

// ---------------------------------------------------------------------------
// Chat context
// ---------------------------------------------------------------------------

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One prior message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Official data attached to the chat by the caller (a bill, a ruling, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficialData {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Everything the caller knows about the conversation besides the new question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatContext {
    #[serde(default)]
    pub prior_turns: Vec<Turn>,
    #[serde(default)]
    pub official_data: Option<OfficialData>,
    #[serde(default)]
    pub user_location: Option<String>,
}

impl ChatContext {
    /// The most recent assistant answer, or `""` before the first answer.
    pub fn last_answer(&self) -> &str {
        self.prior_turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .map(|t| t.content.as_str())
            .unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// ChatType
// ---------------------------------------------------------------------------

/// Which chat surface the question came from; selects persona and fallback text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    #[default]
    General,
    SupremeCourt,
    Bills,
    Representatives,
    Labor,
    Ethical,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::SupremeCourt => "supreme_court",
            Self::Bills => "bills",
            Self::Representatives => "representatives",
            Self::Labor => "labor",
            Self::Ethical => "ethical",
        }
    }
}

impl std::fmt::Display for ChatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChatType {
    type Err = crate::SourceboundError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "general" | "" => Ok(Self::General),
            "supreme_court" => Ok(Self::SupremeCourt),
            "bills" => Ok(Self::Bills),
            "representatives" => Ok(Self::Representatives),
            "labor" => Ok(Self::Labor),
            "ethical" => Ok(Self::Ethical),
            other => Err(crate::SourceboundError::validation(format!(
                "unknown chat type '{other}'"
            ))),
        }
    }
}
