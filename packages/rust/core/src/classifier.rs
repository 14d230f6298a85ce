//! Decides whether a question needs freshly retrieved sources.
//!
//! The decision is the OR of independent keyword signals evaluated against
//! lower-cased text. No signal means `false`; there is no error path.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// One reason a query was judged time-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// Recency words or date-like tokens in the query or prior answer.
    Temporal,
    /// The prior answer admitted it lacked the information.
    PriorUncertainty,
    CampaignFinance,
    CurrentEvent,
    LocalGovernment,
    PolicyTopic,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temporal => "temporal",
            Self::PriorUncertainty => "prior_uncertainty",
            Self::CampaignFinance => "campaign_finance",
            Self::CurrentEvent => "current_event",
            Self::LocalGovernment => "local_government",
            Self::PolicyTopic => "policy_topic",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Patterns (compiled once, matched against lower-cased text)
// ---------------------------------------------------------------------------

static RECENCY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(latest|today|tonight|tomorrow|yesterday|currently|current|recent|recently|now|this (week|month|year|morning|evening|afternoon)|as of)\b",
    )
    .expect("recency regex")
});

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(19|20)\d{2}\b|\b(jan(uary)?|feb(ruary)?|mar(ch)?|apr(il)?|may|june?|july?|aug(ust)?|sept?(ember)?|oct(ober)?|nov(ember)?|dec(ember)?)\.? \d{1,2}(st|nd|rd|th)?\b|\b\d{1,2}/\d{1,2}(/\d{2,4})?\b|\b\d{4}-\d{2}-\d{2}\b",
    )
    .expect("date regex")
});

static UNCERTAINTY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"don't have|do not have|not available|no information|i'm not sure|i am not sure|i don't know|unable to provide|knowledge cutoff|training data|cannot find|can't find",
    )
    .expect("uncertainty regex")
});

static CAMPAIGN_FINANCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(donors?|donations?|contributions?|campaign finance|super pacs?|pacs?|fundrais\w*|funding|lobbyists?|lobbying|dark money)\b",
    )
    .expect("campaign finance regex")
});

static CURRENT_EVENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(elections?|elected|vote[sd]?|voting|voters?|polls?|ballots?|bills?|legislation|congress|senate|house|governor|primary|primaries|runoff|amendments?|constitution|constitutional|repeal(ed)?|supreme court|scotus|courts?|rulings?)\b",
    )
    .expect("current event regex")
});

static LOCAL_GOV_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(nyc|new york city|manhattan|brooklyn|queens|bronx|staten island|city council|city|municipal|borough|boroughs|mayor|mayoral|local)\b",
    )
    .expect("local government regex")
});

static POLICY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(welfare|healthcare|health care|medicaid|medicare|social security|snap|food stamps?|tax|taxes|labor|unions?|workers?|wages?|immigration|border|climate|environment|environmental|policy|policies)\b",
    )
    .expect("policy regex")
});

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Every signal that fires for `query`, in declaration order.
///
/// `prior_answer` is the most recent generated answer, or `""` before the
/// first one. Only the temporal and uncertainty signals look at it.
pub fn classify(query: &str, prior_answer: &str) -> Vec<Signal> {
    let query = query.to_lowercase();
    let prior = prior_answer.to_lowercase();

    let temporal = |text: &str| RECENCY_RE.is_match(text) || DATE_RE.is_match(text);

    let checks = [
        (Signal::Temporal, temporal(&query) || temporal(&prior)),
        (Signal::PriorUncertainty, UNCERTAINTY_RE.is_match(&prior)),
        (Signal::CampaignFinance, CAMPAIGN_FINANCE_RE.is_match(&query)),
        (Signal::CurrentEvent, CURRENT_EVENT_RE.is_match(&query)),
        (Signal::LocalGovernment, LOCAL_GOV_RE.is_match(&query)),
        (Signal::PolicyTopic, POLICY_RE.is_match(&query)),
    ];

    checks
        .into_iter()
        .filter_map(|(signal, fired)| fired.then_some(signal))
        .collect()
}

/// Whether the query needs externally retrieved, time-sensitive sources.
pub fn needs_current_info(query: &str, prior_answer: &str) -> bool {
    !classify(query, prior_answer).is_empty()
}
