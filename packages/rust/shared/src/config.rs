//! Application configuration for Sourcebound.
//!
//! User config lives at `~/.sourcebound/sourcebound.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SourceboundError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sourcebound.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sourcebound";

// ---------------------------------------------------------------------------
// Config structs (matching sourcebound.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Retrieval and citation limits.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Per-collaborator deadlines.
    #[serde(default)]
    pub timeouts: TimeoutsSection,

    /// Web search adapter.
    #[serde(default)]
    pub search: SearchSection,

    /// Chat-completions endpoint.
    #[serde(default)]
    pub llm: LlmSection,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Unique-source count below which gap analysis asks for more.
    #[serde(default = "default_source_threshold")]
    pub source_threshold: usize,

    /// Cap on follow-up queries from one gap analysis.
    #[serde(default = "default_max_followup_queries")]
    pub max_followup_queries: usize,

    /// Cap on templates taken from a single matching topic category.
    #[serde(default = "default_templates_per_category")]
    pub templates_per_category: usize,

    /// Excerpt length limit in the citation block, in characters.
    #[serde(default = "default_max_excerpt_chars")]
    pub max_excerpt_chars: usize,

    /// Substrings that mark a URL as a search-results page.
    #[serde(default = "default_disallowed_url_patterns")]
    pub disallowed_url_patterns: Vec<String>,

    /// Hosts (and their subdomains) that only serve search results.
    #[serde(default = "default_search_result_domains")]
    pub search_result_domains: Vec<String>,

    /// Hosts whose articles are flagged as trusted.
    #[serde(default = "default_trusted_domains")]
    pub trusted_domains: Vec<String>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            source_threshold: default_source_threshold(),
            max_followup_queries: default_max_followup_queries(),
            templates_per_category: default_templates_per_category(),
            max_excerpt_chars: default_max_excerpt_chars(),
            disallowed_url_patterns: default_disallowed_url_patterns(),
            search_result_domains: default_search_result_domains(),
            trusted_domains: default_trusted_domains(),
        }
    }
}

fn default_source_threshold() -> usize {
    12
}
fn default_max_followup_queries() -> usize {
    5
}
fn default_templates_per_category() -> usize {
    5
}
fn default_max_excerpt_chars() -> usize {
    200
}
fn default_disallowed_url_patterns() -> Vec<String> {
    ["/search?q=", "google.com/search", "bing.com/search", "duckduckgo.com"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_search_result_domains() -> Vec<String> {
    ["duckduckgo.com", "search.yahoo.com", "search.brave.com"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_trusted_domains() -> Vec<String> {
    [
        "democracynow.org",
        "dropsitenews.com",
        "theintercept.com",
        "propublica.org",
        "commondreams.org",
        "truthout.org",
        "zeteo.com",
        "breakingpoints.com",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// `[timeouts]` section. All values in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsSection {
    #[serde(default = "default_search_secs")]
    pub search_secs: u64,

    #[serde(default = "default_context_secs")]
    pub context_secs: u64,

    #[serde(default = "default_generation_secs")]
    pub generation_secs: u64,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            search_secs: default_search_secs(),
            context_secs: default_context_secs(),
            generation_secs: default_generation_secs(),
        }
    }
}

fn default_search_secs() -> u64 {
    15
}
fn default_context_secs() -> u64 {
    5
}
fn default_generation_secs() -> u64 {
    60
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSection {
    /// Base URL of the HTML results endpoint.
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// Maximum results kept per query.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Campaign-finance profile site. Empty disables the finance lookup.
    #[serde(default = "default_finance_endpoint")]
    pub finance_endpoint: String,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            max_results: default_max_results(),
            finance_endpoint: default_finance_endpoint(),
        }
    }
}

fn default_search_endpoint() -> String {
    "https://html.duckduckgo.com".into()
}
fn default_max_results() -> usize {
    8
}
fn default_finance_endpoint() -> String {
    "https://www.opensecrets.org".into()
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSection {
    /// Full chat-completions URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model identifier sent with each request.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_api_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".into()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "qwen/qwen-2.5-72b-instruct".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1500
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config file + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source_threshold: usize,
    pub max_followup_queries: usize,
    pub templates_per_category: usize,
    pub max_excerpt_chars: usize,
    pub disallowed_url_patterns: Vec<String>,
    pub search_result_domains: Vec<String>,
    pub trusted_domains: Vec<String>,
    pub search_timeout: Duration,
    pub context_timeout: Duration,
    pub generation_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        let p = &config.pipeline;
        Self {
            source_threshold: p.source_threshold,
            max_followup_queries: p.max_followup_queries,
            templates_per_category: p.templates_per_category,
            max_excerpt_chars: p.max_excerpt_chars,
            disallowed_url_patterns: p.disallowed_url_patterns.clone(),
            search_result_domains: p.search_result_domains.clone(),
            trusted_domains: p.trusted_domains.clone(),
            search_timeout: Duration::from_secs(config.timeouts.search_secs),
            context_timeout: Duration::from_secs(config.timeouts.context_secs),
            generation_timeout: Duration::from_secs(config.timeouts.generation_secs),
        }
    }
}

/// Runtime search adapter configuration.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    pub max_results: usize,
    pub finance_endpoint: String,
    /// HTTP-level timeout; the pipeline applies its own deadline on top.
    pub timeout: Duration,
}

impl From<&AppConfig> for SearchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            endpoint: config.search.endpoint.clone(),
            max_results: config.search.max_results,
            finance_endpoint: config.search.finance_endpoint.clone(),
            timeout: Duration::from_secs(config.timeouts.search_secs),
        }
    }
}

/// Runtime generator configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl From<&AppConfig> for LlmConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            api_url: config.llm.api_url.clone(),
            api_key_env: config.llm.api_key_env.clone(),
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            timeout: Duration::from_secs(config.timeouts.generation_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sourcebound/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SourceboundError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sourcebound/sourcebound.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SourceboundError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        SourceboundError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SourceboundError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SourceboundError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SourceboundError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the LLM API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(SourceboundError::config(format!(
            "LLM API key not found. Set the {var_name} environment variable."
        ))),
    }
}
