//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use sourcebound_core::{
    ChatCompletionsGenerator, Collaborators, ConversationContextExtractor, GapConfig,
    Observability, Pipeline, PipelineEvent, PipelineResult, PipelineState, TracingObserver,
    analyze_count, classify, fallback_message,
};
use sourcebound_search::{DuckDuckGoSearch, OpenSecretsLookup};
use sourcebound_shared::{
    AppConfig, ChatContext, ChatType, FinanceProvider, LlmConfig, PipelineConfig, SearchConfig,
    SourceboundError, init_config, load_config, validate_api_key,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Sourcebound: answers with citations you can trust.
#[derive(Parser)]
#[command(
    name = "sourcebound",
    version,
    about = "Answer policy questions with citations bound to the exact sources the model saw.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Answer a question with validated, numbered sources.
    Ask {
        /// The question to answer.
        question: String,

        /// Chat surface: general, supreme_court, bills, representatives, labor, ethical.
        #[arg(short, long, default_value = "general")]
        chat_type: String,

        /// JSON file with prior conversation context.
        #[arg(long)]
        history: Option<PathBuf>,

        /// User location passed to the model.
        #[arg(long)]
        location: Option<String>,

        /// Model identifier (overrides config).
        #[arg(short, long)]
        model: Option<String>,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show which signals mark a question as time-sensitive.
    Classify {
        /// The question to classify.
        question: String,

        /// The previous answer, if any.
        #[arg(long, default_value = "")]
        prior: String,
    },

    /// Show the follow-up searches gap analysis would run.
    Gaps {
        /// The original query.
        query: String,

        /// Number of unique sources already found.
        #[arg(short, long, default_value = "0")]
        sources: usize,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sourcebound=warn",
        1 => "sourcebound=info",
        2 => "sourcebound=debug",
        _ => "sourcebound=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let quiet = matches!(cli.log_format, LogFormat::Json);
    match cli.command {
        Command::Ask {
            question,
            chat_type,
            history,
            location,
            model,
            json,
        } => {
            let opts = AskOptions {
                chat_type: chat_type.parse()?,
                history,
                location,
                model,
                json,
                spinner: !json && !quiet,
            };
            cmd_ask(&question, opts).await
        }
        Command::Classify { question, prior } => cmd_classify(&question, &prior),
        Command::Gaps { query, sources } => cmd_gaps(&query, sources),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// ask
// ---------------------------------------------------------------------------

struct AskOptions {
    chat_type: ChatType,
    history: Option<PathBuf>,
    location: Option<String>,
    model: Option<String>,
    json: bool,
    spinner: bool,
}

async fn cmd_ask(question: &str, opts: AskOptions) -> Result<()> {
    let config = load_config()?;
    validate_api_key(&config)?;

    let mut context = match &opts.history {
        Some(path) => read_history(path)?,
        None => ChatContext::default(),
    };
    if opts.location.is_some() {
        context.user_location = opts.location.clone();
    }

    let mut llm = LlmConfig::from(&config);
    if let Some(model) = &opts.model {
        llm.model = model.clone();
    }

    let observer: Arc<dyn Observability> = if opts.spinner {
        Arc::new(CliProgress::new())
    } else {
        Arc::new(TracingObserver)
    };

    let search = SearchConfig::from(&config);
    let finance: Option<Arc<dyn FinanceProvider>> = if search.finance_endpoint.trim().is_empty() {
        None
    } else {
        Some(Arc::new(OpenSecretsLookup::new(&search)?))
    };

    let pipeline = Pipeline::new(
        &PipelineConfig::from(&config),
        Collaborators {
            search: Arc::new(DuckDuckGoSearch::new(search)?),
            finance,
            context: Arc::new(ConversationContextExtractor),
            generator: Arc::new(ChatCompletionsGenerator::new(llm)?),
            observer,
        },
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    info!(model = pipeline.model(), chat_type = %opts.chat_type, "asking");

    match pipeline.run(question, &context, opts.chat_type, &cancel).await {
        Ok(result) if opts.json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Ok(result) => {
            print_answer(&result);
            Ok(())
        }
        Err(SourceboundError::Cancelled) => Err(eyre!("cancelled")),
        Err(e @ SourceboundError::Generation(_)) => {
            warn!(error = %e, "generation failed");
            eprintln!("{}", fallback_message(opts.chat_type));
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn read_history(path: &Path) -> Result<ChatContext> {
    let raw = std::fs::read_to_string(path).map_err(|e| SourceboundError::io(path, e))?;
    serde_json::from_str(&raw).map_err(|e| eyre!("invalid history file '{}': {e}", path.display()))
}

fn print_answer(result: &PipelineResult) {
    println!();
    println!("{}", result.answer_text);

    if !result.sources.is_empty() {
        println!();
        println!("  Sources:");
        for (index, source) in result.sources.citations() {
            let marker = if source.trusted { " (trusted)" } else { "" };
            println!("  {index} {}{marker}", source.title);
            println!("      {}", source.url);
        }
    }

    let report = &result.report;
    println!();
    println!(
        "  {} sources, {} follow-up searches, {:.1}s",
        result.sources.len(),
        report.follow_up_queries.len(),
        report.elapsed_ms as f64 / 1000.0
    );
    if report.hallucinated_citations_removed > 0 {
        println!(
            "  Removed {} citation(s) outside [1]..[{}]",
            report.hallucinated_citations_removed,
            result.sources.len()
        );
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Observer that drives an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl Observability for CliProgress {
    fn record(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Transition {
                to: PipelineState::Done,
                ..
            } => self.spinner.finish_and_clear(),
            PipelineEvent::Transition { to, .. } => {
                self.spinner.set_message(to.label().to_string());
            }
            PipelineEvent::SearchCompleted { query, results } => {
                self.spinner
                    .set_message(format!("Searched \"{query}\" ({results} results)"));
            }
            PipelineEvent::RetrievalFailed { operation, .. } => {
                self.spinner
                    .set_message(format!("{operation} failed, continuing"));
            }
            _ => {}
        }
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

// ---------------------------------------------------------------------------
// classify / gaps
// ---------------------------------------------------------------------------

fn cmd_classify(question: &str, prior: &str) -> Result<()> {
    let signals = classify(question, prior);
    if signals.is_empty() {
        println!("no search needed (no signals)");
    } else {
        let names: Vec<&str> = signals.iter().map(|s| s.as_str()).collect();
        println!("search needed: {}", names.join(", "));
    }
    Ok(())
}

fn cmd_gaps(query: &str, sources: usize) -> Result<()> {
    let config = load_config()?;
    let gaps = GapConfig::from(&PipelineConfig::from(&config));
    let result = analyze_count(sources, query, &gaps);

    if !result.needs_more_data {
        println!("no follow-up searches ({sources} sources, threshold {})", gaps.threshold);
        return Ok(());
    }
    for (i, q) in result.follow_up_queries.iter().enumerate() {
        println!("  {}. {q}", i + 1);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
