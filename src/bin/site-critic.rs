//! CLI binary for site-critic.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `CriticConfig`, wires the default collaborators, and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use site_critic::corpus::discover_category_dirs;
use site_critic::{
    answer_question, filter_min_length, load_corpus, load_targets_file, resolve_provider,
    write_raw_segments, ChromeScreenshotSource, Collector, CriticConfig, CriticConfigBuilder,
    CriticError, CritiqueProgressCallback, CritiqueReport, LlmChat, LlmClient, OpenAiEmbedder,
    ProgressCallback, ReportState, Reporter, Target, VectorIndex, VisionSegmentAnalyzer,
};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar whose length grows as websites are segmented,
/// then is reset for the map and refine stages of a report.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len}  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn short(error: &str) -> String {
        if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        }
    }
}

impl CritiqueProgressCallback for CliProgressCallback {
    fn on_website_start(&self, url: &str, category: &str) {
        self.bar.set_prefix("Collecting");
        self.bar
            .println(format!("{} {} {}", cyan("◆"), bold(url), dim(&format!("({category})"))));
    }

    fn on_segmented(&self, website: &str, segments: usize) {
        self.bar.inc_length(segments as u64);
        self.bar.set_message(format!("{website}: {segments} segments"));
    }

    fn on_segment_complete(&self, website: &str, segment: u32, text_len: usize) {
        self.bar.println(format!(
            "  {} {:<28} segment {:>3}  {}",
            green("✓"),
            website,
            segment,
            dim(&format!("{text_len:>5} chars")),
        ));
        self.bar.inc(1);
    }

    fn on_segment_error(&self, website: &str, segment: u32, error: &str) {
        self.bar.println(format!(
            "  {} {:<28} segment {:>3}  {}",
            red("✗"),
            website,
            segment,
            red(&Self::short(error)),
        ));
        self.bar.inc(1);
    }

    fn on_website_complete(&self, website: &str, analysed: usize, failed: usize) {
        let mark = if failed == 0 { green("✔") } else { cyan("⚠") };
        self.bar.println(format!(
            "{} {}  {} analysed, {} failed",
            mark,
            bold(website),
            analysed,
            failed
        ));
    }

    fn on_website_error(&self, url: &str, error: &str) {
        self.bar
            .println(format!("{} {}  {}", red("✘"), bold(url), red(&Self::short(error))));
    }

    fn on_map_start(&self, total: usize) {
        self.bar.set_prefix("Critiquing");
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.reset_eta();
    }

    fn on_map_item(&self, position: usize, total: usize, failed: bool) {
        if failed {
            self.bar
                .println(format!("  {} segment {:>3}/{}", red("✗"), position, total));
        }
        self.bar.inc(1);
    }

    fn on_refine_step(&self, consumed: usize, total: usize) {
        if consumed == 1 {
            self.bar.set_prefix("Refining");
            self.bar.set_length(total as u64);
        }
        self.bar.set_position(consumed as u64);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Capture, analyse and index a site and two competitors
  site-critic collect --target https://example.com \
      --competitor https://rival-a.com --competitor https://rival-b.com

  # Same, from a JSON file: {"target": [...], "competitors": [...]}
  site-critic collect --targets-file sites.json

  # Full critique report of the target site(s)
  site-critic report

  # One question answered from the indexed segments
  site-critic ask "How visible is the pricing CTA?"

  # Interactive session ('report' runs a report, 'quit' leaves)
  site-critic chat

OUTPUT LAYOUT (under --output-root):
  <category>_websites/<domain>/segment_N.png   screenshot slices
  <category>_websites/<domain>/results.txt     compiled analyses
  combined_vectorstore/index.json              similarity index
  raw_segments/raw_segments_<ts>.txt           report input dump
  reports/website_analysis_<ts>.txt            final reports

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (vision, chat and embeddings)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  CHROME_PATH             Chrome/Chromium executable for screenshots
  RUST_LOG                Log filter, overrides --verbose / --quiet

A .env file in the working directory is loaded on startup.
"#;

/// Critique websites with Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "site-critic",
    version,
    about = "Segment website screenshots, critique them with Vision LLMs, and report",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// LLM model ID (must accept images for `collect`).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Directory holding website folders, the index and reports.
    #[arg(long, global = true, env = "SITE_CRITIC_OUTPUT_ROOT", default_value = ".")]
    output_root: PathBuf,

    /// Concurrent model calls per stage.
    #[arg(short, long, global = true, env = "SITE_CRITIC_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// Process-wide cap on in-flight model calls.
    #[arg(long, global = true, env = "SITE_CRITIC_MAX_INFLIGHT")]
    max_inflight: Option<usize>,

    /// Max LLM output tokens per call.
    #[arg(long, global = true, env = "SITE_CRITIC_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Temperature for analysis and report calls (0.0–2.0).
    #[arg(long, global = true, env = "SITE_CRITIC_TEMPERATURE", default_value_t = 0.5)]
    temperature: f32,

    /// Retries per model call.
    #[arg(long, global = true, env = "SITE_CRITIC_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call model timeout in seconds.
    #[arg(long, global = true, env = "SITE_CRITIC_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Embedding model for the similarity index.
    #[arg(
        long,
        global = true,
        env = "SITE_CRITIC_EMBEDDING_MODEL",
        default_value = "text-embedding-3-small"
    )]
    embedding_model: String,

    /// Base URL of the OpenAI-compatible embeddings API.
    #[arg(
        long,
        global = true,
        env = "SITE_CRITIC_EMBEDDING_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    embedding_base_url: String,

    /// Disable progress bar.
    #[arg(long, global = true, env = "SITE_CRITIC_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SITE_CRITIC_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "SITE_CRITIC_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture, segment and analyse websites, then rebuild the index.
    Collect(CollectArgs),
    /// Rebuild the similarity index from every compiled artifact.
    Index,
    /// Map-reduce critique report over the target websites.
    Report(ReportArgs),
    /// Answer one question from the indexed segments.
    Ask(AskArgs),
    /// Interactive question loop.
    Chat(AskArgs),
}

#[derive(Args, Debug)]
struct CollectArgs {
    /// Website to critique (category "target"). Repeatable.
    #[arg(long = "target", env = "SITE_CRITIC_TARGETS", value_delimiter = ',')]
    targets: Vec<String>,

    /// Competitor website (category "competitors"). Repeatable.
    #[arg(long = "competitor", env = "SITE_CRITIC_COMPETITORS", value_delimiter = ',')]
    competitors: Vec<String>,

    /// JSON file mapping category → list of URLs.
    #[arg(long, env = "SITE_CRITIC_TARGETS_FILE")]
    targets_file: Option<PathBuf>,

    /// Segment height in screenshot pixels.
    #[arg(long, env = "SITE_CRITIC_SEGMENT_HEIGHT", default_value_t = 2000)]
    segment_height: u32,

    /// Rows shared by consecutive segments.
    #[arg(long, env = "SITE_CRITIC_OVERLAP", default_value_t = 50)]
    overlap: u32,

    /// Browser viewport width in CSS pixels.
    #[arg(long, env = "SITE_CRITIC_VIEWPORT_WIDTH", default_value_t = 1280)]
    viewport_width: u32,

    /// Maximum captured page height in CSS pixels.
    #[arg(long, env = "SITE_CRITIC_CAPTURE_HEIGHT", default_value_t = 12000)]
    capture_height: u32,

    /// Device pixel ratio of the capture (1–4).
    #[arg(long, env = "SITE_CRITIC_SCALE", default_value_t = 2)]
    scale: u32,

    /// Screenshot timeout in seconds.
    #[arg(long, env = "SITE_CRITIC_CAPTURE_TIMEOUT", default_value_t = 90)]
    capture_timeout: u64,

    /// Chrome/Chromium executable (default: auto-detect).
    #[arg(long, env = "CHROME_PATH")]
    chrome: Option<PathBuf>,

    /// Run the browser without its sandbox (needed as root in containers).
    #[arg(long, env = "SITE_CRITIC_NO_SANDBOX")]
    no_sandbox: bool,

    /// Path to a text file with a custom vision analysis prompt.
    #[arg(long, env = "SITE_CRITIC_ANALYSIS_PROMPT")]
    analysis_prompt: Option<PathBuf>,

    /// Skip rebuilding the similarity index afterwards.
    #[arg(long)]
    skip_index: bool,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Category whose websites are reported on.
    #[arg(long, env = "SITE_CRITIC_REPORT_CATEGORY", default_value = "target")]
    category: String,

    /// Segments shorter than this many characters are ignored.
    #[arg(long, env = "SITE_CRITIC_MIN_CHARS", default_value_t = 100)]
    min_chars: usize,
}

#[derive(Args, Debug)]
struct AskArgs {
    /// The question (`ask` only).
    question: Option<String>,

    /// Segments retrieved as context.
    #[arg(long, env = "SITE_CRITIC_TOP_K", default_value_t = 2)]
    top_k: usize,

    /// Temperature for answers.
    #[arg(long, env = "SITE_CRITIC_QA_TEMPERATURE", default_value_t = 0.7)]
    qa_temperature: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let common = &cli.common;

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO logs are suppressed while the progress bar is active.
    let interactive = matches!(cli.command, Command::Chat(_) | Command::Ask(_));
    let show_progress = !common.quiet && !common.no_progress && !interactive;
    let filter = if common.verbose {
        "debug"
    } else if common.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Collect(args) => run_collect(common, args, show_progress).await,
        Command::Index => {
            let config = config_builder(common, None).build()?;
            rebuild_index(&config, common.quiet).await
        }
        Command::Report(args) => {
            let progress = show_progress.then(CliProgressCallback::new);
            let config = config_builder(common, progress.clone().map(|p| p as ProgressCallback))
                .min_segment_chars(args.min_chars)
                .build()?;
            let result = run_report(&config, &args.category).await;
            if let Some(p) = progress {
                p.finish();
            }
            result.map(|_| ())
        }
        Command::Ask(args) => {
            let question = args
                .question
                .as_deref()
                .context("`ask` needs a question argument")?;
            let config = qa_config(common, args)?;
            let session = QaSession::open(&config).await?;
            session.ask(question).await
        }
        Command::Chat(args) => run_chat(&qa_config(common, args)?).await,
    }
}

/// Map the global CLI args onto a `CriticConfigBuilder`.
fn config_builder(common: &CommonArgs, progress: Option<ProgressCallback>) -> CriticConfigBuilder {
    let mut builder = CriticConfig::builder()
        .output_root(&common.output_root)
        .concurrency(common.concurrency)
        .max_tokens(common.max_tokens)
        .temperature(common.temperature)
        .max_retries(common.max_retries)
        .api_timeout_secs(common.api_timeout)
        .embedding_model(&common.embedding_model)
        .embedding_base_url(&common.embedding_base_url);

    if let Some(n) = common.max_inflight {
        builder = builder.max_inflight_calls(n);
    }
    if let Some(ref model) = common.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = common.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder
}

fn qa_config(common: &CommonArgs, args: &AskArgs) -> Result<CriticConfig> {
    config_builder(common, None)
        .qa_top_k(args.top_k)
        .qa_temperature(args.qa_temperature)
        .build()
        .context("Invalid configuration")
}

fn llm_client(config: &CriticConfig) -> Result<LlmClient> {
    let provider = resolve_provider(config).context("Could not initialise the LLM provider")?;
    Ok(LlmClient::new(provider, config))
}

// ── collect ──────────────────────────────────────────────────────────────────

async fn run_collect(common: &CommonArgs, args: &CollectArgs, show_progress: bool) -> Result<()> {
    let mut targets: Vec<Target> = Vec::new();
    if let Some(ref path) = args.targets_file {
        targets.extend(load_targets_file(path).context("Failed to read targets file")?);
    }
    targets.extend(args.targets.iter().map(|u| Target::new(u, "target")));
    targets.extend(args.competitors.iter().map(|u| Target::new(u, "competitors")));
    if targets.is_empty() {
        anyhow::bail!("No websites given: use --target, --competitor or --targets-file");
    }

    let progress = show_progress.then(CliProgressCallback::new);
    let mut builder = config_builder(common, progress.clone().map(|p| p as ProgressCallback))
        .segment_height(args.segment_height)
        .overlap(args.overlap)
        .viewport_width(args.viewport_width)
        .capture_height(args.capture_height)
        .device_scale_factor(args.scale)
        .capture_timeout_secs(args.capture_timeout);
    if let Some(ref path) = args.analysis_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read analysis prompt from {path:?}"))?;
        builder = builder.analysis_prompt(prompt);
    }
    let config = builder.build().context("Invalid configuration")?;

    let client = llm_client(&config)?;
    let analyzer = VisionSegmentAnalyzer::new(client, &config);
    let mut source = ChromeScreenshotSource::new(&config).with_no_sandbox(args.no_sandbox);
    if let Some(ref chrome) = args.chrome {
        source = source.with_executable(chrome);
    }

    let collector = Collector::new(Arc::new(source), Arc::new(analyzer), config.clone());
    let summary = collector.process_all(&targets).await;
    if let Some(p) = progress {
        p.finish();
    }

    if !common.quiet {
        for outcome in &summary.completed {
            eprintln!(
                "{}  {:<30} {} analysed, {} failed  {}ms  →  {}",
                if outcome.failed == 0 { green("✔") } else { cyan("⚠") },
                outcome.website,
                outcome.analysed,
                outcome.failed,
                outcome.duration_ms,
                dim(&outcome.artifact.display().to_string()),
            );
        }
        for failure in &summary.failures {
            eprintln!("{}  {}  {}", red("✘"), failure.url, red(&failure.error));
        }
    }

    if summary.completed.is_empty() {
        anyhow::bail!("Every website failed; nothing was compiled");
    }

    if !args.skip_index {
        rebuild_index(&config, common.quiet).await?;
    }
    Ok(())
}

// ── index ────────────────────────────────────────────────────────────────────

async fn rebuild_index(config: &CriticConfig, quiet: bool) -> Result<()> {
    let dirs = discover_category_dirs(&config.output_root);
    let load = load_corpus(&dirs);
    if load.documents.is_empty() {
        anyhow::bail!(
            "No compiled artifacts under {}; run `collect` first",
            config.output_root.display()
        );
    }

    let embedder = OpenAiEmbedder::from_config(config).context("Embeddings are not configured")?;
    let count = load.documents.len();
    let index = VectorIndex::build(
        load.documents,
        &embedder,
        config.embedding_batch_size,
        config.embedding_token_limit,
    )
    .await
    .context("Failed to build the similarity index")?;
    let path = index
        .save(&config.index_dir())
        .await
        .context("Failed to save the similarity index")?;

    if !quiet {
        eprintln!(
            "{}  indexed {} segments  →  {}",
            green("✔"),
            count,
            bold(&path.display().to_string())
        );
    }
    Ok(())
}

// ── report ───────────────────────────────────────────────────────────────────

async fn run_report(config: &CriticConfig, category: &str) -> Result<CritiqueReport> {
    let dirs = BTreeMap::from([(category.to_string(), config.category_dir(category))]);
    let load = load_corpus(&dirs);
    let docs = filter_min_length(load.documents, config.min_segment_chars);
    if docs.is_empty() {
        anyhow::bail!(
            "No {category} segments with at least {} characters; run `collect` first",
            config.min_segment_chars
        );
    }
    write_raw_segments(&config.raw_segments_dir(), &docs)
        .await
        .context("Failed to save raw segments")?;

    let reporter = Reporter::from_client(llm_client(config)?, config);
    let analyses = tokio::select! {
        analyses = reporter.map(&docs) => analyses,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("Interrupted during the map stage"),
    };

    let mut state = ReportState::default();
    let outcome = tokio::select! {
        result = reporter.reduce_into(&mut state, &analyses) => result.map_err(Some),
        _ = tokio::signal::ctrl_c() => Err(None),
    };

    let report = CritiqueReport::from_state(analyses, &state);
    match outcome {
        Ok(()) => {
            let path = report
                .write_report(&config.reports_dir())
                .await
                .context("Failed to write report")?;
            println!("{}", report.render());
            eprintln!("{}  report saved to {}", green("✔"), bold(&path.display().to_string()));
            Ok(report)
        }
        Err(cause) => {
            if !state.is_empty() {
                let path = report
                    .write_report(&config.reports_dir())
                    .await
                    .context("Failed to write partial report")?;
                eprintln!(
                    "{}  partial report ({} of {} analyses) saved to {}",
                    cyan("⚠"),
                    report.documents_consumed,
                    report.reducible,
                    bold(&path.display().to_string())
                );
            }
            match cause {
                Some(e) => Err(anyhow::Error::new(e).context("Report generation failed")),
                None => anyhow::bail!("Interrupted during the reduce stage"),
            }
        }
    }
}

// ── ask / chat ───────────────────────────────────────────────────────────────

struct QaSession {
    index: VectorIndex,
    embedder: OpenAiEmbedder,
    chat: LlmChat,
    top_k: usize,
}

impl QaSession {
    async fn open(config: &CriticConfig) -> Result<Self> {
        let index = VectorIndex::load(&config.index_dir())
            .await
            .context("No similarity index found; run `collect` or `index` first")?;
        let embedder = OpenAiEmbedder::from_config(config).context("Embeddings are not configured")?;
        let chat = LlmChat::new(llm_client(config)?, config);
        Ok(Self {
            index,
            embedder,
            chat,
            top_k: config.qa_top_k,
        })
    }

    async fn ask(&self, question: &str) -> Result<()> {
        let answer = answer_question(&self.index, &self.embedder, &self.chat, question, self.top_k)
            .await
            .context("Failed to answer the question")?;
        println!("{}", answer.text);
        let sources: Vec<String> = answer
            .sources
            .iter()
            .map(|d| format!("{}#{}", d.metadata.website, d.metadata.segment_index))
            .collect();
        eprintln!("{}", dim(&format!("sources: {}", sources.join(", "))));
        Ok(())
    }
}

async fn run_chat(config: &CriticConfig) -> Result<()> {
    let session = QaSession::open(config).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{} ", bold("Ask a question ('report' for a full report, 'quit' to exit):"));
        io::stdout().flush().ok();

        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let input = line.trim();
        match input.to_lowercase().as_str() {
            "" => continue,
            "quit" | "exit" | "q" => break,
            "report" => {
                if let Err(e) = run_report(config, "target").await {
                    eprintln!("{} {:#}", red("✘"), e);
                }
            }
            _ => {
                if let Err(e) = session.ask(input).await {
                    match e.downcast_ref::<CriticError>() {
                        Some(CriticError::NoSegments { .. }) => {
                            eprintln!("{} the index is empty", red("✘"))
                        }
                        _ => eprintln!("{} {:#}", red("✘"), e),
                    }
                }
            }
        }
    }
    Ok(())
}
