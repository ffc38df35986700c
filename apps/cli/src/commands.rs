//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use councilwatch_core::{
    Crawler, DocumentPipeline, ProgressReporter, RateLimiter, sources_from_config,
};
use councilwatch_extract::PopplerTools;
use councilwatch_shared::{
    AppConfig, CrawlConfig, DocumentsConfig, init_config, load_config, load_config_from,
};
use councilwatch_sources::http_client;
use councilwatch_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// CouncilWatch — keep a searchable archive of council meetings.
#[derive(Parser)]
#[command(
    name = "councilwatch",
    version,
    about = "Incrementally archive municipal meeting agendas and the documents they link to.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.councilwatch/councilwatch.toml).
    #[arg(long, global = true, env = "COUNCILWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database path, overriding `[database] path`.
    #[arg(long, global = true, env = "COUNCILWATCH_DB")]
    pub db: Option<PathBuf>,

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
    /// List every source and save agendas that are due for a re-check.
    Crawl,

    /// Fetch and extract a batch of the discovered document backlog.
    Documents,

    /// Full-text search over agendas (or documents).
    Search {
        /// FTS5 query.
        query: String,

        /// Search extracted documents instead of agendas.
        #[arg(long)]
        documents: bool,

        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Show a meeting and its version history.
    Meeting {
        /// Meeting ID.
        id: String,
    },

    /// List meetings whose agendas link to a document URL.
    Citing {
        url: String,
    },

    /// Store counts and recent runs.
    Status {
        /// Number of recent runs to show.
        #[arg(long, default_value = "5")]
        runs: u32,
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
        0 => "councilwatch=info",
        1 => "councilwatch=debug",
        _ => "councilwatch=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&resolve_config(&cli)?),
        };
    }

    let config = resolve_config(&cli)?;
    let db = PathBuf::from(&config.database.path);
    match cli.command {
        Command::Crawl => cmd_crawl(&config, &db).await,
        Command::Documents => cmd_documents(&config, &db).await,
        Command::Search {
            query,
            documents,
            limit,
        } => cmd_search(&db, &query, documents, limit).await,
        Command::Meeting { id } => cmd_meeting(&db, &id).await,
        Command::Citing { url } => cmd_citing(&db, &url).await,
        Command::Status { runs } => cmd_status(&db, runs).await,
        Command::Config { .. } => Ok(()),
    }
}

/// Load the config file and apply CLI overrides.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    apply_overrides(&mut config, cli);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(db) = &cli.db {
        config.database.path = db.to_string_lossy().into_owned();
    }
}

/// A token cancelled by ctrl-c or, when configured, the run deadline.
fn run_deadline(max_run: Option<Duration>) -> CancellationToken {
    let cancel = CancellationToken::new();

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            on_signal.cancel();
        }
    });

    if let Some(limit) = max_run {
        let on_deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            warn!(secs = limit.as_secs(), "run deadline reached, stopping");
            on_deadline.cancel();
        });
    }
    cancel
}

// ---------------------------------------------------------------------------
// Run commands
// ---------------------------------------------------------------------------

async fn cmd_crawl(config: &AppConfig, db: &Path) -> Result<()> {
    let crawl = CrawlConfig::from(config);
    let storage = Storage::open(db).await?;

    let client = http_client(crawl.request_timeout)?;
    let sources = sources_from_config(config, client)?;
    let limiter = Arc::new(RateLimiter::new(crawl.requests_per_second, crawl.burst));
    let cancel = run_deadline(crawl.max_run);

    info!(db = %db.display(), sources = sources.len(), "crawling");
    let crawler = Crawler::new(sources, limiter, crawl);
    let mut rng = StdRng::from_os_rng();
    let reporter = CliProgress::new();
    let stats = crawler.run(&storage, &mut rng, &cancel, &reporter).await;
    reporter.spinner.finish_and_clear();
    let stats = stats?;

    println!();
    println!("  Crawl complete");
    println!("  Listed:        {}", stats.listed);
    println!("  Fresh:         {}", stats.skipped_fresh);
    println!("  Saved:         {}", stats.saved);
    println!("  New versions:  {}", stats.new_versions);
    println!("  New agendas:   {}", stats.new_contents);
    println!("  New documents: {}", stats.new_document_urls);
    println!();
    Ok(())
}

async fn cmd_documents(config: &AppConfig, db: &Path) -> Result<()> {
    let crawl = CrawlConfig::from(config);
    let documents = DocumentsConfig::from(config);
    let storage = Storage::open(db).await?;

    let client = http_client(documents.fetch_timeout)?;
    let limiter = Arc::new(RateLimiter::new(crawl.requests_per_second, crawl.burst));
    let cancel = run_deadline(crawl.max_run);

    info!(db = %db.display(), batch = documents.batch_size, "processing document backlog");
    let pipeline = DocumentPipeline::new(client, Box::new(PopplerTools), limiter, documents);
    let reporter = CliProgress::new();
    let stats = pipeline.run(&storage, &cancel, &reporter).await;
    reporter.spinner.finish_and_clear();
    let stats = stats?;

    println!();
    println!("  Documents processed");
    println!("  Processed:    {}", stats.processed);
    println!("  Extracted:    {}", stats.extracted);
    println!("  Deduplicated: {}", stats.deduplicated);
    println!("  Failed:       {}", stats.failed);
    println!("  Remaining:    {}", stats.remaining);
    if stats.budget_exhausted {
        println!("  (run budget spent; the rest continues next run)");
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Query commands
// ---------------------------------------------------------------------------

async fn cmd_search(db: &Path, query: &str, documents: bool, limit: u32) -> Result<()> {
    let storage = Storage::open_readonly(db).await?;

    if documents {
        let hits = storage.search_documents(query, limit).await?;
        if hits.is_empty() {
            println!("No documents match '{query}'.");
        }
        for hit in hits {
            let title = if hit.title.is_empty() { "(untitled)" } else { hit.title.as_str() };
            println!("{title}");
            println!("    {}", hit.url.as_deref().unwrap_or("-"));
        }
    } else {
        let hits = storage.search_agendas(query, limit).await?;
        if hits.is_empty() {
            println!("No agendas match '{query}'.");
        }
        for hit in hits {
            println!("{}  {}", hit.date, hit.kind);
            println!("    {}", hit.agenda_url.as_deref().unwrap_or(&hit.meeting_id));
        }
    }
    Ok(())
}

async fn cmd_meeting(db: &Path, id: &str) -> Result<()> {
    let storage = Storage::open_readonly(db).await?;
    let record = storage
        .meeting(id)
        .await?
        .ok_or_else(|| eyre!("no meeting with id '{id}'"))?;

    let m = &record.meeting;
    println!("{}  {}", m.date.format("%Y-%m-%d"), m.kind);
    if !m.note.is_empty() {
        println!("  Note:     {}", m.note);
    }
    println!("  Agenda:   {}", m.agenda_url.as_deref().unwrap_or("-"));
    println!("  Minutes:  {}", m.minutes_url.as_deref().unwrap_or("-"));
    println!("  Video:    {}", m.video_url.as_deref().unwrap_or("-"));
    if let Some(observed) = record.last_observed {
        println!("  Observed: {observed}");
    }
    if let Some(updated) = record.last_updated {
        println!("  Updated:  {updated}");
    }

    let versions = storage.meeting_versions(id).await?;
    println!();
    println!("  {} version(s)", versions.len());
    for v in versions {
        println!("  {}  {}", v.observed, v.agenda_content_id);
    }
    Ok(())
}

async fn cmd_citing(db: &Path, url: &str) -> Result<()> {
    let storage = Storage::open_readonly(db).await?;
    let meetings = storage.meetings_citing(url).await?;
    if meetings.is_empty() {
        println!("No meetings link to {url}.");
    }
    for record in meetings {
        println!(
            "{}  {}  ({})",
            record.meeting.date.format("%Y-%m-%d"),
            record.meeting.kind,
            record.meeting.id
        );
    }
    Ok(())
}

async fn cmd_status(db: &Path, runs: u32) -> Result<()> {
    let storage = Storage::open_readonly(db).await?;
    let stats = storage.stats().await?;

    println!();
    println!("  Database:         {}", db.display());
    println!("  Meetings:         {}", stats.meetings);
    println!("  Versions:         {}", stats.meeting_versions);
    println!("  Agenda contents:  {}", stats.agenda_contents);
    println!("  Document URLs:    {}", stats.document_urls);
    println!("    backlog:        {}", stats.document_backlog);
    println!("    errors:         {}", stats.document_errors);
    println!("  Documents stored: {}", stats.external_contents);
    println!();

    for run in storage.recent_runs(runs).await? {
        let finished = match run.finished_at {
            Some(t) => t.to_string(),
            None => "did not finish".to_string(),
        };
        println!("  {:<9} {}  ->  {finished}", run.kind, run.started_at);
        if let Some(json) = run.stats_json {
            println!("            {json}");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("valid template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item_done(&self, detail: &str, current: usize, total: usize) {
        self.spinner.set_message(format!("[{current}/{total}] {detail}"));
    }

    fn finish(&self, summary: &str) {
        self.spinner.finish_with_message(summary.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_search_flags() {
        let cli = Cli::try_parse_from([
            "councilwatch",
            "--db",
            "/tmp/cw.db",
            "search",
            "snow removal",
            "--documents",
            "-l",
            "5",
        ])
        .unwrap();
        match cli.command {
            Command::Search {
                query,
                documents,
                limit,
            } => {
                assert_eq!(query, "snow removal");
                assert!(documents);
                assert_eq!(limit, 5);
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn db_flag_overrides_config() {
        let cli = Cli::try_parse_from(["councilwatch", "--db", "/tmp/other.db", "status"]).unwrap();
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.database.path, "/tmp/other.db");

        let cli = Cli::try_parse_from(["councilwatch", "status"]).unwrap();
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.database.path, "meetings.db");
    }
}
