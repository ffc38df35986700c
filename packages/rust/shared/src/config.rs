//! Application configuration for CouncilWatch.
//!
//! User config lives at `~/.councilwatch/councilwatch.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CouncilWatchError, Result};
use crate::types::DocumentLinkPolicy;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "councilwatch.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".councilwatch";

// ---------------------------------------------------------------------------
// Config structs (matching councilwatch.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Crawl scheduling and politeness.
    #[serde(default)]
    pub crawl: CrawlSection,

    /// External document pipeline.
    #[serde(default)]
    pub documents: DocumentsSection,

    /// Upstream sources.
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "meetings.db".into()
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    /// Steady request rate shared by every outbound call.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Token bucket capacity.
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Meetings dated within this many days of today use the short threshold.
    #[serde(default = "default_recent_window_days")]
    pub recent_window_days: i64,

    #[serde(default = "default_recent_threshold_mins")]
    pub recent_threshold_mins: i64,

    #[serde(default = "default_stale_threshold_hours")]
    pub stale_threshold_hours: i64,

    /// Symmetric jitter applied to the stale threshold.
    #[serde(default = "default_jitter_mins")]
    pub jitter_mins: i64,

    /// Cutoff = newest observation minus this many months.
    #[serde(default = "default_lookback_months")]
    pub lookback_months: u32,

    /// Cutoff = now minus this many months when nothing has been observed yet.
    #[serde(default = "default_initial_lookback_months")]
    pub initial_lookback_months: u32,

    /// Log progress every N meetings or documents.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,

    /// Overall run deadline in minutes (0 = none).
    #[serde(default)]
    pub max_run_mins: u64,

    /// Per-request timeout for listing pages and agenda fetches.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            recent_window_days: default_recent_window_days(),
            recent_threshold_mins: default_recent_threshold_mins(),
            stale_threshold_hours: default_stale_threshold_hours(),
            jitter_mins: default_jitter_mins(),
            lookback_months: default_lookback_months(),
            initial_lookback_months: default_initial_lookback_months(),
            progress_interval: default_progress_interval(),
            max_run_mins: 0,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_requests_per_second() -> f64 {
    1.0
}
fn default_burst() -> u32 {
    1
}
fn default_recent_window_days() -> i64 {
    7
}
fn default_recent_threshold_mins() -> i64 {
    58
}
fn default_stale_threshold_hours() -> i64 {
    24
}
fn default_jitter_mins() -> i64 {
    60
}
fn default_lookback_months() -> u32 {
    8
}
fn default_initial_lookback_months() -> u32 {
    1
}
fn default_progress_interval() -> usize {
    10
}
fn default_request_timeout_secs() -> u64 {
    30
}

/// `[documents]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsSection {
    /// Backlog rows taken per run.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Wall-clock budget for the whole PDF stage of one document.
    #[serde(default = "default_pdf_timeout_secs")]
    pub pdf_timeout_secs: u64,

    /// Wall-clock budget for one pipeline run.
    #[serde(default = "default_run_budget_mins")]
    pub run_budget_mins: u64,

    /// URL substrings identifying external documents in agenda bodies.
    #[serde(default = "default_url_patterns")]
    pub url_patterns: Vec<String>,

    /// Site branding stripped from the end of PDF titles.
    #[serde(default = "default_title_suffix")]
    pub title_suffix: String,
}

impl Default for DocumentsSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            pdf_timeout_secs: default_pdf_timeout_secs(),
            run_budget_mins: default_run_budget_mins(),
            url_patterns: default_url_patterns(),
            title_suffix: default_title_suffix(),
        }
    }
}

fn default_batch_size() -> u32 {
    500
}
fn default_fetch_timeout_secs() -> u64 {
    60
}
fn default_pdf_timeout_secs() -> u64 {
    300
}
fn default_run_budget_mins() -> u64 {
    30
}
fn default_url_patterns() -> Vec<String> {
    vec![
        "halifax.ca/media".into(),
        "cdn.halifax.ca".into(),
        "escribemeetings.com/filestream.ashx".into(),
    ]
}
fn default_title_suffix() -> String {
    "| Halifax.ca".into()
}

/// `[sources]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub city: CitySourceConfig,

    #[serde(default)]
    pub escribe: EscribeSourceConfig,
}

/// `[sources.city]` — the municipal website's paginated meeting listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitySourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// First listing page.
    #[serde(default = "default_city_listing_url")]
    pub listing_url: String,

    /// Prefixes stripped from agenda URLs when deriving meeting IDs.
    #[serde(default = "default_city_id_prefixes")]
    pub id_prefixes: Vec<String>,
}

impl Default for CitySourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listing_url: default_city_listing_url(),
            id_prefixes: default_city_id_prefixes(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_city_listing_url() -> String {
    "https://www.halifax.ca/city-hall/agendas-meetings-reports".into()
}
fn default_city_id_prefixes() -> Vec<String> {
    vec![
        "halifax.ca/city-hall".into(),
        "legacycontent.halifax.ca/council".into(),
    ]
}

/// `[sources.escribe]` — the eScribe meeting calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscribeSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_escribe_base_url")]
    pub base_url: String,

    /// Calendar window requested on either side of today.
    #[serde(default = "default_escribe_window_months")]
    pub window_months: u32,
}

impl Default for EscribeSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_escribe_base_url(),
            window_months: default_escribe_window_months(),
        }
    }
}

fn default_escribe_base_url() -> String {
    "https://pub-halifax.escribemeetings.com".into()
}
fn default_escribe_window_months() -> u32 {
    12
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub requests_per_second: f64,
    pub burst: u32,
    pub recent_window: chrono::Duration,
    pub recent_threshold: chrono::Duration,
    pub stale_threshold: chrono::Duration,
    pub jitter: chrono::Duration,
    pub lookback_months: u32,
    pub initial_lookback_months: u32,
    pub progress_interval: usize,
    /// `None` when the run has no overall deadline.
    pub max_run: Option<Duration>,
    pub request_timeout: Duration,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        let c = &config.crawl;
        Self {
            requests_per_second: c.requests_per_second,
            burst: c.burst,
            recent_window: chrono::Duration::days(c.recent_window_days),
            recent_threshold: chrono::Duration::minutes(c.recent_threshold_mins),
            stale_threshold: chrono::Duration::hours(c.stale_threshold_hours),
            jitter: chrono::Duration::minutes(c.jitter_mins),
            lookback_months: c.lookback_months,
            initial_lookback_months: c.initial_lookback_months,
            progress_interval: c.progress_interval.max(1),
            max_run: (c.max_run_mins > 0).then(|| Duration::from_secs(c.max_run_mins * 60)),
            request_timeout: Duration::from_secs(c.request_timeout_secs),
        }
    }
}

/// Runtime document pipeline configuration.
#[derive(Debug, Clone)]
pub struct DocumentsConfig {
    pub batch_size: u32,
    pub fetch_timeout: Duration,
    pub pdf_timeout: Duration,
    pub run_budget: Duration,
    pub title_suffix: String,
    pub progress_interval: usize,
}

impl From<&AppConfig> for DocumentsConfig {
    fn from(config: &AppConfig) -> Self {
        let d = &config.documents;
        Self {
            batch_size: d.batch_size,
            fetch_timeout: Duration::from_secs(d.fetch_timeout_secs),
            pdf_timeout: Duration::from_secs(d.pdf_timeout_secs),
            run_budget: Duration::from_secs(d.run_budget_mins * 60),
            title_suffix: d.title_suffix.clone(),
            progress_interval: config.crawl.progress_interval.max(1),
        }
    }
}

impl AppConfig {
    /// The document link policy shared by every source.
    pub fn document_policy(&self) -> DocumentLinkPolicy {
        DocumentLinkPolicy::new(self.documents.url_patterns.iter().cloned())
    }

    /// Reject values that would make a run meaningless.
    pub fn validate(&self) -> Result<()> {
        let rate = self.crawl.requests_per_second;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(CouncilWatchError::config(
                "crawl.requests_per_second must be positive",
            ));
        }
        if self.crawl.request_timeout_secs == 0 {
            return Err(CouncilWatchError::config(
                "crawl.request_timeout_secs must be at least 1",
            ));
        }
        if self.crawl.burst == 0 {
            return Err(CouncilWatchError::config("crawl.burst must be at least 1"));
        }
        if self.documents.batch_size == 0 {
            return Err(CouncilWatchError::config(
                "documents.batch_size must be at least 1",
            ));
        }
        if self.database.path.trim().is_empty() {
            return Err(CouncilWatchError::config("database.path is empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.councilwatch/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CouncilWatchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.councilwatch/councilwatch.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| CouncilWatchError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        CouncilWatchError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CouncilWatchError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CouncilWatchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CouncilWatchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("meetings.db"));
        assert!(toml_str.contains("escribemeetings.com"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.crawl.recent_threshold_mins, 58);
        assert_eq!(parsed.documents.batch_size, 500);
        assert!(parsed.sources.city.enabled);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[database]
path = "/tmp/council.db"

[sources.escribe]
enabled = false
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.database.path, "/tmp/council.db");
        assert!(!config.sources.escribe.enabled);
        assert_eq!(config.sources.escribe.window_months, 12);
        assert!(config.sources.city.enabled);
        assert_eq!(config.crawl.burst, 1);
    }

    #[test]
    fn crawl_config_from_app_config() {
        let app = AppConfig::default();
        let crawl = CrawlConfig::from(&app);
        assert_eq!(crawl.recent_threshold, chrono::Duration::minutes(58));
        assert_eq!(crawl.stale_threshold, chrono::Duration::hours(24));
        assert_eq!(crawl.lookback_months, 8);
        assert!(crawl.max_run.is_none());
        assert_eq!(crawl.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn documents_config_from_app_config() {
        let app = AppConfig::default();
        let docs = DocumentsConfig::from(&app);
        assert_eq!(docs.fetch_timeout, Duration::from_secs(60));
        assert_eq!(docs.pdf_timeout, Duration::from_secs(300));
        assert_eq!(docs.run_budget, Duration::from_secs(1800));
    }

    #[test]
    fn validation_rejects_zero_rate() {
        let mut config = AppConfig::default();
        config.crawl.requests_per_second = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("requests_per_second"));
    }

    #[test]
    fn validation_rejects_non_finite_rate() {
        for rate in [f64::NAN, f64::INFINITY, -1.0] {
            let mut config = AppConfig::default();
            config.crawl.requests_per_second = rate;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("requests_per_second"), "{rate}");
        }
    }

    #[test]
    fn crawl_timeout_is_separate_from_documents() {
        let toml_str = r#"
[crawl]
request_timeout_secs = 12

[documents]
fetch_timeout_secs = 90
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        config.validate().expect("valid");
        assert_eq!(CrawlConfig::from(&config).request_timeout, Duration::from_secs(12));
        assert_eq!(DocumentsConfig::from(&config).fetch_timeout, Duration::from_secs(90));

        let mut zero = AppConfig::default();
        zero.crawl.request_timeout_secs = 0;
        assert!(zero.validate().is_err());
    }

    #[test]
    fn document_policy_uses_configured_patterns() {
        let config = AppConfig::default();
        let policy = config.document_policy();
        assert!(policy.matches("https://www.halifax.ca/media/42"));
        assert!(!policy.matches("https://www.example.com/media/42"));
    }
}
