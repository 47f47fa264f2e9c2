//! Application configuration for Firmscope.
//!
//! User config lives at `~/.firmscope/firmscope.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FirmscopeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "firmscope.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".firmscope";

// ---------------------------------------------------------------------------
// Config structs (matching firmscope.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Batch orchestration.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Transport client settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// External inference process.
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Corpus size bounds.
    #[serde(default)]
    pub corpus: CorpusConfig,

    /// Source endpoints and which fetchers run.
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory for output CSV files when `--out` is not given.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Directory for per-company corpus dumps.
    #[serde(default = "default_debug_dir")]
    pub debug_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            debug_dir: default_debug_dir(),
        }
    }
}

fn default_output_dir() -> String {
    "data".into()
}
fn default_debug_dir() -> String {
    "raw_data".into()
}

/// `[batch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Companies per batch; one write per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Worker pool size within a batch.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Stop after this many input records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_companies: Option<usize>,

    /// Pause between batches.
    #[serde(default = "default_batch_pause")]
    pub batch_pause_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            max_companies: None,
            batch_pause_ms: default_batch_pause(),
        }
    }
}

impl BatchConfig {
    /// Pause inserted between consecutive batches.
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

fn default_batch_size() -> usize {
    10
}
fn default_workers() -> usize {
    4
}
fn default_batch_pause() -> u64 {
    5_000
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout.
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    /// Total attempts per URL, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff base; the delay after attempt `n` (0-based) is `base * 2^n`.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Fixed delay applied before every attempt.
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,

    /// Concurrent source fetches across the whole job.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Browser-like User-Agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            request_delay_ms: default_request_delay(),
            fetch_concurrency: default_fetch_concurrency(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

fn default_http_timeout() -> u64 {
    15
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    2_000
}
fn default_request_delay() -> u64 {
    1_000
}
fn default_fetch_concurrency() -> usize {
    8
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36"
        .into()
}

/// `[inference]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Executable of the text-generation CLI.
    #[serde(default = "default_inference_command")]
    pub command: String,

    /// Model identifier passed to the CLI.
    #[serde(default = "default_model")]
    pub model: String,

    /// Hard limit for one inference call.
    #[serde(default = "default_inference_timeout")]
    pub timeout_secs: u64,

    /// Maximum corpus characters embedded in the prompt.
    #[serde(default = "default_prompt_corpus_cap")]
    pub prompt_corpus_cap: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            command: default_inference_command(),
            model: default_model(),
            timeout_secs: default_inference_timeout(),
            prompt_corpus_cap: default_prompt_corpus_cap(),
        }
    }
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_inference_command() -> String {
    "ollama".into()
}
fn default_model() -> String {
    "llama3:70b".into()
}
fn default_inference_timeout() -> u64 {
    120
}
fn default_prompt_corpus_cap() -> usize {
    50_000
}

/// `[corpus]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Character cap applied to each source's contribution.
    #[serde(default = "default_source_char_cap")]
    pub source_char_cap: usize,

    /// Items of a list-shaped source written into the corpus.
    #[serde(default = "default_list_items")]
    pub list_items: usize,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            source_char_cap: default_source_char_cap(),
            list_items: default_list_items(),
        }
    }
}

fn default_source_char_cap() -> usize {
    10_000
}
fn default_list_items() -> usize {
    5
}

/// `[sources]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Source identifiers to run (see `SourceName`). Empty means all.
    #[serde(default)]
    pub enabled: Vec<String>,

    /// Search engine endpoint; the query goes into `q`.
    #[serde(default = "default_search_url")]
    pub search_url: String,

    /// Filing registry origin (search, index and documents live under it).
    #[serde(default = "default_filings_base_url")]
    pub filings_base_url: String,

    /// Professional-network domain and profile path marker.
    #[serde(default = "default_network_domain")]
    pub professional_network_domain: String,
    #[serde(default = "default_network_marker")]
    pub professional_network_marker: String,

    /// Funding-database domain and profile path marker.
    #[serde(default = "default_funding_domain")]
    pub funding_domain: String,
    #[serde(default = "default_funding_marker")]
    pub funding_marker: String,

    /// Business-directory domain and profile path marker.
    #[serde(default = "default_directory_domain")]
    pub directory_domain: String,
    #[serde(default = "default_directory_marker")]
    pub directory_marker: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            enabled: Vec::new(),
            search_url: default_search_url(),
            filings_base_url: default_filings_base_url(),
            professional_network_domain: default_network_domain(),
            professional_network_marker: default_network_marker(),
            funding_domain: default_funding_domain(),
            funding_marker: default_funding_marker(),
            directory_domain: default_directory_domain(),
            directory_marker: default_directory_marker(),
        }
    }
}

impl SourcesConfig {
    /// Domains that belong to dedicated fetchers; general discovery skips them.
    pub fn known_source_domains(&self) -> Vec<String> {
        let registry_host = self
            .filings_base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("www.")
            .trim_end_matches('/')
            .to_string();
        vec![
            self.professional_network_domain.clone(),
            self.funding_domain.clone(),
            self.directory_domain.clone(),
            registry_host,
        ]
    }
}

fn default_search_url() -> String {
    "https://www.google.com/search".into()
}
fn default_filings_base_url() -> String {
    "https://www.sec.gov".into()
}
fn default_network_domain() -> String {
    "linkedin.com".into()
}
fn default_network_marker() -> String {
    "linkedin.com/company/".into()
}
fn default_funding_domain() -> String {
    "crunchbase.com".into()
}
fn default_funding_marker() -> String {
    "crunchbase.com/organization/".into()
}
fn default_directory_domain() -> String {
    "zoominfo.com".into()
}
fn default_directory_marker() -> String {
    "zoominfo.com/c/".into()
}

// ---------------------------------------------------------------------------
// Job config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime job configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Input file (JSON array or delimited text).
    pub input: PathBuf,
    /// Append-only CSV output.
    pub output: PathBuf,
    /// Directory for per-company corpus dumps.
    pub debug_dir: PathBuf,
    /// Continue a previous run on the same output instead of starting fresh.
    pub resume: bool,
    pub batch: BatchConfig,
    pub http: HttpConfig,
    pub inference: InferenceConfig,
    pub corpus: CorpusConfig,
    pub sources: SourcesConfig,
}

impl JobConfig {
    /// Build a job config from the loaded app config for the given paths.
    pub fn from_app(config: &AppConfig, input: PathBuf, output: PathBuf) -> Self {
        Self {
            input,
            output,
            debug_dir: PathBuf::from(&config.defaults.debug_dir),
            resume: false,
            batch: config.batch.clone(),
            http: config.http.clone(),
            inference: config.inference.clone(),
            corpus: config.corpus.clone(),
            sources: config.sources.clone(),
        }
    }

    /// Reject settings the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch.batch_size == 0 {
            return Err(FirmscopeError::config("batch.batch_size must be at least 1"));
        }
        if self.batch.workers == 0 {
            return Err(FirmscopeError::config("batch.workers must be at least 1"));
        }
        if self.http.max_attempts == 0 {
            return Err(FirmscopeError::config("http.max_attempts must be at least 1"));
        }
        if self.http.fetch_concurrency == 0 {
            return Err(FirmscopeError::config(
                "http.fetch_concurrency must be at least 1",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.firmscope/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| FirmscopeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.firmscope/firmscope.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| FirmscopeError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        FirmscopeError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| FirmscopeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| FirmscopeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| FirmscopeError::io(&path, e))?;
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
        assert!(toml_str.contains("batch_size"));
        assert!(toml_str.contains("ollama"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.batch.batch_size, 10);
        assert_eq!(parsed.http.max_attempts, 3);
        assert_eq!(parsed.inference.timeout_secs, 120);
        assert_eq!(parsed.corpus.source_char_cap, 10_000);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[batch]
workers = 2

[sources]
enabled = ["search", "filings-registry"]
search_url = "http://localhost:9999/search"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.batch.workers, 2);
        assert_eq!(config.batch.batch_size, 10);
        assert_eq!(config.sources.enabled.len(), 2);
        assert_eq!(config.sources.search_url, "http://localhost:9999/search");
        assert_eq!(config.sources.funding_domain, "crunchbase.com");
    }

    #[test]
    fn job_config_from_app_config() {
        let app = AppConfig::default();
        let job = JobConfig::from_app(&app, "in.csv".into(), "out.csv".into());
        assert_eq!(job.batch.workers, 4);
        assert_eq!(job.http.request_delay(), Duration::from_millis(1_000));
        assert_eq!(job.debug_dir, PathBuf::from("raw_data"));
        assert!(!job.resume);
        assert!(job.validate().is_ok());
    }

    #[test]
    fn job_config_rejects_zero_workers() {
        let app = AppConfig::default();
        let mut job = JobConfig::from_app(&app, "in.csv".into(), "out.csv".into());
        job.batch.workers = 0;
        let err = job.validate().unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn known_domains_include_registry_host() {
        let sources = SourcesConfig::default();
        let domains = sources.known_source_domains();
        assert!(domains.contains(&"sec.gov".to_string()));
        assert!(domains.contains(&"linkedin.com".to_string()));
    }
}
