use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub inflator: InflatorConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

fn default_port() -> u16 {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_watched_dir")]
    pub watched_dir: PathBuf,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_backups_dir")]
    pub backups_dir: PathBuf,
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            watched_dir: default_watched_dir(),
            db_path: default_db_path(),
            backups_dir: default_backups_dir(),
            models_dir: default_models_dir(),
        }
    }
}

fn default_watched_dir() -> PathBuf {
    PathBuf::from("./context")
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./engine/context.db")
}
fn default_backups_dir() -> PathBuf {
    PathBuf::from("./backups")
}
fn default_models_dir() -> PathBuf {
    PathBuf::from("./models")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Files larger than this are skipped with a log line, never ingested.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    100 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Floor for the FTS candidate count; scaled up with the char budget.
    #[serde(default = "default_fts_base_k")]
    pub fts_base_k: i64,
    /// Search deadline in seconds; partial results are returned on expiry.
    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fts_base_k: default_fts_base_k(),
            search_timeout_secs: default_search_timeout_secs(),
        }
    }
}

fn default_fts_base_k() -> i64 {
    500
}
fn default_search_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct InflatorConfig {
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: usize,
    #[serde(default = "default_min_padding")]
    pub min_padding: usize,
    #[serde(default = "default_max_padding")]
    pub max_padding: usize,
    #[serde(default = "default_min_window_cap")]
    pub min_window_cap: usize,
    #[serde(default = "default_min_viable_size")]
    pub min_viable_size: usize,
}

impl Default for InflatorConfig {
    fn default() -> Self {
        Self {
            merge_threshold: default_merge_threshold(),
            min_padding: default_min_padding(),
            max_padding: default_max_padding(),
            min_window_cap: default_min_window_cap(),
            min_viable_size: default_min_viable_size(),
        }
    }
}

fn default_merge_threshold() -> usize {
    500
}
fn default_min_padding() -> usize {
    50
}
fn default_max_padding() -> usize {
    500
}
fn default_min_window_cap() -> usize {
    200
}
fn default_min_viable_size() -> usize {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    /// A file is ingested once its mtime has been stable this long.
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
    /// Bounded queue between the watcher and the ingest workers.
    /// Overflow drops the oldest queued event with a warning.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Glob patterns excluded from watching, relative to the watched root.
    /// Dotfiles and the engine's own snapshot files are always excluded.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_secs: default_debounce_secs(),
            queue_capacity: default_queue_capacity(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_debounce_secs() -> u64 {
    2
}
fn default_queue_capacity() -> usize {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    /// `disabled` or `local` (OpenAI-compatible completion endpoint).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model name passed through to the local server; resolved under
    /// `paths.models_dir` by the server itself, referenced here by name only.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_generator_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: None,
            timeout_secs: default_generator_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_generator_timeout_secs() -> u64 {
    60
}

impl GeneratorConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            paths: PathsConfig::default(),
            ingest: IngestConfig::default(),
            retrieval: RetrievalConfig::default(),
            inflator: InflatorConfig::default(),
            watch: WatchConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        // Missing config file means defaults; every key has one.
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.ingest.max_file_bytes == 0 {
        anyhow::bail!("ingest.max_file_bytes must be > 0");
    }

    if config.retrieval.fts_base_k < 1 {
        anyhow::bail!("retrieval.fts_base_k must be >= 1");
    }

    if config.inflator.min_padding > config.inflator.max_padding {
        anyhow::bail!("inflator.min_padding must be <= inflator.max_padding");
    }

    if config.inflator.min_viable_size == 0 || config.inflator.min_window_cap == 0 {
        anyhow::bail!("inflator window sizes must be > 0");
    }

    if config.watch.queue_capacity == 0 {
        anyhow::bail!("watch.queue_capacity must be > 0");
    }

    match config.generator.provider.as_str() {
        "disabled" | "local" => {}
        other => anyhow::bail!(
            "Unknown generator provider: '{}'. Must be disabled or local.",
            other
        ),
    }

    Ok(config)
}
