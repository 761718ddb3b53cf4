//! Configuration file handling.
//!
//! Settings are read from `.forecastbench.toml` (or `--config`) and then
//! overridden by any explicit CLI flags.

use crate::sampling::SamplingConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = ".forecastbench.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    /// Question sampling parameters.
    #[serde(default)]
    pub sampling: SamplingConfig,

    #[serde(default)]
    pub question_set: QuestionSetConfig,

    /// Settings shared by all LLM forecasters.
    #[serde(default)]
    pub forecaster: ForecasterConfig,

    #[serde(default)]
    pub sources: SourcesConfig,

    /// Candidate models. Models whose API key is missing are skipped.
    #[serde(default = "default_models")]
    pub models: Vec<ModelConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            sampling: SamplingConfig::default(),
            question_set: QuestionSetConfig::default(),
            forecaster: ForecasterConfig::default(),
            sources: SourcesConfig::default(),
            models: default_models(),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Number of models forecasting at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            verbose: false,
            concurrency: default_concurrency(),
        }
    }
}

fn default_db_path() -> String {
    "forecastbench.db".to_string()
}

fn default_concurrency() -> usize {
    1
}

/// How new question sets are named and dated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionSetConfig {
    /// Prefix of generated set names; a timestamp is appended.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Days from freeze until forecasts are due.
    #[serde(default = "default_forecast_due_days")]
    pub forecast_due_days: i64,

    /// Days from freeze at which the set is resolved.
    #[serde(default = "default_resolution_horizons")]
    pub resolution_horizons_days: Vec<i64>,

    /// Only sample binary questions.
    #[serde(default = "default_true")]
    pub binary_only: bool,
}

impl Default for QuestionSetConfig {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            forecast_due_days: default_forecast_due_days(),
            resolution_horizons_days: default_resolution_horizons(),
            binary_only: true,
        }
    }
}

fn default_name_prefix() -> String {
    "benchmark".to_string()
}

fn default_forecast_due_days() -> i64 {
    1
}

fn default_resolution_horizons() -> Vec<i64> {
    vec![7, 14, 30]
}

fn default_true() -> bool {
    true
}

/// LLM request settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecasterConfig {
    /// Sampling temperature (0.0 for deterministic).
    #[serde(default)]
    pub temperature: f32,

    /// Maximum tokens in a reply.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds.
    #[serde(default = "default_forecast_timeout")]
    pub timeout_seconds: u64,

    /// Ollama API URL, used by `ollama/...` models.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
}

impl Default for ForecasterConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            timeout_seconds: default_forecast_timeout(),
            ollama_url: default_ollama_url(),
        }
    }
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_forecast_timeout() -> u64 {
    120
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

/// Question source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Sources fetched when `--sources` is not given.
    #[serde(default = "default_enabled_sources")]
    pub enabled: Vec<String>,

    /// HTTP timeout for source requests.
    #[serde(default = "default_source_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Environment variable holding the optional Good Judgment Open token.
    #[serde(default = "default_gjopen_key_env")]
    pub good_judgment_api_key_env: String,

    /// Environment variable holding the optional INFER token.
    #[serde(default = "default_infer_key_env")]
    pub infer_api_key_env: String,

    /// Environment variable holding the optional Metaculus token.
    #[serde(default = "default_metaculus_key_env")]
    pub metaculus_api_key_env: String,

    #[serde(default = "default_fred_key_env")]
    pub fred_api_key_env: String,

    /// FRED series ids turned into questions.
    #[serde(default = "default_fred_series")]
    pub fred_series: Vec<String>,

    /// Tickers turned into questions.
    #[serde(default = "default_yahoo_tickers")]
    pub yahoo_tickers: Vec<String>,

    /// Days ahead at which data-series questions resolve.
    #[serde(default = "default_horizons")]
    pub horizons_days: Vec<i64>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_sources(),
            timeout_seconds: default_source_timeout(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            good_judgment_api_key_env: default_gjopen_key_env(),
            infer_api_key_env: default_infer_key_env(),
            metaculus_api_key_env: default_metaculus_key_env(),
            fred_api_key_env: default_fred_key_env(),
            fred_series: default_fred_series(),
            yahoo_tickers: default_yahoo_tickers(),
            horizons_days: default_horizons(),
        }
    }
}

fn default_enabled_sources() -> Vec<String> {
    [
        "manifold",
        "polymarket",
        "metaculus",
        "good_judgment",
        "infer",
        "fred",
        "yahoo_finance",
    ]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_source_timeout() -> u64 {
    30
}

fn default_page_size() -> usize {
    50
}

fn default_max_pages() -> usize {
    4
}

fn default_gjopen_key_env() -> String {
    "GJOPEN_API_KEY".to_string()
}

fn default_infer_key_env() -> String {
    "INFER_API_KEY".to_string()
}

fn default_metaculus_key_env() -> String {
    "METACULUS_API_KEY".to_string()
}

fn default_fred_key_env() -> String {
    "FRED_API_KEY".to_string()
}

fn default_fred_series() -> Vec<String> {
    ["UNRATE", "CPIAUCSL", "DGS10", "FEDFUNDS"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_yahoo_tickers() -> Vec<String> {
    ["SPY", "QQQ", "GLD", "TLT"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_horizons() -> Vec<i64> {
    vec![7, 30, 90]
}

/// One candidate model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// `provider/model`, e.g. `openai/gpt-4o-mini`.
    pub id: String,

    /// Overrides the provider's default API key variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Overrides the provider's default endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ModelConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            api_key_env: None,
            base_url: None,
        }
    }
}

fn default_models() -> Vec<ModelConfig> {
    [
        "anthropic/claude-3-haiku-20240307",
        "openai/gpt-4o-mini",
        "gemini/gemini-2.0-flash",
        "mistral/mistral-small-latest",
    ]
    .into_iter()
    .map(ModelConfig::new)
    .collect()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only flags the user actually passed override file settings.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(n) = args.num_questions {
            self.sampling.num_questions = n;
        }
        if let Some(fraction) = args.market_fraction {
            self.sampling.market_fraction = fraction;
        }
        if let Some(days) = args.max_resolution_days {
            self.sampling.max_resolution_days = days;
        }
        if args.seed.is_some() {
            self.sampling.seed = args.seed;
        }

        if let Some(ref sources) = args.sources {
            self.sources.enabled = sources.clone();
        }
        if let Some(ref models) = args.models {
            self.models = models.iter().map(ModelConfig::new).collect();
        }

        if let Some(ref db) = args.db {
            self.general.db_path = db.display().to_string();
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }
        if let Some(timeout) = args.timeout {
            self.forecaster.timeout_seconds = timeout;
        }
        if let Some(temperature) = args.temperature {
            self.forecaster.temperature = temperature;
        }
        if let Some(ref url) = args.ollama_url {
            self.forecaster.ollama_url = url.clone();
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
