//! Command-line interface argument parsing.
//!
//! Flags that also exist in the config file are optional here so that an
//! absent flag leaves the file value untouched.

use clap::Parser;
use std::path::PathBuf;

/// forecastbench - benchmark LLM forecasters on real-world questions
///
/// Fetches questions from prediction markets and data series, freezes a
/// stratified question set, asks each configured model for forecasts and
/// records resolutions as they arrive.
///
/// Examples:
///   forecastbench --num-questions 20 --market-fraction 0.5
///   forecastbench --sources manifold,fred --models ollama/llama3.2:latest
///   forecastbench --question-set 3 --skip-fetch --models openai/gpt-4o-mini
///   forecastbench --question-set 3 --resolve --output summary.md
///   forecastbench --init-config
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Number of questions to sample into a new question set
    #[arg(short, long, value_name = "COUNT")]
    pub num_questions: Option<usize>,

    /// Share of sampled questions drawn from prediction markets (0.0 - 1.0)
    #[arg(long, value_name = "FRACTION")]
    pub market_fraction: Option<f64>,

    /// Only sample questions resolving within this many days
    #[arg(long, value_name = "DAYS")]
    pub max_resolution_days: Option<i64>,

    /// Seed for reproducible sampling
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Show what would be fetched, sampled and forecast without calling any model
    #[arg(long)]
    pub dry_run: bool,

    /// Sources to fetch from (comma-separated)
    ///
    /// Known sources: manifold, polymarket, metaculus, good_judgment, infer, fred, yahoo_finance
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub sources: Option<Vec<String>>,

    /// Sample from questions already in the database instead of fetching
    #[arg(long)]
    pub skip_fetch: bool,

    /// Use an existing question set instead of creating one
    #[arg(long, value_name = "ID")]
    pub question_set: Option<i64>,

    /// SQLite database path
    #[arg(long, value_name = "PATH", env = "FORECASTBENCH_DB")]
    pub db: Option<PathBuf>,

    /// Models to run as provider/model (comma-separated)
    ///
    /// Example: --models openai/gpt-4o-mini,ollama/llama3.2:latest
    #[arg(long, value_name = "MODELS", value_delimiter = ',', env = "FORECASTBENCH_MODELS")]
    pub models: Option<Vec<String>>,

    /// Name of the new question set (default: prefix plus timestamp)
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Fetch and store resolutions for the question set instead of forecasting
    #[arg(long, requires = "question_set")]
    pub resolve: bool,

    /// Write the question set summary to this file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Summary file format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .forecastbench.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of models forecasting at the same time
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// LLM request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Sampling temperature for LLM replies (0.0 - 2.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .forecastbench.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the summary file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if let Some(n) = self.num_questions {
            if n == 0 {
                return Err("Number of questions must be at least 1".to_string());
            }
        }

        if let Some(fraction) = self.market_fraction {
            if !(0.0..=1.0).contains(&fraction) {
                return Err("Market fraction must be between 0.0 and 1.0".to_string());
            }
        }

        if let Some(days) = self.max_resolution_days {
            if days < 1 {
                return Err("Max resolution days must be at least 1".to_string());
            }
        }

        if let Some(ref models) = self.models {
            if let Some(bad) = models.iter().find(|m| !m.contains('/')) {
                return Err(format!(
                    "Model '{}' must be given as provider/model (e.g. openai/gpt-4o-mini)",
                    bad
                ));
            }
        }

        if let Some(ref sources) = self.sources {
            if sources.iter().any(|s| s.trim().is_empty()) {
                return Err("Source names must not be empty".to_string());
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 2.0".to_string());
            }
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.skip_fetch && self.sources.is_some() {
            return Err("Cannot use both --skip-fetch and --sources".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings. `verbose_default`
    /// comes from the configuration file; `--quiet` overrides it.
    pub fn log_level(&self, verbose_default: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || verbose_default {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "forecastbench",
            "--num-questions",
            "20",
            "--market-fraction",
            "0.25",
            "--sources",
            "manifold,fred",
            "--models",
            "openai/gpt-4o-mini,ollama/llama3.2:latest",
            "--seed",
            "42",
            "--format",
            "json",
        ])
        .unwrap();

        assert_eq!(args.num_questions, Some(20));
        assert_eq!(args.market_fraction, Some(0.25));
        assert_eq!(
            args.sources,
            Some(vec!["manifold".to_string(), "fred".to_string()])
        );
        assert_eq!(args.models.as_ref().map(Vec::len), Some(2));
        assert_eq!(args.seed, Some(42));
        assert_eq!(args.format, OutputFormat::Json);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_resolve_requires_question_set() {
        assert!(Args::try_parse_from(["forecastbench", "--resolve"]).is_err());
        assert!(Args::try_parse_from(["forecastbench", "--resolve", "--question-set", "3"]).is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut args = Args {
            market_fraction: Some(1.5),
            ..Args::default()
        };
        assert!(args.validate().is_err());

        args.market_fraction = Some(0.5);
        args.max_resolution_days = Some(0);
        assert!(args.validate().is_err());

        args.max_resolution_days = None;
        args.models = Some(vec!["gpt-4o".to_string()]);
        assert!(args.validate().is_err());

        args.models = None;
        args.num_questions = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = Args {
            verbose: true,
            quiet: true,
            ..Args::default()
        };
        assert!(args.validate().is_err());

        args.quiet = false;
        args.skip_fetch = true;
        args.sources = Some(vec!["manifold".to_string()]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = Args::default();
        assert_eq!(args.log_level(false), tracing::Level::INFO);
        assert_eq!(args.log_level(true), tracing::Level::DEBUG);

        args.verbose = true;
        assert_eq!(args.log_level(false), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(true), tracing::Level::ERROR);
    }
}
