//! forecastbench - dynamic benchmark for LLM forecasting accuracy
//!
//! Fetches questions from prediction markets and data series, freezes a
//! stratified question set, collects forecasts from several LLMs and
//! records resolutions once they are known.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Invalid arguments, no usable model, no question set, or runtime error

mod analysis;
mod cli;
mod config;
mod dispatch;
mod forecasters;
mod models;
mod report;
mod sampling;
mod sources;
mod storage;

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use cli::{Args, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use dispatch::ForecastRunner;
use forecasters::{ForecastError, Forecaster, LlmForecaster};
use models::{NewQuestionSet, Question};
use sampling::QuestionSampler;
use models::Resolution;
use sources::SourceRegistry;
use std::sync::Arc;
use std::time::Instant;
use storage::{ForecastFilter, QuestionFilter, SqliteStorage, Storage};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Number of sample forecasts shown in summaries.
const SUMMARY_SAMPLES: usize = 3;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    let config = match load_config(&args) {
        Ok(mut config) => {
            config.merge_with_args(&args);
            config
        }
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&args, &config);

    info!("forecastbench v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Benchmark run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .forecastbench.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to choose sources, models and sampling parameters.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args, config: &Config) {
    let level = args.log_level(config.general.verbose);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the requested workflow. Returns the process exit code.
async fn run(args: Args, config: Config) -> Result<i32> {
    let start_time = Instant::now();

    let registry = SourceRegistry::from_config(&config.sources)?;
    let storage = Arc::new(SqliteStorage::new(&config.general.db_path));
    info!("Using database {}", config.general.db_path);

    if args.resolve {
        let Some(set_id) = args.question_set else {
            return Err(anyhow!("--resolve requires --question-set"));
        };
        resolve_question_set(storage.as_ref(), &registry, set_id).await?;
        print_summary(storage.as_ref(), set_id, &args).await?;
        return Ok(0);
    }

    // Step 1: Models with usable credentials, checked before any network work
    let forecasters = build_forecasters(&config);
    if forecasters.is_empty() {
        eprintln!("❌ No API keys configured for any candidate model.");
        eprintln!("   Set a provider key (e.g. OPENAI_API_KEY) or use an ollama/... model.");
        return Ok(1);
    }
    println!("🤖 Models:");
    for forecaster in &forecasters {
        println!("   - {}", forecaster.name());
    }

    // Step 2: Question set, existing or freshly sampled
    let (set_id, questions) = match args.question_set {
        Some(set_id) => match load_question_set(storage.as_ref(), set_id).await? {
            Some(questions) => (set_id, questions),
            None => {
                eprintln!("❌ Question set {} not found.", set_id);
                return Ok(1);
            }
        },
        None => {
            let Some(questions) = sample_questions(&args, &config, &registry, storage.as_ref()).await?
            else {
                return Ok(1);
            };
            let set_id = create_question_set(&args, &config, storage.as_ref(), &questions).await?;
            (set_id, questions)
        }
    };

    if questions.is_empty() {
        eprintln!("❌ The question set contains no questions.");
        return Ok(1);
    }

    // Step 3: Forecasts
    println!(
        "\n🔮 Forecasting {} questions with {} models...",
        questions.len(),
        forecasters.len()
    );
    let runner = ForecastRunner::new(storage.clone())
        .concurrency(config.general.concurrency)
        .show_progress(!args.quiet)
        .dry_run(args.dry_run);
    let summaries = runner.run(Some(set_id), &questions, &forecasters).await;

    println!("\n📈 Forecast results:");
    for summary in &summaries {
        println!(
            "   {}: {} successes, {} failures{}",
            summary.model,
            summary.successes,
            summary.failures,
            if summary.storage_errors > 0 {
                format!(", {} not saved", summary.storage_errors)
            } else {
                String::new()
            }
        );
    }

    // Step 4: Summary
    if args.dry_run {
        println!("\n✅ Dry run complete. No forecasts were requested.");
        println!("   Reuse the set with --question-set {}", set_id);
    } else {
        print_summary(storage.as_ref(), set_id, &args).await?;
    }

    println!("   Duration: {:.1}s", start_time.elapsed().as_secs_f64());
    Ok(0)
}

/// Load configuration from file or use defaults.
///
/// Runs before logging is installed, so problems go to stderr.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => Ok(config),
        Ok(None) => Ok(Config::default()),
        Err(e) => {
            eprintln!("⚠️  Failed to load {}: {:#}", DEFAULT_CONFIG_FILE, e);
            Ok(Config::default())
        }
    }
}

/// Candidate models that can actually be called.
fn build_forecasters(config: &Config) -> Vec<Arc<dyn Forecaster>> {
    let mut forecasters: Vec<Arc<dyn Forecaster>> = Vec::new();

    for model in &config.models {
        match LlmForecaster::from_config(model, &config.forecaster) {
            Ok(forecaster) => forecasters.push(Arc::new(forecaster)),
            Err(e @ ForecastError::MissingApiKey { .. }) => {
                info!("Skipping {}: {}", model.id, e);
            }
            Err(e) => warn!("Skipping {}: {}", model.id, e),
        }
    }

    forecasters
}

/// Builds the pool and draws a stratified sample.
///
/// Returns `Ok(None)` after printing the reason when no question set can
/// be formed.
async fn sample_questions(
    args: &Args,
    config: &Config,
    registry: &SourceRegistry,
    storage: &dyn Storage,
) -> Result<Option<Vec<Question>>> {
    if let Err(e) = config.sampling.validate() {
        eprintln!("❌ Invalid sampling configuration: {}", e);
        return Ok(None);
    }

    let fetched = if args.skip_fetch {
        Vec::new()
    } else {
        let (selected, unknown) = registry.select(&config.sources.enabled);
        if !unknown.is_empty() {
            eprintln!(
                "❌ Unknown sources: {} (known: {})",
                unknown.join(", "),
                registry.names().join(", ")
            );
            return Ok(None);
        }
        println!(
            "📥 Fetching questions from {}...",
            selected.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
        );
        let fetched = sources::fetch_all(&selected).await;
        println!("   {} questions fetched", fetched.len());
        fetched
    };

    if !fetched.is_empty() {
        storage
            .save_questions(&fetched)
            .await
            .context("Failed to save fetched questions")?;
        info!("Saved {} questions", fetched.len());
    }
    let mut pool = storage.get_questions(&QuestionFilter::unresolved()).await?;

    if config.question_set.binary_only {
        pool.retain(|q| q.is_binary());
    }
    println!("\n🗂️  Question pool: {} eligible questions", pool.len());

    let mut sampler = QuestionSampler::new(config.sampling.clone());
    let result = sampler.sample_stratified(&pool);
    for warning in &result.warnings {
        warn!("{}", warning);
        println!("   ⚠️  {}", warning);
    }

    if result.is_empty() {
        eprintln!("❌ No questions available; no question set could be created.");
        return Ok(None);
    }

    println!(
        "🎯 Sampled {} questions ({} market, {} data)",
        result.len(),
        result.count(models::SourceType::Market),
        result.count(models::SourceType::Data)
    );
    Ok(Some(result.questions))
}

fn offset_date(today: NaiveDate, days: i64) -> Option<NaiveDate> {
    Duration::try_days(days).and_then(|d| today.checked_add_signed(d))
}

async fn create_question_set(
    args: &Args,
    config: &Config,
    storage: &dyn Storage,
    questions: &[Question],
) -> Result<i64> {
    let now = Utc::now();
    let today = now.date_naive();
    let settings = &config.question_set;

    let name = args.name.clone().unwrap_or_else(|| {
        format!("{}-{}", settings.name_prefix, now.format("%Y%m%d-%H%M%S"))
    });
    let forecast_due_date = offset_date(today, settings.forecast_due_days)
        .ok_or_else(|| anyhow!("Invalid forecast due offset: {}", settings.forecast_due_days))?;
    let resolution_dates: Vec<NaiveDate> = settings
        .resolution_horizons_days
        .iter()
        .filter_map(|days| offset_date(today, *days))
        .collect();

    let set_id = storage
        .create_question_set(&NewQuestionSet {
            name: name.clone(),
            questions,
            freeze_date: today,
            forecast_due_date,
            resolution_dates,
        })
        .await?;

    println!("🧊 Created question set {} ({})", set_id, name);
    Ok(set_id)
}

/// Questions of an existing set in frozen order, or `None` if the set is unknown.
async fn load_question_set(storage: &dyn Storage, set_id: i64) -> Result<Option<Vec<Question>>> {
    let Some(set) = storage.get_question_set(set_id).await? else {
        return Ok(None);
    };

    let items = storage.get_question_set_items(set_id).await?;
    let mut questions = Vec::with_capacity(items.len());
    for item in &items {
        match storage.get_question(&item.source, &item.question_id).await? {
            Some(question) => questions.push(question),
            None => warn!(
                "Question {}/{} of set {} is missing from the database",
                item.source, item.question_id, set_id
            ),
        }
    }

    println!(
        "🧊 Using question set {} ({}) with {} questions",
        set.id,
        set.name,
        questions.len()
    );
    Ok(Some(questions))
}

/// Saves a fetched resolution and marks the question resolved when final.
async fn store_resolution(storage: &dyn Storage, resolution: &Resolution) -> Result<()> {
    storage.save_resolution(resolution).await?;
    if resolution.is_final {
        storage
            .mark_resolved(&resolution.source, &resolution.question_id, resolution.value)
            .await?;
    }
    Ok(())
}

/// Asks each item's source for its resolution and stores it. Failures are
/// logged per item and never stop the pass.
async fn resolve_question_set(
    storage: &dyn Storage,
    registry: &SourceRegistry,
    set_id: i64,
) -> Result<()> {
    if storage.get_question_set(set_id).await?.is_none() {
        return Err(anyhow!("Question set {} not found", set_id));
    }

    let items = storage.get_question_set_items(set_id).await?;
    println!("🔍 Resolving {} questions of set {}...", items.len(), set_id);

    let (mut stored, mut finals, mut pending) = (0, 0, 0);
    for item in &items {
        let Some(source) = registry.get(&item.source) else {
            warn!("No source named {} for question {}", item.source, item.question_id);
            continue;
        };

        match source.fetch_resolution(&item.question_id).await {
            Ok(Some(resolution)) => match store_resolution(storage, &resolution).await {
                Ok(()) => {
                    stored += 1;
                    if resolution.is_final {
                        finals += 1;
                    }
                }
                Err(e) => error!(
                    "Failed to store resolution for {}/{}: {:#}",
                    item.source, item.question_id, e
                ),
            },
            Ok(None) => pending += 1,
            Err(e) => error!(
                "Failed to resolve {}/{}: {:#}",
                item.source, item.question_id, e
            ),
        }
    }

    println!(
        "   Stored {} resolutions ({} final), {} not yet available",
        stored, finals, pending
    );
    Ok(())
}

/// Prints the set summary and writes it to `--output` when given.
async fn print_summary(storage: &dyn Storage, set_id: i64, args: &Args) -> Result<()> {
    let Some(set) = storage.get_question_set(set_id).await? else {
        return Err(anyhow!("Question set {} not found", set_id));
    };
    let items = storage.get_question_set_items(set_id).await?;
    let forecasts = storage
        .get_forecasts(&ForecastFilter::for_question_set(set_id))
        .await?;

    let mut resolutions = Vec::new();
    for item in &items {
        resolutions.extend(
            storage
                .get_resolutions(Some(&item.question_id), Some(&item.source))
                .await?,
        );
    }

    let summary = analysis::summarize(
        set,
        items.len(),
        &forecasts,
        &resolutions,
        Utc::now().date_naive(),
        SUMMARY_SAMPLES,
    );

    println!("\n{}", report::generate_terminal_summary(&summary));

    if let Some(ref path) = args.output {
        let content = match args.format {
            OutputFormat::Json => report::generate_json_report(&summary)?,
            OutputFormat::Markdown => report::generate_markdown_report(&summary),
        };
        report::write_report(&content, path)?;
        println!("\n✅ Summary saved to: {}", path.display());
    }

    Ok(())
}
