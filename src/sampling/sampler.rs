//! Stratified sampling of benchmark questions.
//!
//! The pool is split by [`SourceType`] into a MARKET and a DATA stratum,
//! each stratum is restricted to questions resolving within the configured
//! horizon, and a uniform sample without replacement is drawn from each.
//! Shortfalls are reported as warnings and never redistributed.

use crate::models::{Question, SourceType};
use chrono::{Duration, NaiveDate, Utc};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Parameters for one sampling run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Target number of questions; never exceeded.
    pub num_questions: usize,
    /// Share of the target drawn from MARKET questions (nominally 0.0 - 1.0).
    pub market_fraction: f64,
    /// Only questions resolving within this many days from today are eligible.
    pub max_resolution_days: i64,
    /// Seed for reproducible selection. Drawn from OS entropy when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            num_questions: 10,
            market_fraction: 0.5,
            max_resolution_days: 365,
            seed: None,
        }
    }
}

/// Invalid sampling parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SamplingError {
    #[error("market fraction must be between 0.0 and 1.0, got {0}")]
    InvalidMarketFraction(f64),
    #[error("max resolution days must be at least 1, got {0}")]
    InvalidHorizon(i64),
}

impl SamplingConfig {
    /// Checks the parameters a caller can get wrong.
    ///
    /// The sampler itself tolerates out-of-range fractions; this is the
    /// explicit check used at the CLI and config boundary.
    pub fn validate(&self) -> Result<(), SamplingError> {
        if !(0.0..=1.0).contains(&self.market_fraction) {
            return Err(SamplingError::InvalidMarketFraction(self.market_fraction));
        }
        if self.max_resolution_days < 1 {
            return Err(SamplingError::InvalidHorizon(self.max_resolution_days));
        }
        Ok(())
    }

    /// Per-stratum targets as `(market, data)`.
    ///
    /// `market = round(n * fraction)` clamped to `[0, n]` and
    /// `data = n - market`, so an out-of-range fraction degrades to a
    /// one-sided sample instead of a negative or oversized one.
    pub fn targets(&self) -> (usize, usize) {
        let n = self.num_questions;
        // `as` saturates and maps NaN to 0
        let market = ((n as f64 * self.market_fraction).round() as usize).min(n);
        (market, n - market)
    }
}

/// Outcome of a sampling run: the selection plus diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplingResult {
    /// Selected questions, MARKET stratum first.
    pub questions: Vec<Question>,
    /// Human-readable notes about constraints that could not be met.
    pub warnings: Vec<String>,
}

impl SamplingResult {
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Number of selected questions from the given stratum.
    pub fn count(&self, source_type: SourceType) -> usize {
        self.questions
            .iter()
            .filter(|q| q.source_type == source_type)
            .count()
    }
}

/// Draws stratified question samples.
///
/// The random source is owned by the sampler; two samplers built from the
/// same seed make the same selections on the same pool.
pub struct QuestionSampler<R = ChaCha8Rng> {
    config: SamplingConfig,
    rng: R,
}

impl QuestionSampler<ChaCha8Rng> {
    /// Creates a sampler seeded from `config.seed`, or from entropy.
    pub fn new(config: SamplingConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self { config, rng }
    }
}

impl<R: Rng> QuestionSampler<R> {
    /// Creates a sampler with an explicit random source.
    pub fn with_rng(config: SamplingConfig, rng: R) -> Self {
        Self { config, rng }
    }

    /// Samples relative to today's UTC date.
    pub fn sample_stratified(&mut self, questions: &[Question]) -> SamplingResult {
        self.sample_stratified_at(questions, Utc::now().date_naive())
    }

    /// Samples with an explicit notion of "today" for the horizon filter.
    pub fn sample_stratified_at(&mut self, questions: &[Question], today: NaiveDate) -> SamplingResult {
        let mut result = SamplingResult::default();
        if self.config.num_questions == 0 {
            return result;
        }

        let (market_target, data_target) = self.config.targets();
        let horizon_end = Duration::try_days(self.config.max_resolution_days.max(0))
            .and_then(|span| today.checked_add_signed(span))
            .unwrap_or(NaiveDate::MAX);

        debug!(
            "Sampling {} questions (market target {}, data target {}) resolving {}..={}",
            self.config.num_questions, market_target, data_target, today, horizon_end
        );

        for (stratum, target) in [
            (SourceType::Market, market_target),
            (SourceType::Data, data_target),
        ] {
            let eligible: Vec<&Question> = questions
                .iter()
                .filter(|q| q.source_type == stratum)
                .filter(|q| matches!(q.resolution_date, Some(d) if d >= today && d <= horizon_end))
                .collect();

            // An empty pool is reported for every stratum, even one with no target.
            if eligible.len() < target || questions.is_empty() {
                result.warnings.push(format!(
                    "{} stratum: requested {} questions but only {} available",
                    stratum,
                    target,
                    eligible.len()
                ));
            }

            let drawn = self.draw(&eligible, target);
            debug!(
                "{} stratum: {} eligible, {} drawn",
                stratum,
                eligible.len(),
                drawn.len()
            );
            result.questions.extend(drawn.into_iter().cloned());
        }

        result
    }

    /// Uniform draw without replacement of `min(target, eligible.len())` items.
    fn draw<'q>(&mut self, eligible: &[&'q Question], target: usize) -> Vec<&'q Question> {
        let amount = target.min(eligible.len());
        index::sample(&mut self.rng, eligible.len(), amount)
            .into_iter()
            .map(|i| eligible[i])
            .collect()
    }
}
