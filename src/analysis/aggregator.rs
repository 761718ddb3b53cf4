//! Forecast aggregation and statistics.
//!
//! Turns the raw forecast rows of a question set into per-model counts
//! and a set-level summary used by the report generators.

use crate::models::{Forecast, QuestionSet, QuestionSetStatus, Resolution};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Longest reasoning excerpt kept in a sample forecast.
const SAMPLE_REASONING_CHARS: usize = 200;

/// Per-model statistics over a set of forecasts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStats {
    pub model: String,
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    /// Mean probability over successful binary forecasts.
    pub mean_probability: Option<f64>,
    /// Failure counts keyed by failure kind.
    pub failure_kinds: BTreeMap<String, usize>,
}

/// A forecast excerpt shown in summaries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleForecast {
    pub forecaster: String,
    pub source: String,
    pub question_id: String,
    pub probability: Option<f64>,
    pub reasoning: String,
}

/// Everything the summary reports show for one question set.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionSetSummary {
    pub set: QuestionSet,
    pub status: QuestionSetStatus,
    pub question_count: usize,
    pub total_forecasts: usize,
    pub failures: usize,
    pub models: Vec<ModelStats>,
    /// Questions with at least one stored resolution.
    pub resolved_questions: usize,
    /// Questions whose source reported a final outcome.
    pub final_resolutions: usize,
    pub samples: Vec<SampleForecast>,
    pub generated_at: DateTime<Utc>,
}

/// Group forecasts by forecaster, ordered by name.
pub fn group_by_forecaster(forecasts: &[Forecast]) -> BTreeMap<String, Vec<&Forecast>> {
    let mut grouped: BTreeMap<String, Vec<&Forecast>> = BTreeMap::new();

    for forecast in forecasts {
        grouped
            .entry(forecast.forecaster.clone())
            .or_default()
            .push(forecast);
    }

    grouped
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Per-model statistics, ordered by model name.
pub fn model_stats(forecasts: &[Forecast]) -> Vec<ModelStats> {
    group_by_forecaster(forecasts)
        .into_iter()
        .map(|(model, rows)| {
            let failures = rows.iter().filter(|f| f.is_failure()).count();
            let probabilities: Vec<f64> = rows
                .iter()
                .filter(|f| !f.is_failure())
                .filter_map(|f| f.probability)
                .collect();

            let mut failure_kinds = BTreeMap::new();
            for kind in rows.iter().filter_map(|f| f.error_kind) {
                *failure_kinds.entry(kind.as_str().to_string()).or_default() += 1;
            }

            ModelStats {
                model,
                total: rows.len(),
                successes: rows.len() - failures,
                failures,
                mean_probability: mean(&probabilities),
                failure_kinds,
            }
        })
        .collect()
}

fn excerpt(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(SAMPLE_REASONING_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Up to `n` sample forecasts, preferring successful ones.
pub fn sample_forecasts(forecasts: &[Forecast], n: usize) -> Vec<SampleForecast> {
    let successes = forecasts.iter().filter(|f| !f.is_failure());
    let failures = forecasts.iter().filter(|f| f.is_failure());

    successes
        .chain(failures)
        .take(n)
        .map(|f| SampleForecast {
            forecaster: f.forecaster.clone(),
            source: f.source.clone(),
            question_id: f.question_id.clone(),
            probability: f.probability,
            reasoning: excerpt(f.reasoning.as_deref().unwrap_or("")),
        })
        .collect()
}

/// Builds the summary of a question set from its stored rows.
pub fn summarize(
    set: QuestionSet,
    question_count: usize,
    forecasts: &[Forecast],
    resolutions: &[Resolution],
    today: NaiveDate,
    sample_count: usize,
) -> QuestionSetSummary {
    let resolved: HashSet<(&str, &str)> = resolutions
        .iter()
        .map(|r| (r.source.as_str(), r.question_id.as_str()))
        .collect();
    let finals: HashSet<(&str, &str)> = resolutions
        .iter()
        .filter(|r| r.is_final)
        .map(|r| (r.source.as_str(), r.question_id.as_str()))
        .collect();

    QuestionSetSummary {
        status: set.status(today, forecasts.len()),
        set,
        question_count,
        total_forecasts: forecasts.len(),
        failures: forecasts.iter().filter(|f| f.is_failure()).count(),
        models: model_stats(forecasts),
        resolved_questions: resolved.len(),
        final_resolutions: finals.len(),
        samples: sample_forecasts(forecasts, sample_count),
        generated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureKind, ForecastStatus};

    fn forecast(model: &str, probability: Option<f64>, failed: bool) -> Forecast {
        Forecast {
            id: None,
            question_id: "q1".to_string(),
            source: "manifold".to_string(),
            forecaster: model.to_string(),
            probability,
            point_estimate: None,
            quantile_values: None,
            reasoning: Some(if failed {
                "Error: timed out".to_string()
            } else {
                "Market consensus".to_string()
            }),
            status: if failed {
                ForecastStatus::Failure
            } else {
                ForecastStatus::Success
            },
            error_kind: failed.then_some(FailureKind::Timeout),
            created_at: Utc::now(),
            question_set_id: Some(1),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_model_stats_excludes_failures_from_mean() {
        let forecasts = vec![
            forecast("openai/gpt-4o-mini", Some(0.2), false),
            forecast("openai/gpt-4o-mini", Some(0.6), false),
            forecast("openai/gpt-4o-mini", Some(0.5), true),
            forecast("anthropic/claude-3-haiku-20240307", Some(0.9), false),
        ];

        let stats = model_stats(&forecasts);

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].model, "anthropic/claude-3-haiku-20240307");
        let openai = &stats[1];
        assert_eq!(openai.total, 3);
        assert_eq!(openai.failures, 1);
        assert!((openai.mean_probability.unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(openai.failure_kinds.get("timeout"), Some(&1));
    }

    #[test]
    fn test_sample_forecasts_prefers_successes_and_truncates() {
        let mut long = forecast("b", Some(0.3), false);
        long.reasoning = Some("x".repeat(500));
        let forecasts = vec![forecast("a", Some(0.5), true), long, forecast("c", Some(0.7), false)];

        let samples = sample_forecasts(&forecasts, 2);

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].forecaster, "b");
        assert_eq!(samples[0].reasoning.len(), SAMPLE_REASONING_CHARS + 3);
        assert_eq!(samples[1].forecaster, "c");
    }

    #[test]
    fn test_summarize_counts_resolutions() {
        let set = QuestionSet {
            id: 1,
            name: "test".to_string(),
            freeze_date: date(2026, 10, 1),
            forecast_due_date: date(2026, 10, 2),
            resolution_dates: vec![date(2026, 10, 8)],
            created_at: Utc::now(),
        };
        let resolutions = vec![
            Resolution {
                question_id: "q1".to_string(),
                source: "manifold".to_string(),
                date: date(2026, 10, 5),
                value: 0.4,
                is_final: false,
            },
            Resolution {
                question_id: "q1".to_string(),
                source: "manifold".to_string(),
                date: date(2026, 10, 9),
                value: 1.0,
                is_final: true,
            },
        ];
        let forecasts = vec![forecast("a", Some(0.5), false)];

        let summary = summarize(set, 2, &forecasts, &resolutions, date(2026, 10, 16), 3);

        assert_eq!(summary.status, QuestionSetStatus::Resolvable);
        assert_eq!(summary.question_count, 2);
        assert_eq!(summary.total_forecasts, 1);
        assert_eq!(summary.resolved_questions, 1);
        assert_eq!(summary.final_resolutions, 1);
    }
}
