//! Data models for the forecasting benchmark.
//!
//! This module contains the core data structures shared by sources,
//! the sampler, forecasters and storage: questions, forecasts,
//! resolutions and question sets.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of answer a question expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    /// Yes/no question answered with a probability
    Binary,
    /// Numeric question answered with a point estimate
    Continuous,
    /// Numeric question answered with a set of quantile values
    Quantile,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Binary => "binary",
            QuestionType::Continuous => "continuous",
            QuestionType::Quantile => "quantile",
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binary" => Ok(QuestionType::Binary),
            "continuous" => Ok(QuestionType::Continuous),
            "quantile" => Ok(QuestionType::Quantile),
            other => Err(format!("Unknown question type: {}", other)),
        }
    }
}

/// Where a question originates from. Sampling balances across this axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Prediction markets and forecasting platforms
    Market,
    /// Questions generated from data series (economic indicators, prices)
    Data,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Market => "market",
            SourceType::Data => "data",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Market => write!(f, "MARKET"),
            SourceType::Data => write!(f, "DATA"),
        }
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "market" => Ok(SourceType::Market),
            "data" => Ok(SourceType::Data),
            other => Err(format!("Unknown source type: {}", other)),
        }
    }
}

/// A forecasting question, normalized across sources.
///
/// `(source, id)` is the identity of a question everywhere in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Identifier within the originating source.
    pub id: String,
    /// Name of the originating source (e.g. "manifold").
    pub source: String,
    /// Market or data origin.
    pub source_type: SourceType,
    /// The question itself.
    pub text: String,
    /// Additional context given to forecasters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    /// Link back to the question on its platform.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub question_type: QuestionType,
    /// When the source created the question (or when it was fetched).
    pub created_at: DateTime<Utc>,
    /// Date the question is expected to resolve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_value: Option<f64>,
    /// Crowd or market probability at fetch time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_rate: Option<f64>,
    /// Expected (low, high) range for numeric questions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_range: Option<(f64, f64)>,
    /// Quantile levels requested for quantile questions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantiles: Option<Vec<f64>>,
}

impl Question {
    /// Creates an open binary question with no optional fields set.
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        source_type: SourceType,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            source_type,
            text: text.into(),
            background: None,
            url: None,
            question_type: QuestionType::Binary,
            created_at: Utc::now(),
            resolution_date: None,
            category: None,
            resolved: false,
            resolution_value: None,
            base_rate: None,
            value_range: None,
            quantiles: None,
        }
    }

    /// Sets the resolution date.
    #[must_use]
    pub fn with_resolution_date(mut self, date: NaiveDate) -> Self {
        self.resolution_date = Some(date);
        self
    }

    /// Returns the `(source, id)` identity pair.
    pub fn key(&self) -> (&str, &str) {
        (&self.source, &self.id)
    }

    pub fn is_binary(&self) -> bool {
        self.question_type == QuestionType::Binary
    }
}

/// A prediction value, shaped by the question type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Prediction {
    Probability(f64),
    PointEstimate(f64),
    Quantiles(Vec<f64>),
}

/// Why a forecaster could not produce a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network or HTTP status error
    Http,
    /// The provider did not answer in time
    Timeout,
    /// The response could not be parsed
    MalformedResponse,
    /// The response parsed but violated the expected ranges
    Validation,
    /// No API key for the provider
    MissingApiKey,
    /// Unknown provider or unsupported question
    Unsupported,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Http => "http",
            FailureKind::Timeout => "timeout",
            FailureKind::MalformedResponse => "malformed_response",
            FailureKind::Validation => "validation",
            FailureKind::MissingApiKey => "missing_api_key",
            FailureKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(FailureKind::Http),
            "timeout" => Ok(FailureKind::Timeout),
            "malformed_response" => Ok(FailureKind::MalformedResponse),
            "validation" => Ok(FailureKind::Validation),
            "missing_api_key" => Ok(FailureKind::MissingApiKey),
            "unsupported" => Ok(FailureKind::Unsupported),
            other => Err(format!("Unknown failure kind: {}", other)),
        }
    }
}

/// Result of asking a forecaster about one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ForecastOutcome {
    Success {
        prediction: Prediction,
        reasoning: String,
    },
    Failure {
        kind: FailureKind,
        message: String,
    },
}

impl ForecastOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ForecastOutcome::Success { .. })
    }
}

/// Persisted status of a forecast row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastStatus {
    Success,
    Failure,
}

impl ForecastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastStatus::Success => "success",
            ForecastStatus::Failure => "failure",
        }
    }
}

impl FromStr for ForecastStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ForecastStatus::Success),
            "failure" => Ok(ForecastStatus::Failure),
            other => Err(format!("Unknown forecast status: {}", other)),
        }
    }
}

/// Marker that starts the reasoning of every failed forecast row.
///
/// Downstream reports written against older databases look for it.
pub const ERROR_REASONING_PREFIX: &str = "Error:";

/// A forecast as produced by a forecaster, not yet attached to a question set.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastDraft {
    pub question_id: String,
    pub source: String,
    pub question_type: QuestionType,
    pub forecaster: String,
    pub outcome: ForecastOutcome,
    pub created_at: DateTime<Utc>,
}

impl ForecastDraft {
    pub fn success(
        question: &Question,
        forecaster: &str,
        prediction: Prediction,
        reasoning: String,
    ) -> Self {
        Self::with_outcome(
            question,
            forecaster,
            ForecastOutcome::Success {
                prediction,
                reasoning,
            },
        )
    }

    pub fn failure(
        question: &Question,
        forecaster: &str,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self::with_outcome(
            question,
            forecaster,
            ForecastOutcome::Failure {
                kind,
                message: message.into(),
            },
        )
    }

    fn with_outcome(question: &Question, forecaster: &str, outcome: ForecastOutcome) -> Self {
        Self {
            question_id: question.id.clone(),
            source: question.source.clone(),
            question_type: question.question_type,
            forecaster: forecaster.to_string(),
            outcome,
            created_at: Utc::now(),
        }
    }

    /// Binds the draft to a question set, producing the persisted entity.
    ///
    /// Failures carry the neutral prediction for their question type:
    /// probability 0.5 for binary questions, nothing for numeric ones.
    pub fn bind(self, question_set_id: Option<i64>) -> Forecast {
        let mut forecast = Forecast {
            id: None,
            question_id: self.question_id,
            source: self.source,
            forecaster: self.forecaster,
            probability: None,
            point_estimate: None,
            quantile_values: None,
            reasoning: None,
            status: ForecastStatus::Success,
            error_kind: None,
            created_at: self.created_at,
            question_set_id,
        };

        match self.outcome {
            ForecastOutcome::Success {
                prediction,
                reasoning,
            } => {
                match prediction {
                    Prediction::Probability(p) => forecast.probability = Some(p),
                    Prediction::PointEstimate(v) => forecast.point_estimate = Some(v),
                    Prediction::Quantiles(values) => forecast.quantile_values = Some(values),
                }
                forecast.reasoning = Some(reasoning);
            }
            ForecastOutcome::Failure { kind, message } => {
                forecast.status = ForecastStatus::Failure;
                forecast.error_kind = Some(kind);
                forecast.reasoning = Some(format!("{} {}", ERROR_REASONING_PREFIX, message));
                if self.question_type == QuestionType::Binary {
                    forecast.probability = Some(0.5);
                }
            }
        }

        forecast
    }
}

/// A persisted forecast row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    /// Row id, assigned by storage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub question_id: String,
    pub source: String,
    /// Model identifier that produced the forecast.
    pub forecaster: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_estimate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantile_values: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub status: ForecastStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_set_id: Option<i64>,
}

impl Forecast {
    pub fn is_failure(&self) -> bool {
        self.status == ForecastStatus::Failure
    }
}

/// Ground-truth (or interim) value of a question on a given date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub question_id: String,
    pub source: String,
    pub date: NaiveDate,
    pub value: f64,
    /// True when the source reports a final outcome rather than a
    /// current market price.
    pub is_final: bool,
}

/// One frozen entry of a question set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuestionSetItem {
    pub source: String,
    pub question_id: String,
}

/// A named, dated snapshot of sampled questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSet {
    pub id: i64,
    pub name: String,
    pub freeze_date: NaiveDate,
    pub forecast_due_date: NaiveDate,
    pub resolution_dates: Vec<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle stage of a question set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionSetStatus {
    /// Frozen, no forecasts yet
    Created,
    /// Forecasts attached, no resolution date reached
    Collecting,
    /// At least one resolution date has passed
    Resolvable,
}

impl fmt::Display for QuestionSetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionSetStatus::Created => write!(f, "created"),
            QuestionSetStatus::Collecting => write!(f, "collecting forecasts"),
            QuestionSetStatus::Resolvable => write!(f, "resolvable"),
        }
    }
}

impl QuestionSet {
    /// Lifecycle stage on `today` given how many forecasts reference the set.
    pub fn status(&self, today: NaiveDate, forecast_count: usize) -> QuestionSetStatus {
        let first_resolution = self.resolution_dates.iter().min();
        match first_resolution {
            Some(date) if today >= *date => QuestionSetStatus::Resolvable,
            _ if forecast_count > 0 => QuestionSetStatus::Collecting,
            _ => QuestionSetStatus::Created,
        }
    }
}

/// Input for creating a question set.
#[derive(Debug, Clone)]
pub struct NewQuestionSet<'a> {
    pub name: String,
    pub questions: &'a [Question],
    pub freeze_date: NaiveDate,
    pub forecast_due_date: NaiveDate,
    pub resolution_dates: Vec<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_question_type_from_str() {
        assert_eq!("binary".parse::<QuestionType>(), Ok(QuestionType::Binary));
        assert_eq!("QUANTILE".parse::<QuestionType>(), Ok(QuestionType::Quantile));
        assert!("ordinal".parse::<QuestionType>().is_err());
    }

    #[test]
    fn test_source_type_display() {
        assert_eq!(SourceType::Market.to_string(), "MARKET");
        assert_eq!(SourceType::Data.to_string(), "DATA");
        assert_eq!("data".parse::<SourceType>(), Ok(SourceType::Data));
    }

    #[test]
    fn test_bind_success_keeps_prediction() {
        let question = Question::new("q1", "manifold", SourceType::Market, "Will it rain?");
        let draft = ForecastDraft::success(
            &question,
            "openai/gpt-4o-mini",
            Prediction::Probability(0.7),
            "Seasonal base rate".to_string(),
        );

        let forecast = draft.bind(Some(3));

        assert_eq!(forecast.probability, Some(0.7));
        assert_eq!(forecast.status, ForecastStatus::Success);
        assert_eq!(forecast.question_set_id, Some(3));
        assert_eq!(forecast.reasoning.as_deref(), Some("Seasonal base rate"));
        assert!(forecast.error_kind.is_none());
    }

    #[test]
    fn test_bind_failure_binary_gets_neutral_probability() {
        let question = Question::new("q1", "manifold", SourceType::Market, "Will it rain?");
        let draft =
            ForecastDraft::failure(&question, "m", FailureKind::Timeout, "request timed out");

        let forecast = draft.bind(None);

        assert!(forecast.is_failure());
        assert_eq!(forecast.probability, Some(0.5));
        assert_eq!(forecast.error_kind, Some(FailureKind::Timeout));
        assert!(forecast
            .reasoning
            .as_deref()
            .unwrap()
            .starts_with(ERROR_REASONING_PREFIX));
    }

    #[test]
    fn test_bind_failure_numeric_has_no_prediction() {
        let mut question = Question::new("gdp", "fred", SourceType::Data, "GDP in Q4?");
        question.question_type = QuestionType::Continuous;

        let forecast =
            ForecastDraft::failure(&question, "m", FailureKind::Http, "502").bind(Some(1));

        assert!(forecast.probability.is_none());
        assert!(forecast.point_estimate.is_none());
        assert!(forecast.quantile_values.is_none());
    }

    #[test]
    fn test_question_set_status() {
        let set = QuestionSet {
            id: 1,
            name: "test".to_string(),
            freeze_date: date(2026, 1, 1),
            forecast_due_date: date(2026, 1, 2),
            resolution_dates: vec![date(2026, 1, 15), date(2026, 1, 8)],
            created_at: Utc::now(),
        };

        assert_eq!(set.status(date(2026, 1, 1), 0), QuestionSetStatus::Created);
        assert_eq!(set.status(date(2026, 1, 3), 4), QuestionSetStatus::Collecting);
        assert_eq!(set.status(date(2026, 1, 8), 4), QuestionSetStatus::Resolvable);
    }
}
