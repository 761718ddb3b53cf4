//! Prompt construction and response parsing for LLM forecasters.

use super::ForecastError;
use crate::models::{Prediction, Question, QuestionType};
use chrono::NaiveDate;
use serde::Deserialize;

/// Quantile levels asked for when a question does not specify its own.
pub const DEFAULT_QUANTILES: [f64; 5] = [0.1, 0.25, 0.5, 0.75, 0.9];

pub const SYSTEM_PROMPT: &str = "You are an expert superforecaster, familiar with the work of \
Tetlock and others. You always answer with a single JSON object and nothing else.";

const NO_BACKGROUND: &str = "No additional background provided.";

#[derive(Debug, Deserialize)]
struct BinaryResponse {
    probability: f64,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct ContinuousResponse {
    point_estimate: f64,
    #[serde(default)]
    confidence_low: Option<f64>,
    #[serde(default)]
    confidence_high: Option<f64>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct QuantileResponse {
    quantile_values: Vec<f64>,
    #[serde(default)]
    reasoning: String,
}

pub fn quantile_levels(question: &Question) -> &[f64] {
    question.quantiles.as_deref().unwrap_or(&DEFAULT_QUANTILES[..])
}

fn format_percent(level: f64) -> String {
    format!("{:.0}%", level * 100.0)
}

/// Builds the user prompt for a question.
pub fn build_prompt(question: &Question, today: NaiveDate) -> String {
    let background = question
        .background
        .as_deref()
        .filter(|b| !b.trim().is_empty())
        .unwrap_or(NO_BACKGROUND);
    let resolution_date = question
        .resolution_date
        .map(|d| d.to_string())
        .unwrap_or_else(|| "Not specified".to_string());
    let range = question
        .value_range
        .map(|(low, high)| format!("\nExpected range: {} to {}\n", low, high))
        .unwrap_or_default();

    let (task, answer) = match question.question_type {
        QuestionType::Binary => (
            "Estimate the probability that the question below resolves YES. You must give a \
             probability between 0 and 1 under all circumstances; if unsure, use the base rate."
                .to_string(),
            r#"{"probability": <number between 0 and 1>, "reasoning": "<brief reasoning>"}"#
                .to_string(),
        ),
        QuestionType::Continuous => (
            "Estimate the numeric value the question below will resolve to. You must give a \
             point estimate under all circumstances."
                .to_string(),
            r#"{"point_estimate": <number>, "confidence_low": <number or null>, "confidence_high": <number or null>, "reasoning": "<brief reasoning>"}"#
                .to_string(),
        ),
        QuestionType::Quantile => {
            let levels = quantile_levels(question)
                .iter()
                .map(|q| format_percent(*q))
                .collect::<Vec<_>>()
                .join(", ");
            (
                format!(
                    "Estimate the distribution of the value the question below will resolve to. \
                     For each quantile ({}), give the value X such that the true value is below X \
                     with that probability.",
                    levels
                ),
                r#"{"quantile_values": [<one number per quantile, in order>], "reasoning": "<brief reasoning>"}"#
                    .to_string(),
            )
        }
    };

    format!(
        "{task}\n\nQuestion:\n{text}\n\nQuestion Background:\n{background}\n{range}\n\
         Today's Date: {today}\n\nResolution Date: {resolution_date}\n\n\
         Respond with JSON in exactly this shape:\n{answer}",
        task = task,
        text = question.text,
        background = background,
        range = range,
        today = today,
        resolution_date = resolution_date,
        answer = answer,
    )
}

/// Finds the JSON object in a model reply.
///
/// Replies are often wrapped in Markdown fences or surrounded by prose.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn decode<'a, T: Deserialize<'a>>(json: &'a str) -> Result<T, ForecastError> {
    serde_json::from_str(json).map_err(|e| ForecastError::MalformedResponse(e.to_string()))
}

/// Parses and validates a model reply for the given question.
pub fn parse_response(question: &Question, text: &str) -> Result<(Prediction, String), ForecastError> {
    let json = extract_json(text).ok_or_else(|| {
        ForecastError::MalformedResponse(format!(
            "no JSON object in reply: {:?}",
            text.chars().take(200).collect::<String>()
        ))
    })?;

    match question.question_type {
        QuestionType::Binary => {
            let r: BinaryResponse = decode(json)?;
            if !r.probability.is_finite() || !(0.0..=1.0).contains(&r.probability) {
                return Err(ForecastError::Validation(format!(
                    "probability {} outside [0, 1]",
                    r.probability
                )));
            }
            Ok((Prediction::Probability(r.probability), r.reasoning))
        }
        QuestionType::Continuous => {
            let r: ContinuousResponse = decode(json)?;
            if !r.point_estimate.is_finite() {
                return Err(ForecastError::Validation(
                    "point estimate is not a finite number".to_string(),
                ));
            }
            if let (Some(low), Some(high)) = (r.confidence_low, r.confidence_high) {
                if low > high {
                    return Err(ForecastError::Validation(format!(
                        "confidence interval [{}, {}] is inverted",
                        low, high
                    )));
                }
            }
            Ok((Prediction::PointEstimate(r.point_estimate), r.reasoning))
        }
        QuestionType::Quantile => {
            let r: QuantileResponse = decode(json)?;
            let expected = quantile_levels(question).len();
            if r.quantile_values.len() != expected {
                return Err(ForecastError::Validation(format!(
                    "expected {} quantile values, got {}",
                    expected,
                    r.quantile_values.len()
                )));
            }
            if r.quantile_values.iter().any(|v| !v.is_finite()) {
                return Err(ForecastError::Validation(
                    "quantile values must be finite".to_string(),
                ));
            }
            if r.quantile_values.windows(2).any(|w| w[0] > w[1]) {
                return Err(ForecastError::Validation(
                    "quantile values must be non-decreasing".to_string(),
                ));
            }
            Ok((Prediction::Quantiles(r.quantile_values), r.reasoning))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn binary() -> Question {
        Question::new("q1", "manifold", SourceType::Market, "Will it rain in Paris tomorrow?")
    }

    fn quantile() -> Question {
        let mut q = Question::new("q2", "fred", SourceType::Data, "What will CPI be in March?");
        q.question_type = QuestionType::Quantile;
        q.value_range = Some((300.0, 330.0));
        q
    }

    #[test]
    fn test_binary_prompt() {
        let q = binary().with_resolution_date(NaiveDate::from_ymd_opt(2026, 10, 17).unwrap());
        let prompt = build_prompt(&q, today());

        assert!(prompt.contains("Will it rain in Paris tomorrow?"));
        assert!(prompt.contains(NO_BACKGROUND));
        assert!(prompt.contains("Today's Date: 2026-10-16"));
        assert!(prompt.contains("Resolution Date: 2026-10-17"));
        assert!(prompt.contains("\"probability\""));
    }

    #[test]
    fn test_quantile_prompt_lists_levels_and_range() {
        let prompt = build_prompt(&quantile(), today());

        assert!(prompt.contains("10%, 25%, 50%, 75%, 90%"));
        assert!(prompt.contains("Expected range: 300 to 330"));
        assert!(prompt.contains("Resolution Date: Not specified"));
        assert!(prompt.contains("quantile_values"));
    }

    #[test]
    fn test_parse_tolerates_fences_and_prose() {
        let reply = "Here is my forecast:\n```json\n{\"probability\": 0.72, \"reasoning\": \"Seasonal pattern\"}\n```\nGood luck!";

        let (prediction, reasoning) = parse_response(&binary(), reply).unwrap();

        assert_eq!(prediction, Prediction::Probability(0.72));
        assert_eq!(reasoning, "Seasonal pattern");
    }

    #[test]
    fn test_parse_rejects_out_of_range_probability() {
        let err = parse_response(&binary(), r#"{"probability": 1.3, "reasoning": "sure"}"#)
            .unwrap_err();
        assert!(matches!(err, ForecastError::Validation(_)));

        let err = parse_response(&binary(), "I think 70%").unwrap_err();
        assert!(matches!(err, ForecastError::MalformedResponse(_)));

        let err = parse_response(&binary(), r#"{"prob": 0.4}"#).unwrap_err();
        assert!(matches!(err, ForecastError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_quantiles() {
        let ok = r#"{"quantile_values": [301, 305, 310, 314, 320], "reasoning": "trend"}"#;
        let (prediction, _) = parse_response(&quantile(), ok).unwrap();
        assert_eq!(
            prediction,
            Prediction::Quantiles(vec![301.0, 305.0, 310.0, 314.0, 320.0])
        );

        let short = r#"{"quantile_values": [301, 310], "reasoning": "trend"}"#;
        assert!(matches!(
            parse_response(&quantile(), short),
            Err(ForecastError::Validation(_))
        ));

        let unordered = r#"{"quantile_values": [301, 299, 310, 314, 320]}"#;
        assert!(matches!(
            parse_response(&quantile(), unordered),
            Err(ForecastError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_continuous() {
        let mut q = binary();
        q.question_type = QuestionType::Continuous;

        let (prediction, _) = parse_response(
            &q,
            r#"{"point_estimate": 4.2, "confidence_low": 3.9, "confidence_high": 4.6, "reasoning": "x"}"#,
        )
        .unwrap();
        assert_eq!(prediction, Prediction::PointEstimate(4.2));

        let inverted = r#"{"point_estimate": 4.2, "confidence_low": 5, "confidence_high": 4}"#;
        assert!(parse_response(&q, inverted).is_err());
    }
}
