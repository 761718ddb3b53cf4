//! Question template shared by data-series sources.
//!
//! A series question asks whether a series will be higher on a future date
//! than its latest observed value. The id encodes everything needed to
//! resolve it later: `{series}|{base_date}|{resolution_date}`.

use crate::models::{Question, QuestionType, Resolution, SourceType};
use anyhow::{anyhow, Result};
use chrono::{Duration, NaiveDate};

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesObservation {
    pub date: NaiveDate,
    pub value: f64,
}

/// Components of a series question id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesQuestionId {
    pub series: String,
    pub base_date: NaiveDate,
    pub resolution_date: NaiveDate,
}

impl SeriesQuestionId {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.rsplitn(3, '|');
        let resolution = parts.next();
        let base = parts.next();
        let series = parts.next();

        match (series, base, resolution) {
            (Some(series), Some(base), Some(resolution)) if !series.is_empty() => Ok(Self {
                series: series.to_string(),
                base_date: base
                    .parse()
                    .map_err(|e| anyhow!("Invalid base date in {:?}: {}", raw, e))?,
                resolution_date: resolution
                    .parse()
                    .map_err(|e| anyhow!("Invalid resolution date in {:?}: {}", raw, e))?,
            }),
            _ => Err(anyhow!("Malformed series question id: {:?}", raw)),
        }
    }

    pub fn format(&self) -> String {
        format!("{}|{}|{}", self.series, self.base_date, self.resolution_date)
    }
}

/// One question per horizon, anchored on the latest observation.
///
/// Horizons that are not positive or overflow the calendar are skipped.
pub fn build_questions(
    source: &str,
    series_id: &str,
    title: &str,
    latest: &SeriesObservation,
    horizons_days: &[i64],
    today: NaiveDate,
    url: Option<&str>,
) -> Vec<Question> {
    horizons_days
        .iter()
        .filter(|days| **days > 0)
        .filter_map(|days| {
            Duration::try_days(*days).and_then(|d| today.checked_add_signed(d))
        })
        .map(|resolution_date| {
            let id = SeriesQuestionId {
                series: series_id.to_string(),
                base_date: latest.date,
                resolution_date,
            };
            let text = format!(
                "Will {} ({}) be higher on {} than its most recent value of {} (as of {})?",
                title, series_id, resolution_date, latest.value, latest.date
            );

            let mut question = Question::new(id.format(), source, SourceType::Data, text);
            question.question_type = QuestionType::Binary;
            question.resolution_date = Some(resolution_date);
            question.url = url.map(String::from);
            question.background = Some(format!(
                "{} observed {} on {}. Resolves YES if the first value reported on or after {} is strictly greater.",
                series_id, latest.value, latest.date, resolution_date
            ));
            question
        })
        .collect()
}

/// Resolves a series question from an observation history.
///
/// The baseline is the last observation on or before the base date; the
/// outcome is the first observation on or after the resolution date.
/// Returns `None` until both exist.
pub fn resolve(
    source: &str,
    question_id: &str,
    observations: &[SeriesObservation],
) -> Result<Option<Resolution>> {
    let id = SeriesQuestionId::parse(question_id)?;

    let baseline = observations
        .iter()
        .filter(|o| o.date <= id.base_date)
        .max_by_key(|o| o.date);
    let outcome = observations
        .iter()
        .filter(|o| o.date >= id.resolution_date)
        .min_by_key(|o| o.date);

    Ok(match (baseline, outcome) {
        (Some(baseline), Some(outcome)) => Some(Resolution {
            question_id: question_id.to_string(),
            source: source.to_string(),
            date: outcome.date,
            value: if outcome.value > baseline.value { 1.0 } else { 0.0 },
            is_final: true,
        }),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn obs(d: &str, value: f64) -> SeriesObservation {
        SeriesObservation { date: date(d), value }
    }

    #[test]
    fn test_question_id_roundtrip_with_pipe_in_series() {
        let id = SeriesQuestionId::parse("A|B|2026-01-02|2026-02-01").unwrap();
        assert_eq!(id.series, "A|B");
        assert_eq!(id.base_date, date("2026-01-02"));
        assert_eq!(id.format(), "A|B|2026-01-02|2026-02-01");

        assert!(SeriesQuestionId::parse("UNRATE|2026-01-02").is_err());
        assert!(SeriesQuestionId::parse("UNRATE|yesterday|2026-02-01").is_err());
    }

    #[test]
    fn test_build_questions_per_horizon() {
        let latest = obs("2026-10-01", 4.1);
        let questions = build_questions(
            "fred",
            "UNRATE",
            "Unemployment Rate",
            &latest,
            &[7, 30, 0, -5],
            date("2026-10-16"),
            None,
        );

        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].id, "UNRATE|2026-10-01|2026-10-23");
        assert_eq!(questions[1].resolution_date, Some(date("2026-11-15")));
        assert_eq!(questions[0].source_type, SourceType::Data);
        assert!(questions[0].text.contains("Unemployment Rate (UNRATE)"));
        assert!(questions[0].text.contains("4.1"));
    }

    #[test]
    fn test_resolve_compares_against_baseline() {
        let history = vec![
            obs("2026-09-30", 100.0),
            obs("2026-10-01", 101.0),
            obs("2026-10-20", 100.5),
            obs("2026-10-24", 102.0),
            obs("2026-10-27", 99.0),
        ];

        let higher = resolve("yahoo_finance", "SPY|2026-10-01|2026-10-22", &history)
            .unwrap()
            .unwrap();
        assert_eq!(higher.value, 1.0);
        assert_eq!(higher.date, date("2026-10-24"));
        assert!(higher.is_final);

        let lower = resolve("yahoo_finance", "SPY|2026-10-01|2026-10-25", &history)
            .unwrap()
            .unwrap();
        assert_eq!(lower.value, 0.0);

        assert!(resolve("yahoo_finance", "SPY|2026-10-01|2026-11-30", &history)
            .unwrap()
            .is_none());
    }
}
