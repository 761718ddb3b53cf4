//! FRED (Federal Reserve Economic Data) source.

use super::series::{self, SeriesObservation, SeriesQuestionId};
use super::{get_json, QuestionSource};
use crate::config::SourcesConfig;
use crate::models::{Question, Resolution, SourceType};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, warn};

pub const FRED_API_URL: &str = "https://api.stlouisfed.org/fred";

/// Number of most recent observations requested when looking for the
/// latest value. Sparse series report "." for missing days.
const LATEST_LOOKBACK: usize = 10;

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    #[serde(default)]
    observations: Vec<RawObservation>,
}

#[derive(Debug, Deserialize)]
struct RawObservation {
    date: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct SeriesResponse {
    #[serde(default)]
    seriess: Vec<SeriesInfo>,
}

#[derive(Debug, Deserialize)]
struct SeriesInfo {
    title: String,
}

/// Converts raw observations, dropping missing values.
fn parse_observations(raw: Vec<RawObservation>) -> Vec<SeriesObservation> {
    raw.into_iter()
        .filter_map(|o| {
            let date = o.date.parse::<NaiveDate>().ok()?;
            let value = o.value.trim().parse::<f64>().ok()?;
            Some(SeriesObservation { date, value })
        })
        .collect()
}

pub struct FredSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    series: Vec<String>,
    horizons_days: Vec<i64>,
}

impl FredSource {
    pub fn new(client: reqwest::Client, config: &SourcesConfig, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: FRED_API_URL.to_string(),
            api_key,
            series: config.fred_series.clone(),
            horizons_days: config.horizons_days.clone(),
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("FRED API key not configured (set FRED_API_KEY)"))
    }

    async fn observations(
        &self,
        series_id: &str,
        extra: &[(&str, String)],
    ) -> Result<Vec<SeriesObservation>> {
        let url = format!("{}/series/observations", self.base_url);
        let mut query = vec![
            ("series_id", series_id.to_string()),
            ("api_key", self.api_key()?.to_string()),
            ("file_type", "json".to_string()),
        ];
        query.extend(extra.iter().cloned());

        let response: ObservationsResponse = get_json(&self.client, &url, &query)
            .await
            .with_context(|| format!("Failed to fetch FRED observations for {}", series_id))?;
        Ok(parse_observations(response.observations))
    }

    async fn title(&self, series_id: &str) -> Result<String> {
        let url = format!("{}/series", self.base_url);
        let query = [
            ("series_id", series_id.to_string()),
            ("api_key", self.api_key()?.to_string()),
            ("file_type", "json".to_string()),
        ];
        let response: SeriesResponse = get_json(&self.client, &url, &query).await?;
        Ok(response
            .seriess
            .into_iter()
            .next()
            .map(|s| s.title)
            .unwrap_or_else(|| series_id.to_string()))
    }

    async fn series_questions(&self, series_id: &str) -> Result<Vec<Question>> {
        let recent = self
            .observations(
                series_id,
                &[
                    ("sort_order", "desc".to_string()),
                    ("limit", LATEST_LOOKBACK.to_string()),
                ],
            )
            .await?;
        let latest = recent
            .iter()
            .max_by_key(|o| o.date)
            .ok_or_else(|| anyhow!("No observations for FRED series {}", series_id))?;

        let title = match self.title(series_id).await {
            Ok(title) => title,
            Err(e) => {
                warn!("Failed to fetch FRED title for {}: {}", series_id, e);
                series_id.to_string()
            }
        };

        Ok(series::build_questions(
            "fred",
            series_id,
            &title,
            latest,
            &self.horizons_days,
            Utc::now().date_naive(),
            Some(&format!("https://fred.stlouisfed.org/series/{}", series_id)),
        ))
    }
}

#[async_trait]
impl QuestionSource for FredSource {
    fn name(&self) -> &'static str {
        "fred"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Data
    }

    async fn fetch_questions(&self) -> Result<Vec<Question>> {
        self.api_key()?;

        let mut questions = Vec::new();
        for series_id in &self.series {
            match self.series_questions(series_id).await {
                Ok(mut batch) => questions.append(&mut batch),
                Err(e) => warn!("Skipping FRED series {}: {}", series_id, e),
            }
        }

        info!("Generated {} questions from FRED", questions.len());
        Ok(questions)
    }

    async fn fetch_resolution(&self, question_id: &str) -> Result<Option<Resolution>> {
        let id = SeriesQuestionId::parse(question_id)?;
        // start a month early so the baseline observation is included
        let start = id
            .base_date
            .checked_sub_signed(chrono::Duration::days(31))
            .unwrap_or(id.base_date);

        let history = self
            .observations(&id.series, &[("observation_start", start.to_string())])
            .await?;
        series::resolve("fred", question_id, &history)
    }
}
