//! Yahoo Finance source (chart API, daily closes).

use super::series::{self, SeriesObservation, SeriesQuestionId};
use super::{get_json, QuestionSource};
use crate::config::SourcesConfig;
use crate::models::{Question, Resolution, SourceType};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tracing::{info, warn};

pub const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    long_name: Option<String>,
    #[serde(default)]
    short_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

struct ParsedChart {
    title: Option<String>,
    observations: Vec<SeriesObservation>,
}

fn parse_chart(response: ChartResponse) -> Result<ParsedChart> {
    if let Some(error) = response.chart.error.filter(|e| !e.is_null()) {
        return Err(anyhow!("Yahoo chart error: {}", error));
    }
    let result = response
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| anyhow!("Yahoo chart response has no result"))?;

    let closes = result
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default();

    let observations = result
        .timestamp
        .iter()
        .zip(closes)
        .filter_map(|(ts, close)| {
            let date = Utc.timestamp_opt(*ts, 0).single()?.date_naive();
            Some(SeriesObservation { date, value: close? })
        })
        .collect();

    Ok(ParsedChart {
        title: result.meta.long_name.or(result.meta.short_name),
        observations,
    })
}

pub struct YahooFinanceSource {
    client: reqwest::Client,
    base_url: String,
    tickers: Vec<String>,
    horizons_days: Vec<i64>,
}

impl YahooFinanceSource {
    pub fn new(client: reqwest::Client, config: &SourcesConfig) -> Self {
        Self {
            client,
            base_url: YAHOO_CHART_URL.to_string(),
            tickers: config.yahoo_tickers.clone(),
            horizons_days: config.horizons_days.clone(),
        }
    }

    async fn chart(&self, ticker: &str, query: &[(&str, String)]) -> Result<ParsedChart> {
        let url = format!("{}/{}", self.base_url, ticker);
        let response: ChartResponse = get_json(&self.client, &url, query)
            .await
            .with_context(|| format!("Failed to fetch Yahoo chart for {}", ticker))?;
        parse_chart(response)
    }

    async fn ticker_questions(&self, ticker: &str) -> Result<Vec<Question>> {
        let chart = self
            .chart(
                ticker,
                &[("range", "1mo".to_string()), ("interval", "1d".to_string())],
            )
            .await?;
        let latest = chart
            .observations
            .iter()
            .max_by_key(|o| o.date)
            .ok_or_else(|| anyhow!("No closing prices for {}", ticker))?;
        let title = chart.title.as_deref().unwrap_or(ticker);

        Ok(series::build_questions(
            "yahoo_finance",
            ticker,
            &format!("{} closing price", title),
            latest,
            &self.horizons_days,
            Utc::now().date_naive(),
            Some(&format!("https://finance.yahoo.com/quote/{}", ticker)),
        ))
    }
}

#[async_trait]
impl QuestionSource for YahooFinanceSource {
    fn name(&self) -> &'static str {
        "yahoo_finance"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Data
    }

    async fn fetch_questions(&self) -> Result<Vec<Question>> {
        let mut questions = Vec::new();
        for ticker in &self.tickers {
            match self.ticker_questions(ticker).await {
                Ok(mut batch) => questions.append(&mut batch),
                Err(e) => warn!("Skipping ticker {}: {}", ticker, e),
            }
        }

        info!("Generated {} questions from Yahoo Finance", questions.len());
        Ok(questions)
    }

    async fn fetch_resolution(&self, question_id: &str) -> Result<Option<Resolution>> {
        let id = SeriesQuestionId::parse(question_id)?;
        let start = id
            .base_date
            .checked_sub_signed(chrono::Duration::days(7))
            .unwrap_or(id.base_date);
        let period1 = start
            .and_hms_opt(0, 0, 0)
            .map(|dt| Utc.from_utc_datetime(&dt).timestamp())
            .unwrap_or_default();

        let chart = self
            .chart(
                &id.series,
                &[
                    ("period1", period1.to_string()),
                    ("period2", Utc::now().timestamp().to_string()),
                    ("interval", "1d".to_string()),
                ],
            )
            .await?;
        series::resolve("yahoo_finance", question_id, &chart.observations)
    }
}
