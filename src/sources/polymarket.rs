//! Polymarket source (Gamma markets API).

use super::{get_json, parse_date, parse_timestamp, QuestionSource};
use crate::config::SourcesConfig;
use crate::models::{Question, Resolution, SourceType};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

pub const POLYMARKET_GAMMA_URL: &str = "https://gamma-api.polymarket.com";

/// Prices at or beyond these bounds on a closed market count as settled.
const SETTLED_HIGH: f64 = 0.99;
const SETTLED_LOW: f64 = 0.01;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaMarket {
    id: String,
    question: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    closed: bool,
    /// Stringified JSON array, e.g. `"[\"Yes\", \"No\"]"`.
    #[serde(default)]
    outcomes: Option<String>,
    /// Stringified JSON array, e.g. `"[\"0.52\", \"0.48\"]"`.
    #[serde(default)]
    outcome_prices: Option<String>,
}

impl GammaMarket {
    fn is_yes_no(&self) -> bool {
        let outcomes: Vec<String> = self
            .outcomes
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        outcomes.len() == 2
            && outcomes[0].eq_ignore_ascii_case("yes")
            && outcomes[1].eq_ignore_ascii_case("no")
    }

    /// Price of the YES outcome.
    fn yes_price(&self) -> Result<Option<f64>> {
        let Some(raw) = self.outcome_prices.as_deref() else {
            return Ok(None);
        };
        let prices: Vec<String> = serde_json::from_str(raw)?;
        prices
            .first()
            .map(|p| {
                p.parse::<f64>()
                    .map_err(|e| anyhow!("Invalid outcome price {:?}: {}", p, e))
            })
            .transpose()
    }
}

pub struct PolymarketSource {
    client: reqwest::Client,
    base_url: String,
    page_size: usize,
    max_pages: usize,
}

impl PolymarketSource {
    pub fn new(client: reqwest::Client, config: &SourcesConfig) -> Self {
        Self {
            client,
            base_url: POLYMARKET_GAMMA_URL.to_string(),
            page_size: config.page_size,
            max_pages: config.max_pages,
        }
    }
}

/// Converts one market payload. Markets that are not Yes/No yield `Ok(None)`.
fn parse_market(data: Value) -> Result<Option<Question>> {
    let market: GammaMarket = serde_json::from_value(data)?;
    if !market.is_yes_no() {
        return Ok(None);
    }

    let mut question = Question::new(
        market.id.clone(),
        "polymarket",
        SourceType::Market,
        market.question.clone(),
    );
    question.background = market.description.clone().filter(|d| !d.trim().is_empty());
    question.url = market
        .slug
        .as_ref()
        .map(|slug| format!("https://polymarket.com/market/{}", slug));
    question.category = market.category.clone();
    if let Some(created) = market.created_at.as_deref().and_then(parse_timestamp) {
        question.created_at = created;
    }
    question.resolution_date = market.end_date.as_deref().and_then(parse_date);
    question.base_rate = market.yes_price()?;

    Ok(Some(question))
}

fn parse_resolution(question_id: &str, data: Value) -> Result<Option<Resolution>> {
    let market: GammaMarket = serde_json::from_value(data)?;
    let Some(price) = market.yes_price()? else {
        return Ok(None);
    };

    let (value, is_final) = if market.closed && price >= SETTLED_HIGH {
        (1.0, true)
    } else if market.closed && price <= SETTLED_LOW {
        (0.0, true)
    } else {
        (price, false)
    };

    Ok(Some(Resolution {
        question_id: question_id.to_string(),
        source: "polymarket".to_string(),
        date: Utc::now().date_naive(),
        value,
        is_final,
    }))
}

#[async_trait]
impl QuestionSource for PolymarketSource {
    fn name(&self) -> &'static str {
        "polymarket"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Market
    }

    async fn fetch_questions(&self) -> Result<Vec<Question>> {
        let url = format!("{}/markets", self.base_url);
        let mut questions = Vec::new();

        for page in 0..self.max_pages {
            let query = [
                ("active", "true".to_string()),
                ("closed", "false".to_string()),
                ("limit", self.page_size.to_string()),
                ("offset", (page * self.page_size).to_string()),
            ];

            let items: Vec<Value> = match get_json(&self.client, &url, &query).await {
                Ok(items) => items,
                Err(e) if page == 0 => return Err(e),
                Err(e) => {
                    warn!("Failed to fetch Polymarket page {}: {}", page, e);
                    break;
                }
            };
            let page_len = items.len();

            for item in items {
                let id = item.get("id").cloned().unwrap_or(Value::Null);
                match parse_market(item) {
                    Ok(Some(question)) => questions.push(question),
                    Ok(None) => {}
                    Err(e) => warn!("Failed to parse Polymarket market {}: {}", id, e),
                }
            }

            if page_len < self.page_size {
                break;
            }
        }

        info!("Fetched {} questions from Polymarket", questions.len());
        Ok(questions)
    }

    async fn fetch_resolution(&self, question_id: &str) -> Result<Option<Resolution>> {
        let url = format!("{}/markets/{}", self.base_url, question_id);
        let data: Value = get_json(&self.client, &url, &[]).await?;
        parse_resolution(question_id, data)
    }
}
