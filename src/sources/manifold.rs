//! Manifold Markets source.
//!
//! Open binary markets are fetched through the search endpoint, paged by
//! offset.

use super::{from_millis, get_json, QuestionSource};
use crate::config::SourcesConfig;
use crate::models::{Question, QuestionType, Resolution, SourceType};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

pub const MANIFOLD_API_URL: &str = "https://api.manifold.markets/v0";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifoldMarket {
    id: String,
    question: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    outcome_type: Option<String>,
    #[serde(default)]
    created_time: Option<i64>,
    #[serde(default)]
    close_time: Option<i64>,
    #[serde(default)]
    is_resolved: bool,
    #[serde(default)]
    resolution: Option<String>,
    #[serde(default)]
    resolution_probability: Option<f64>,
    #[serde(default)]
    probability: Option<f64>,
    #[serde(default)]
    text_description: Option<String>,
    #[serde(default)]
    group_slugs: Option<Vec<String>>,
}

impl ManifoldMarket {
    /// Final value of a resolved market. Cancelled markets have none.
    fn final_value(&self) -> Option<f64> {
        match self.resolution.as_deref() {
            Some("YES") => Some(1.0),
            Some("NO") => Some(0.0),
            Some("MKT") => self.resolution_probability.or(self.probability),
            _ => None,
        }
    }
}

pub struct ManifoldSource {
    client: reqwest::Client,
    base_url: String,
    page_size: usize,
    max_pages: usize,
}

impl ManifoldSource {
    pub fn new(client: reqwest::Client, config: &SourcesConfig) -> Self {
        Self {
            client,
            base_url: MANIFOLD_API_URL.to_string(),
            page_size: config.page_size,
            max_pages: config.max_pages,
        }
    }
}

/// Converts one market payload. Non-binary markets yield `Ok(None)`.
fn parse_market(data: Value) -> Result<Option<Question>> {
    let market: ManifoldMarket = serde_json::from_value(data)?;

    if market.outcome_type.as_deref().unwrap_or("BINARY") != "BINARY" {
        return Ok(None);
    }

    let mut question = Question::new(
        market.id.clone(),
        "manifold",
        SourceType::Market,
        market.question.clone(),
    );
    question.question_type = QuestionType::Binary;
    question.url = market.url.clone();
    question.background = market.text_description.clone().filter(|t| !t.trim().is_empty());
    question.category = market
        .group_slugs
        .as_ref()
        .and_then(|slugs| slugs.first().cloned());
    if let Some(created) = market.created_time.and_then(from_millis) {
        question.created_at = created;
    }
    question.resolution_date = market
        .close_time
        .and_then(from_millis)
        .map(|dt| dt.date_naive());
    question.base_rate = market.probability;
    question.resolved = market.is_resolved;
    question.resolution_value = if market.is_resolved {
        market.final_value()
    } else {
        None
    };

    Ok(Some(question))
}

fn parse_resolution(question_id: &str, data: Value) -> Result<Option<Resolution>> {
    let market: ManifoldMarket = serde_json::from_value(data)?;
    let today = Utc::now().date_naive();

    if market.is_resolved {
        return Ok(market.final_value().map(|value| Resolution {
            question_id: question_id.to_string(),
            source: "manifold".to_string(),
            date: today,
            value,
            is_final: true,
        }));
    }

    // open market: current probability as interim value
    Ok(market.probability.map(|value| Resolution {
        question_id: question_id.to_string(),
        source: "manifold".to_string(),
        date: today,
        value,
        is_final: false,
    }))
}

#[async_trait]
impl QuestionSource for ManifoldSource {
    fn name(&self) -> &'static str {
        "manifold"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Market
    }

    async fn fetch_questions(&self) -> Result<Vec<Question>> {
        let url = format!("{}/search-markets", self.base_url);
        let mut questions = Vec::new();

        for page in 0..self.max_pages {
            let query = [
                ("term", String::new()),
                ("filter", "open".to_string()),
                ("contractType", "BINARY".to_string()),
                ("sort", "most-popular".to_string()),
                ("limit", self.page_size.to_string()),
                ("offset", (page * self.page_size).to_string()),
            ];

            let items: Vec<Value> = match get_json(&self.client, &url, &query).await {
                Ok(items) => items,
                Err(e) if page == 0 => return Err(e),
                Err(e) => {
                    warn!("Failed to fetch Manifold page {}: {}", page, e);
                    break;
                }
            };
            let page_len = items.len();

            for item in items {
                let id = item.get("id").cloned().unwrap_or(Value::Null);
                match parse_market(item) {
                    Ok(Some(question)) => questions.push(question),
                    Ok(None) => {}
                    Err(e) => warn!("Failed to parse Manifold market {}: {}", id, e),
                }
            }

            if page_len < self.page_size {
                break;
            }
        }

        info!("Fetched {} questions from Manifold", questions.len());
        Ok(questions)
    }

    async fn fetch_resolution(&self, question_id: &str) -> Result<Option<Resolution>> {
        let url = format!("{}/market/{}", self.base_url, question_id);
        let data: Value = get_json(&self.client, &url, &[]).await?;
        parse_resolution(question_id, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_open_binary_market() {
        let data = json!({
            "id": "abc123",
            "question": "Will SpaceX land Starship on the Moon by 2027?",
            "url": "https://manifold.markets/u/starship",
            "outcomeType": "BINARY",
            "createdTime": 1_700_000_000_000i64,
            "closeTime": 1_800_000_000_000i64,
            "isResolved": false,
            "probability": 0.12,
            "groupSlugs": ["space", "spacex"]
        });

        let q = parse_market(data).unwrap().unwrap();

        assert_eq!(q.id, "abc123");
        assert_eq!(q.source, "manifold");
        assert_eq!(q.source_type, SourceType::Market);
        assert_eq!(q.question_type, QuestionType::Binary);
        assert_eq!(q.base_rate, Some(0.12));
        assert_eq!(q.category.as_deref(), Some("space"));
        assert!(q.resolution_date.is_some());
        assert!(!q.resolved);
    }

    #[test]
    fn test_skip_non_binary_and_reject_malformed() {
        let multi = json!({"id": "m", "question": "Who wins?", "outcomeType": "MULTIPLE_CHOICE"});
        assert!(parse_market(multi).unwrap().is_none());

        let missing_question = json!({"id": "x"});
        assert!(parse_market(missing_question).is_err());
    }

    #[test]
    fn test_resolution_values() {
        let yes = json!({"id": "a", "question": "q", "isResolved": true, "resolution": "YES"});
        let r = parse_resolution("a", yes).unwrap().unwrap();
        assert_eq!(r.value, 1.0);
        assert!(r.is_final);

        let mkt = json!({"id": "a", "question": "q", "isResolved": true,
                         "resolution": "MKT", "resolutionProbability": 0.3});
        assert_eq!(parse_resolution("a", mkt).unwrap().unwrap().value, 0.3);

        let cancelled = json!({"id": "a", "question": "q", "isResolved": true, "resolution": "CANCEL"});
        assert!(parse_resolution("a", cancelled).unwrap().is_none());

        let open = json!({"id": "a", "question": "q", "isResolved": false, "probability": 0.64});
        let interim = parse_resolution("a", open).unwrap().unwrap();
        assert_eq!(interim.value, 0.64);
        assert!(!interim.is_final);
    }
}
