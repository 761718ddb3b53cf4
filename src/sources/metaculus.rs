//! Metaculus source.
//!
//! Only binary questions are kept. Both the current API shape (details
//! nested under `question`, aggregations with `centers`) and the older flat
//! shape (`possibility`, `community_prediction`) are understood.

use super::{parse_date, parse_timestamp, send_json, QuestionSource};
use crate::config::SourcesConfig;
use crate::models::{Question, Resolution, SourceType};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use tracing::{debug, info, warn};

pub const METACULUS_API_URL: &str = "https://www.metaculus.com/api2";
pub const METACULUS_SITE_URL: &str = "https://www.metaculus.com";

pub struct MetaculusSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    page_size: usize,
    max_pages: usize,
}

impl MetaculusSource {
    pub fn new(client: reqwest::Client, config: &SourcesConfig, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: METACULUS_API_URL.to_string(),
            api_key,
            page_size: config.page_size,
            max_pages: config.max_pages,
        }
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Value> {
        let mut request = self.client.get(url).query(query);
        if let Some(ref key) = self.api_key {
            request = request.header(AUTHORIZATION, format!("Token {}", key));
        }

        send_json(request, url).await
    }
}

/// Question details: nested under `question` in the current API.
fn details(data: &Value) -> &Value {
    data.get("question")
        .filter(|q| q.is_object())
        .unwrap_or(data)
}

fn str_field<'a>(data: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| data.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn question_type(data: &Value) -> Option<&str> {
    details(data)
        .get("type")
        .and_then(Value::as_str)
        .or_else(|| data.pointer("/possibility/type").and_then(Value::as_str))
}

fn community_prediction(data: &Value) -> Option<f64> {
    details(data)
        .pointer("/aggregations/recency_weighted/latest/centers/0")
        .or_else(|| data.pointer("/community_prediction/full/q2"))
        .and_then(Value::as_f64)
}

fn is_resolved(data: &Value) -> bool {
    let status = str_field(data, &["status"]).or_else(|| str_field(details(data), &["status"]));
    status == Some("resolved") || data.get("resolution").is_some_and(Value::is_number)
}

/// Yes/no outcome, or `None` for annulled and ambiguous questions.
fn outcome_value(data: &Value) -> Option<f64> {
    let resolution = details(data)
        .get("resolution")
        .filter(|r| !r.is_null())
        .or_else(|| data.get("resolution"))?;

    match resolution {
        Value::String(s) if s.eq_ignore_ascii_case("yes") => Some(1.0),
        Value::String(s) if s.eq_ignore_ascii_case("no") => Some(0.0),
        // the flat API uses negative values for ambiguous outcomes
        Value::Number(n) => n.as_f64().filter(|v| *v >= 0.0),
        _ => None,
    }
}

fn parse_question(data: &Value) -> Result<Question> {
    let id = match data.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(anyhow!("question has no id")),
    };
    let text = str_field(data, &["title"])
        .or_else(|| str_field(details(data), &["title"]))
        .ok_or_else(|| anyhow!("question {} has no title", id))?;
    let detail = details(data);

    let mut question = Question::new(id.clone(), "metaculus", SourceType::Market, text);
    question.background = str_field(detail, &["description"])
        .or_else(|| str_field(data, &["description"]))
        .map(String::from);
    question.url = Some(match str_field(data, &["page_url"]) {
        Some(path) if path.starts_with('/') => format!("{}{}", METACULUS_SITE_URL, path),
        Some(url) => url.to_string(),
        None => format!("{}/questions/{}/", METACULUS_SITE_URL, id),
    });
    if let Some(created) =
        str_field(data, &["created_at", "created_time", "publish_time"]).and_then(parse_timestamp)
    {
        question.created_at = created;
    }
    question.resolution_date = str_field(detail, &["scheduled_resolve_time"])
        .or_else(|| str_field(data, &["scheduled_resolve_time", "resolve_time"]))
        .and_then(parse_date);
    question.resolved = is_resolved(data);
    question.resolution_value = if question.resolved {
        outcome_value(data)
    } else {
        None
    };
    question.base_rate = community_prediction(data);

    Ok(question)
}

fn parse_resolution(question_id: &str, data: &Value) -> Option<Resolution> {
    let (value, is_final) = if is_resolved(data) {
        (outcome_value(data)?, true)
    } else {
        (community_prediction(data)?, false)
    };

    Some(Resolution {
        question_id: question_id.to_string(),
        source: "metaculus".to_string(),
        date: Utc::now().date_naive(),
        value,
        is_final,
    })
}

#[async_trait]
impl QuestionSource for MetaculusSource {
    fn name(&self) -> &'static str {
        "metaculus"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Market
    }

    async fn fetch_questions(&self) -> Result<Vec<Question>> {
        let url = format!("{}/questions/", self.base_url);
        let mut questions = Vec::new();

        for page in 0..self.max_pages {
            let query = [
                ("status", "open".to_string()),
                ("forecast_type", "binary".to_string()),
                ("limit", self.page_size.to_string()),
                ("offset", (page * self.page_size).to_string()),
            ];
            let data = match self.get(&url, &query).await {
                Ok(data) => data,
                Err(e) if page == 0 => return Err(e),
                Err(e) => {
                    warn!("Failed to fetch Metaculus page {}: {}", page + 1, e);
                    break;
                }
            };

            let items = data
                .get("results")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if items.is_empty() {
                break;
            }

            for item in &items {
                match question_type(item) {
                    Some("binary") | None => {}
                    Some(other) => {
                        debug!("Skipping {} Metaculus question", other);
                        continue;
                    }
                }
                match parse_question(item) {
                    Ok(question) => questions.push(question),
                    Err(e) => warn!("Failed to parse Metaculus question: {}", e),
                }
            }

            if data.get("next").map_or(true, Value::is_null) {
                break;
            }
        }

        info!("Fetched {} questions from Metaculus", questions.len());
        Ok(questions)
    }

    async fn fetch_resolution(&self, question_id: &str) -> Result<Option<Resolution>> {
        let url = format!("{}/questions/{}/", self.base_url, question_id);
        let data = self.get(&url, &[]).await?;
        Ok(parse_resolution(question_id, &data))
    }
}
