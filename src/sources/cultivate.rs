//! Cultivate Labs question platforms.
//!
//! Good Judgment Open and INFER both run on Cultivate Labs and expose the
//! same paged question API. Requests carry a bearer token when one is
//! configured.

use super::{parse_date, parse_timestamp, send_json, QuestionSource};
use crate::config::SourcesConfig;
use crate::models::{Question, Resolution, SourceType};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

/// One Cultivate Labs deployment.
#[derive(Debug)]
pub struct Platform {
    /// Source name stored with each question.
    pub name: &'static str,
    pub label: &'static str,
    pub api_url: &'static str,
    pub site_url: &'static str,
}

pub const GOOD_JUDGMENT: Platform = Platform {
    name: "good_judgment",
    label: "Good Judgment Open",
    api_url: "https://www.gjopen.com/api/v1",
    site_url: "https://www.gjopen.com",
};

pub const INFER: Platform = Platform {
    name: "infer",
    label: "INFER",
    api_url: "https://www.randforecastinginitiative.org/api/v1",
    site_url: "https://www.randforecastinginitiative.org",
};

pub struct CultivateSource {
    platform: &'static Platform,
    client: reqwest::Client,
    api_key: Option<String>,
    page_size: usize,
    max_pages: usize,
}

impl CultivateSource {
    pub fn new(
        platform: &'static Platform,
        client: reqwest::Client,
        config: &SourcesConfig,
        api_key: Option<String>,
    ) -> Self {
        Self {
            platform,
            client,
            api_key,
            page_size: config.page_size,
            max_pages: config.max_pages,
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.platform.api_url, path);

        let mut request = self.client.get(&url).query(query);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        send_json(request, &url).await
    }
}

fn str_field<'a>(data: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| data.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn is_closed(data: &Value) -> bool {
    matches!(str_field(data, &["status"]), Some("resolved") | Some("closed"))
}

/// Outcome of a resolved question: yes/no or a number.
fn outcome_value(data: &Value) -> Option<f64> {
    match data.get("resolution") {
        Some(Value::String(s)) if s.eq_ignore_ascii_case("yes") => Some(1.0),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("no") => Some(0.0),
        Some(Value::Number(n)) => n.as_f64(),
        _ => None,
    }
}

fn crowd_forecast(data: &Value) -> Option<f64> {
    ["crowd_forecast", "community_prediction"]
        .iter()
        .filter_map(|k| data.get(*k))
        .find_map(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
}

fn parse_question(platform: &Platform, data: &Value) -> Result<Question> {
    let id = match data.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(anyhow!("question has no id")),
    };
    let text = str_field(data, &["title", "question"])
        .ok_or_else(|| anyhow!("question {} has no title", id))?;

    let mut question = Question::new(id.clone(), platform.name, SourceType::Market, text);
    question.background = str_field(data, &["description", "background"]).map(String::from);
    question.url = Some(
        str_field(data, &["url"])
            .map(String::from)
            .unwrap_or_else(|| format!("{}/questions/{}", platform.site_url, id)),
    );
    question.category = str_field(data, &["category", "topic"]).map(String::from);
    if let Some(created) = str_field(data, &["created_at", "publish_time"]).and_then(parse_timestamp) {
        question.created_at = created;
    }
    question.resolution_date = str_field(data, &["close_time", "resolution_date"]).and_then(parse_date);
    question.resolved = is_closed(data);
    question.resolution_value = if question.resolved {
        outcome_value(data)
    } else {
        None
    };
    question.base_rate = crowd_forecast(data);

    Ok(question)
}

fn parse_resolution(platform: &Platform, question_id: &str, data: &Value) -> Option<Resolution> {
    let today = Utc::now().date_naive();

    let (value, is_final) = if is_closed(data) {
        (outcome_value(data)?, true)
    } else {
        (crowd_forecast(data)?, false)
    };

    Some(Resolution {
        question_id: question_id.to_string(),
        source: platform.name.to_string(),
        date: today,
        value,
        is_final,
    })
}

#[async_trait]
impl QuestionSource for CultivateSource {
    fn name(&self) -> &'static str {
        self.platform.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Market
    }

    async fn fetch_questions(&self) -> Result<Vec<Question>> {
        let mut questions = Vec::new();
        let mut page = 1;

        loop {
            let query = [
                ("page", page.to_string()),
                ("per_page", self.page_size.to_string()),
                ("status", "open".to_string()),
            ];
            let data = match self.get("/questions", &query).await {
                Ok(data) => data,
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    warn!("Failed to fetch {} page {}: {}", self.platform.label, page, e);
                    break;
                }
            };

            let items = data
                .get("questions")
                .or_else(|| data.get("data"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if items.is_empty() {
                break;
            }

            for item in &items {
                match parse_question(self.platform, item) {
                    Ok(question) => questions.push(question),
                    Err(e) => warn!("Failed to parse {} question: {}", self.platform.label, e),
                }
            }

            let total_pages = data
                .get("total_pages")
                .or_else(|| data.get("pages"))
                .and_then(Value::as_u64)
                .unwrap_or(1) as usize;
            if page >= total_pages || page >= self.max_pages {
                break;
            }
            page += 1;
        }

        info!("Fetched {} questions from {}", questions.len(), self.platform.label);
        Ok(questions)
    }

    async fn fetch_resolution(&self, question_id: &str) -> Result<Option<Resolution>> {
        let data = self.get(&format!("/questions/{}", question_id), &[]).await?;
        Ok(parse_resolution(self.platform, question_id, &data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_question_with_alternate_keys() {
        let data = json!({
            "id": 3120,
            "question": "Will the WHO declare a new PHEIC before 1 July 2027?",
            "background": "A PHEIC is a formal declaration by the WHO.",
            "topic": "Health",
            "resolution_date": "2027-07-01",
            "status": "open",
            "community_prediction": "0.18"
        });

        let q = parse_question(&GOOD_JUDGMENT, &data).unwrap();

        assert_eq!(q.id, "3120");
        assert_eq!(q.source, "good_judgment");
        assert_eq!(q.category.as_deref(), Some("Health"));
        assert_eq!(q.url.as_deref(), Some("https://www.gjopen.com/questions/3120"));
        assert_eq!(q.base_rate, Some(0.18));
        assert_eq!(q.resolution_date.unwrap().to_string(), "2027-07-01");
        assert!(!q.resolved);
    }

    #[test]
    fn test_parse_question_requires_id_and_title() {
        assert!(parse_question(&GOOD_JUDGMENT, &json!({"title": "No id"})).is_err());
        assert!(parse_question(&GOOD_JUDGMENT, &json!({"id": 1})).is_err());
    }

    #[test]
    fn test_resolution_closed_and_interim() {
        let closed = json!({"id": 1, "status": "resolved", "resolution": "no"});
        let r = parse_resolution(&GOOD_JUDGMENT, "1", &closed).unwrap();
        assert_eq!(r.value, 0.0);
        assert!(r.is_final);

        let open = json!({"id": 1, "status": "open", "crowd_forecast": 0.7});
        let r = parse_resolution(&GOOD_JUDGMENT, "1", &open).unwrap();
        assert_eq!(r.value, 0.7);
        assert!(!r.is_final);

        let unknown = json!({"id": 1, "status": "closed", "resolution": "annulled"});
        assert!(parse_resolution(&GOOD_JUDGMENT, "1", &unknown).is_none());
    }

    #[test]
    fn test_infer_questions_carry_platform_name_and_url() {
        let data = json!({
            "id": 1457,
            "title": "Will TSMC begin mass production at its Arizona fab before 2027?",
            "status": "resolved",
            "resolution": "yes",
            "close_time": "2026-12-31T23:59:00Z"
        });

        let q = parse_question(&INFER, &data).unwrap();

        assert_eq!(q.source, "infer");
        assert_eq!(
            q.url.as_deref(),
            Some("https://www.randforecastinginitiative.org/questions/1457")
        );
        assert!(q.resolved);
        assert_eq!(q.resolution_value, Some(1.0));

        let r = parse_resolution(&INFER, "1457", &data).unwrap();
        assert_eq!(r.source, "infer");
    }
}
