//! Question sources.
//!
//! Each source adapts one external platform or data series to
//! [`Question`]s. Sources are constructed once at startup and looked up by
//! name through a [`SourceRegistry`].

pub mod cultivate;
pub mod fred;
pub mod manifold;
pub mod metaculus;
pub mod polymarket;
pub mod series;
pub mod yahoo;

use crate::config::SourcesConfig;
use crate::models::{Question, Resolution, SourceType};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

pub use cultivate::{CultivateSource, GOOD_JUDGMENT, INFER};
pub use fred::FredSource;
pub use manifold::ManifoldSource;
pub use metaculus::MetaculusSource;
pub use polymarket::PolymarketSource;
pub use yahoo::YahooFinanceSource;

/// A provider of forecasting questions.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Stable name, stored as `Question::source`.
    fn name(&self) -> &'static str;

    fn source_type(&self) -> SourceType;

    /// Fetches currently open questions.
    ///
    /// Items that fail to parse are dropped; an error means the source
    /// could not be reached at all.
    async fn fetch_questions(&self) -> Result<Vec<Question>>;

    /// Fetches the current resolution of a question, if any.
    async fn fetch_resolution(&self, question_id: &str) -> Result<Option<Resolution>>;
}

/// Known sources keyed by name.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    sources: BTreeMap<&'static str, Arc<dyn QuestionSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every built-in source from configuration.
    pub fn from_config(config: &SourcesConfig) -> Result<Self> {
        let client = build_http_client(config.timeout_seconds)?;
        let mut registry = Self::new();

        registry.register(Arc::new(ManifoldSource::new(client.clone(), config)));
        registry.register(Arc::new(PolymarketSource::new(client.clone(), config)));
        registry.register(Arc::new(MetaculusSource::new(
            client.clone(),
            config,
            std::env::var(&config.metaculus_api_key_env).ok(),
        )));
        registry.register(Arc::new(CultivateSource::new(
            &GOOD_JUDGMENT,
            client.clone(),
            config,
            std::env::var(&config.good_judgment_api_key_env).ok(),
        )));
        registry.register(Arc::new(CultivateSource::new(
            &INFER,
            client.clone(),
            config,
            std::env::var(&config.infer_api_key_env).ok(),
        )));
        registry.register(Arc::new(FredSource::new(
            client.clone(),
            config,
            std::env::var(&config.fred_api_key_env).ok(),
        )));
        registry.register(Arc::new(YahooFinanceSource::new(client, config)));

        Ok(registry)
    }

    /// Adds a source, replacing any source with the same name.
    pub fn register(&mut self, source: Arc<dyn QuestionSource>) {
        debug!("Registered source {}", source.name());
        self.sources.insert(source.name(), source);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn QuestionSource>> {
        self.sources.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sources.keys().copied().collect()
    }

    /// Resolves a subset of names. Returns the matching sources in the
    /// requested order and the names that are not registered.
    pub fn select(&self, names: &[String]) -> (Vec<Arc<dyn QuestionSource>>, Vec<String>) {
        let mut found = Vec::new();
        let mut unknown = Vec::new();

        for name in names {
            match self.get(name) {
                Some(source) => found.push(source),
                None => unknown.push(name.clone()),
            }
        }

        (found, unknown)
    }
}

/// Fetches from every source in order. A failing source is logged and
/// contributes no questions.
pub async fn fetch_all(sources: &[Arc<dyn QuestionSource>]) -> Vec<Question> {
    let mut questions = Vec::new();

    for source in sources {
        info!("Fetching questions from {}", source.name());
        match source.fetch_questions().await {
            Ok(mut fetched) => {
                info!("{}: {} questions", source.name(), fetched.len());
                questions.append(&mut fetched);
            }
            Err(e) => error!("Failed to fetch from {}: {:#}", source.name(), e),
        }
    }

    questions
}

/// Shared HTTP client for all sources.
pub fn build_http_client(timeout_seconds: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .user_agent(concat!("forecastbench/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")
}

/// GETs a URL and decodes the JSON body, turning non-2xx statuses into errors.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, String)],
) -> Result<T> {
    send_json(client.get(url).query(query), url).await
}

/// Sends a prepared request and decodes the JSON body.
///
/// `url` is the endpoint without its query string. Transport errors are
/// stripped of the full URL since query strings may carry API keys.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    url: &str,
) -> Result<T> {
    debug!("GET {}", url);

    let response = request
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(reqwest::Error::without_url)
        .with_context(|| format!("Request to {} failed", url))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("API error {} from {}: {}", status, url, body));
    }

    response
        .json::<T>()
        .await
        .map_err(reqwest::Error::without_url)
        .with_context(|| format!("Failed to decode response from {}", url))
}

/// Parses RFC 3339 timestamps, with or without a trailing `Z`.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            raw.parse::<NaiveDate>()
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| Utc.from_utc_datetime(&dt))
        })
}

/// Parses a date from either a full timestamp or a plain `YYYY-MM-DD`.
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    parse_timestamp(raw).map(|dt| dt.date_naive())
}

/// Converts a millisecond Unix timestamp.
pub(crate) fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSource {
        name: &'static str,
        questions: usize,
        fails: bool,
    }

    impl StubSource {
        fn empty(name: &'static str) -> Self {
            Self {
                name,
                questions: 0,
                fails: false,
            }
        }
    }

    #[async_trait]
    impl QuestionSource for StubSource {
        fn name(&self) -> &'static str {
            self.name
        }

        fn source_type(&self) -> SourceType {
            SourceType::Market
        }

        async fn fetch_questions(&self) -> Result<Vec<Question>> {
            if self.fails {
                return Err(anyhow!("connection reset by peer"));
            }
            Ok((0..self.questions)
                .map(|i| {
                    Question::new(
                        format!("{}-{}", self.name, i),
                        self.name,
                        SourceType::Market,
                        format!("Question {}?", i),
                    )
                })
                .collect())
        }

        async fn fetch_resolution(&self, _question_id: &str) -> Result<Option<Resolution>> {
            Ok(None)
        }
    }

    #[test]
    fn test_registry_lookup_and_select() {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(StubSource::empty("manifold")));
        registry.register(Arc::new(StubSource::empty("fred")));

        assert!(registry.contains("manifold"));
        assert_eq!(registry.names(), vec!["fred", "manifold"]);

        let (found, unknown) =
            registry.select(&["manifold".to_string(), "nonexistent".to_string()]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "manifold");
        assert_eq!(unknown, vec!["nonexistent".to_string()]);
    }

    #[test]
    fn test_registry_from_config_has_builtin_sources() {
        let registry = SourceRegistry::from_config(&SourcesConfig::default()).unwrap();

        let config = SourcesConfig::default();
        for name in &config.enabled {
            assert!(registry.contains(name), "missing {}", name);
        }
        assert_eq!(registry.names().len(), 7);
        assert_eq!(
            registry.get("fred").map(|s| s.source_type()),
            Some(SourceType::Data)
        );
    }

    #[tokio::test]
    async fn test_fetch_all_skips_failing_source() {
        let sources: Vec<Arc<dyn QuestionSource>> = vec![
            Arc::new(StubSource {
                name: "manifold",
                questions: 2,
                fails: false,
            }),
            Arc::new(StubSource {
                name: "polymarket",
                questions: 5,
                fails: true,
            }),
            Arc::new(StubSource {
                name: "metaculus",
                questions: 1,
                fails: false,
            }),
        ];

        let questions = fetch_all(&sources).await;

        let ids: Vec<&str> = questions.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["manifold-0", "manifold-1", "metaculus-0"]);
    }

    #[tokio::test]
    async fn test_request_errors_hide_query_string() {
        let client = build_http_client(5).unwrap();

        let err = get_json::<serde_json::Value>(
            &client,
            "http://127.0.0.1:9/fred/series",
            &[("api_key", "very-secret-key".to_string())],
        )
        .await
        .unwrap_err();

        let message = format!("{:#}", err);
        assert!(message.contains("http://127.0.0.1:9/fred/series"));
        assert!(!message.contains("very-secret-key"));
    }

    #[test]
    fn test_parse_timestamps() {
        let dt = parse_timestamp("2026-05-01T12:30:00Z").unwrap();
        assert_eq!(dt.date_naive(), NaiveDate::from_ymd_opt(2026, 5, 1).unwrap());
        assert!(parse_timestamp("2026-05-01T12:30:00+02:00").is_some());
        assert_eq!(
            parse_date("2026-05-01"),
            NaiveDate::from_ymd_opt(2026, 5, 1)
        );
        assert!(parse_date("soon").is_none());
        assert_eq!(
            from_millis(0).map(|d| d.date_naive()),
            NaiveDate::from_ymd_opt(1970, 1, 1)
        );
    }
}
