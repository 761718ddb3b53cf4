//! LLM forecaster.
//!
//! Models are addressed as `provider/model`. Supported providers:
//! - `ollama`: local `/api/chat`, no key
//! - `openai`, `mistral`, `gemini`: OpenAI-compatible chat completions
//! - `anthropic`: messages API

use super::prompt::{build_prompt, parse_response, SYSTEM_PROMPT};
use super::{ForecastError, Forecaster};
use crate::config::{ForecasterConfig, ModelConfig};
use crate::models::{ForecastDraft, Question};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    OpenAi,
    Mistral,
    Gemini,
    Anthropic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::OpenAi => "openai",
            Provider::Mistral => "mistral",
            Provider::Gemini => "gemini",
            Provider::Anthropic => "anthropic",
        }
    }

    /// Environment variable holding the API key, if the provider needs one.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Provider::Ollama => None,
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Mistral => Some("MISTRAL_API_KEY"),
            Provider::Gemini => Some("GOOGLE_API_KEY"),
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Ollama => "http://localhost:11434",
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Mistral => "https://api.mistral.ai/v1",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            Provider::Anthropic => "https://api.anthropic.com/v1",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Provider::Ollama),
            "openai" => Ok(Provider::OpenAi),
            "mistral" => Ok(Provider::Mistral),
            "gemini" | "google" => Ok(Provider::Gemini),
            "anthropic" => Ok(Provider::Anthropic),
            other => Err(ForecastError::Unsupported(other.to_string())),
        }
    }
}

/// A parsed `provider/model` identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub provider: Provider,
    pub model: String,
}

impl ModelRef {
    pub fn id(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

impl FromStr for ModelRef {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, model) = s
            .split_once('/')
            .filter(|(p, m)| !p.is_empty() && !m.is_empty())
            .ok_or_else(|| ForecastError::Unsupported(s.to_string()))?;

        Ok(Self {
            provider: provider.parse()?,
            model: model.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    format: &'a str,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

/// OpenAI-compatible chat completions request.
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Anthropic messages API request.
#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl CompletionResponse {
    fn into_text(self) -> Result<String, ForecastError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ForecastError::MalformedResponse("no completion choices".to_string()))
    }
}

impl AnthropicResponse {
    fn into_text(self) -> Result<String, ForecastError> {
        let text: String = self
            .content
            .into_iter()
            .filter(|c| c.kind == "text")
            .filter_map(|c| c.text)
            .collect();
        if text.is_empty() {
            return Err(ForecastError::MalformedResponse(
                "no text content in reply".to_string(),
            ));
        }
        Ok(text)
    }
}

/// Forecaster backed by a chat model.
pub struct LlmForecaster {
    name: String,
    model_ref: ModelRef,
    api_key: Option<String>,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
    timeout_seconds: u64,
    http_client: reqwest::Client,
}

impl LlmForecaster {
    /// Builds a forecaster, reading the API key from the environment.
    ///
    /// Fails with `MissingApiKey` when the provider needs a key that is not
    /// set, so callers can skip unavailable models up front.
    pub fn from_config(model: &ModelConfig, config: &ForecasterConfig) -> Result<Self, ForecastError> {
        let model_ref: ModelRef = model.id.parse()?;

        let env_var = model
            .api_key_env
            .as_deref()
            .or_else(|| model_ref.provider.api_key_env());
        let api_key = match env_var {
            Some(var) => match std::env::var(var) {
                Ok(key) if !key.trim().is_empty() => Some(key),
                _ => {
                    return Err(ForecastError::MissingApiKey {
                        provider: model_ref.provider.to_string(),
                        env_var: var.to_string(),
                    })
                }
            },
            None => None,
        };

        let base_url = model.base_url.clone().unwrap_or_else(|| match model_ref.provider {
            Provider::Ollama => config.ollama_url.clone(),
            other => other.default_base_url().to_string(),
        });

        Self::new(model_ref, api_key, base_url, config)
    }

    pub fn new(
        model_ref: ModelRef,
        api_key: Option<String>,
        base_url: String,
        config: &ForecasterConfig,
    ) -> Result<Self, ForecastError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ForecastError::Http(e.to_string()))?;

        Ok(Self {
            name: model_ref.id(),
            model_ref,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_seconds: config.timeout_seconds,
            http_client,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> ForecastError {
        if e.is_timeout() {
            ForecastError::Timeout(self.timeout_seconds)
        } else if e.is_connect() {
            ForecastError::Http(format!(
                "Cannot connect to {} at {}",
                self.model_ref.provider, self.base_url
            ))
        } else {
            ForecastError::Http(format!("Failed to send request: {}", e))
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ForecastError> {
        let response = request.send().await.map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ForecastError::Http(format!(
                "{} API error {}: {}",
                self.model_ref.provider, status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ForecastError::MalformedResponse(e.to_string()))
    }

    /// Sends one prompt and returns the raw reply text.
    async fn complete(&self, prompt: &str) -> Result<String, ForecastError> {
        let model = self.model_ref.model.as_str();

        match self.model_ref.provider {
            Provider::Ollama => {
                let request = OllamaChatRequest {
                    model,
                    messages: vec![
                        ChatMessage::new("system", SYSTEM_PROMPT),
                        ChatMessage::new("user", prompt),
                    ],
                    stream: false,
                    format: "json",
                    options: OllamaOptions {
                        temperature: self.temperature,
                    },
                };
                let url = format!("{}/api/chat", self.base_url);
                let response: OllamaChatResponse =
                    self.post(self.http_client.post(&url).json(&request)).await?;
                Ok(response.message.content)
            }
            Provider::OpenAi | Provider::Mistral | Provider::Gemini => {
                let request = CompletionRequest {
                    model,
                    messages: vec![
                        ChatMessage::new("system", SYSTEM_PROMPT),
                        ChatMessage::new("user", prompt),
                    ],
                    temperature: self.temperature,
                    max_tokens: self.max_tokens,
                };
                let url = format!("{}/chat/completions", self.base_url);
                let mut builder = self.http_client.post(&url).json(&request);
                if let Some(ref key) = self.api_key {
                    builder = builder.bearer_auth(key);
                }
                let response: CompletionResponse = self.post(builder).await?;
                response.into_text()
            }
            Provider::Anthropic => {
                let request = AnthropicRequest {
                    model,
                    system: SYSTEM_PROMPT,
                    messages: vec![ChatMessage::new("user", prompt)],
                    max_tokens: self.max_tokens,
                    temperature: self.temperature,
                };
                let url = format!("{}/messages", self.base_url);
                let mut builder = self
                    .http_client
                    .post(&url)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&request);
                if let Some(ref key) = self.api_key {
                    builder = builder.header("x-api-key", key);
                }
                let response: AnthropicResponse = self.post(builder).await?;
                response.into_text()
            }
        }
    }
}

#[async_trait]
impl Forecaster for LlmForecaster {
    fn name(&self) -> &str {
        &self.name
    }

    async fn forecast(&self, question: &Question) -> ForecastDraft {
        let prompt = build_prompt(question, Utc::now().date_naive());
        debug!("Forecasting {} with {}", question.id, self.name);

        let result = match self.complete(&prompt).await {
            Ok(reply) => parse_response(question, &reply),
            Err(e) => Err(e),
        };

        match result {
            Ok((prediction, reasoning)) => {
                ForecastDraft::success(question, &self.name, prediction, reasoning)
            }
            Err(e) => {
                warn!("Error forecasting question {} with {}: {}", question.id, self.name, e);
                ForecastDraft::failure(question, &self.name, e.kind(), e.to_string())
            }
        }
    }
}
