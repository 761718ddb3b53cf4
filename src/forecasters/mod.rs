//! Forecasters turn a question into a prediction.
//!
//! A forecaster never fails past its boundary: every error becomes a
//! `Failure` outcome on the returned draft.

pub mod llm;
pub mod prompt;

use crate::models::{FailureKind, ForecastDraft, Question};
use async_trait::async_trait;
use thiserror::Error;

pub use llm::{LlmForecaster, ModelRef, Provider};

#[async_trait]
pub trait Forecaster: Send + Sync {
    /// Identifier stored on every forecast row, e.g. `openai/gpt-4o-mini`.
    fn name(&self) -> &str;

    async fn forecast(&self, question: &Question) -> ForecastDraft;
}

/// Errors raised while producing a single forecast.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Request failed: {0}")]
    Http(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Invalid forecast: {0}")]
    Validation(String),

    #[error("No API key for {provider} (set {env_var})")]
    MissingApiKey { provider: String, env_var: String },

    #[error("Unsupported model {0:?}")]
    Unsupported(String),
}

impl ForecastError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ForecastError::Http(_) => FailureKind::Http,
            ForecastError::Timeout(_) => FailureKind::Timeout,
            ForecastError::MalformedResponse(_) => FailureKind::MalformedResponse,
            ForecastError::Validation(_) => FailureKind::Validation,
            ForecastError::MissingApiKey { .. } => FailureKind::MissingApiKey,
            ForecastError::Unsupported(_) => FailureKind::Unsupported,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_and_messages() {
        let err = ForecastError::MissingApiKey {
            provider: "anthropic".to_string(),
            env_var: "ANTHROPIC_API_KEY".to_string(),
        };
        assert_eq!(err.kind(), FailureKind::MissingApiKey);
        assert_eq!(
            err.to_string(),
            "No API key for anthropic (set ANTHROPIC_API_KEY)"
        );

        assert_eq!(ForecastError::Timeout(30).kind(), FailureKind::Timeout);
        assert_eq!(
            ForecastError::Validation("probability 1.2".into()).kind(),
            FailureKind::Validation
        );
    }
}
