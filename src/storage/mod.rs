//! Persistence for questions, forecasts, resolutions and question sets.
//!
//! The [`Storage`] trait is the facade the pipeline talks to;
//! [`SqliteStorage`] is the only backend.

pub mod sqlite;

use crate::models::{
    Forecast, NewQuestionSet, Question, QuestionSet, QuestionSetItem, Resolution,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

pub use sqlite::SqliteStorage;

/// Filter for [`Storage::get_questions`]. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct QuestionFilter {
    pub resolved: Option<bool>,
    pub source: Option<String>,
    pub category: Option<String>,
    pub limit: Option<usize>,
}

impl QuestionFilter {
    /// Open (unresolved) questions from any source.
    pub fn unresolved() -> Self {
        Self {
            resolved: Some(false),
            ..Self::default()
        }
    }
}

/// Filter for [`Storage::get_forecasts`]. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ForecastFilter {
    pub question_set_id: Option<i64>,
    pub question_id: Option<String>,
    pub source: Option<String>,
    pub forecaster: Option<String>,
    pub limit: Option<usize>,
}

impl ForecastFilter {
    pub fn for_question_set(question_set_id: i64) -> Self {
        Self {
            question_set_id: Some(question_set_id),
            ..Self::default()
        }
    }
}

/// Storage facade.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Inserts new questions. Existing `(source, id)` rows keep their
    /// content; only a transition to resolved is recorded.
    async fn save_questions(&self, questions: &[Question]) -> Result<()>;

    async fn get_question(&self, source: &str, question_id: &str) -> Result<Option<Question>>;

    /// Questions matching `filter`, newest first.
    async fn get_questions(&self, filter: &QuestionFilter) -> Result<Vec<Question>>;

    /// Marks a question resolved with its final value.
    async fn mark_resolved(&self, source: &str, question_id: &str, value: f64) -> Result<()>;

    /// Freezes a question set and returns its id.
    async fn create_question_set(&self, set: &NewQuestionSet<'_>) -> Result<i64>;

    async fn get_question_set(&self, set_id: i64) -> Result<Option<QuestionSet>>;

    /// Items of a question set in the order they were frozen.
    async fn get_question_set_items(&self, set_id: i64) -> Result<Vec<QuestionSetItem>>;

    /// Appends a forecast row and returns its id.
    async fn save_forecast(&self, forecast: &Forecast) -> Result<i64>;

    /// Forecasts matching `filter`, newest first.
    async fn get_forecasts(&self, filter: &ForecastFilter) -> Result<Vec<Forecast>>;

    async fn save_resolution(&self, resolution: &Resolution) -> Result<()>;

    /// Resolution on `date`, or the latest one when `date` is `None`.
    async fn get_resolution(
        &self,
        source: &str,
        question_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<Option<Resolution>>;

    async fn get_resolutions(
        &self,
        question_id: Option<&str>,
        source: Option<&str>,
    ) -> Result<Vec<Resolution>>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use anyhow::anyhow;

    /// In-memory storage that refuses to save forecasts and resolutions
    /// for one question id.
    pub(crate) struct RejectingStorage {
        inner: SqliteStorage,
        rejected: &'static str,
    }

    impl RejectingStorage {
        pub(crate) fn new(rejected: &'static str) -> Self {
            Self {
                inner: SqliteStorage::in_memory(),
                rejected,
            }
        }
    }

    #[async_trait]
    impl Storage for RejectingStorage {
        async fn save_questions(&self, questions: &[Question]) -> Result<()> {
            self.inner.save_questions(questions).await
        }

        async fn get_question(&self, source: &str, question_id: &str) -> Result<Option<Question>> {
            self.inner.get_question(source, question_id).await
        }

        async fn get_questions(&self, filter: &QuestionFilter) -> Result<Vec<Question>> {
            self.inner.get_questions(filter).await
        }

        async fn mark_resolved(&self, source: &str, question_id: &str, value: f64) -> Result<()> {
            self.inner.mark_resolved(source, question_id, value).await
        }

        async fn create_question_set(&self, set: &NewQuestionSet<'_>) -> Result<i64> {
            self.inner.create_question_set(set).await
        }

        async fn get_question_set(&self, set_id: i64) -> Result<Option<QuestionSet>> {
            self.inner.get_question_set(set_id).await
        }

        async fn get_question_set_items(&self, set_id: i64) -> Result<Vec<QuestionSetItem>> {
            self.inner.get_question_set_items(set_id).await
        }

        async fn save_forecast(&self, forecast: &Forecast) -> Result<i64> {
            if forecast.question_id == self.rejected {
                return Err(anyhow!("database is locked"));
            }
            self.inner.save_forecast(forecast).await
        }

        async fn get_forecasts(&self, filter: &ForecastFilter) -> Result<Vec<Forecast>> {
            self.inner.get_forecasts(filter).await
        }

        async fn save_resolution(&self, resolution: &Resolution) -> Result<()> {
            if resolution.question_id == self.rejected {
                return Err(anyhow!("database is locked"));
            }
            self.inner.save_resolution(resolution).await
        }

        async fn get_resolution(
            &self,
            source: &str,
            question_id: &str,
            date: Option<NaiveDate>,
        ) -> Result<Option<Resolution>> {
            self.inner.get_resolution(source, question_id, date).await
        }

        async fn get_resolutions(
            &self,
            question_id: Option<&str>,
            source: Option<&str>,
        ) -> Result<Vec<Resolution>> {
            self.inner.get_resolutions(question_id, source).await
        }
    }
}
