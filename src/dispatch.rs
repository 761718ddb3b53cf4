//! Forecast dispatch: every model forecasts every question in a set.
//!
//! Within one model the pass is strictly sequential: forecast, bind,
//! persist, next question. Several models may run side by side when
//! `concurrency > 1`.

use crate::forecasters::Forecaster;
use crate::models::{ForecastOutcome, Question};
use crate::storage::Storage;
use futures::stream::{self, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Counts for one model's pass over a question set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelRunSummary {
    pub model: String,
    pub successes: usize,
    pub failures: usize,
    /// Forecasts that could not be persisted.
    pub storage_errors: usize,
}

impl ModelRunSummary {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..Self::default()
        }
    }

    pub fn attempted(&self) -> usize {
        self.successes + self.failures + self.storage_errors
    }
}

pub struct ForecastRunner {
    storage: Arc<dyn Storage>,
    concurrency: usize,
    show_progress: bool,
    dry_run: bool,
}

impl ForecastRunner {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            concurrency: 1,
            show_progress: false,
            dry_run: false,
        }
    }

    /// Number of models forecasting at the same time. Zero is treated as one.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Runs every forecaster over `questions`, persisting each forecast
    /// against `question_set_id`. Summaries come back in forecaster order.
    pub async fn run(
        &self,
        question_set_id: Option<i64>,
        questions: &[Question],
        forecasters: &[Arc<dyn Forecaster>],
    ) -> Vec<ModelRunSummary> {
        if self.dry_run {
            for forecaster in forecasters {
                println!(
                    "   Would run {} on {} questions",
                    forecaster.name(),
                    questions.len()
                );
            }
            return forecasters
                .iter()
                .map(|f| ModelRunSummary::new(f.name()))
                .collect();
        }

        let progress = self.show_progress.then(MultiProgress::new);

        let passes = forecasters.iter().enumerate().map(|(index, forecaster)| {
            let bar = progress
                .as_ref()
                .map(|multi| multi.add(model_progress_bar(forecaster.name(), questions.len())));
            async move {
                let summary = self
                    .run_model(question_set_id, questions, forecaster.as_ref(), bar.as_ref())
                    .await;
                (index, summary)
            }
        });

        let mut results: Vec<(usize, ModelRunSummary)> = stream::iter(passes)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        results.into_iter().map(|(_, summary)| summary).collect()
    }

    async fn run_model(
        &self,
        question_set_id: Option<i64>,
        questions: &[Question],
        forecaster: &dyn Forecaster,
        bar: Option<&ProgressBar>,
    ) -> ModelRunSummary {
        let mut summary = ModelRunSummary::new(forecaster.name());
        info!("Running {} on {} questions", forecaster.name(), questions.len());

        for question in questions {
            let draft = forecaster.forecast(question).await;
            let succeeded = draft.outcome.is_success();
            if let ForecastOutcome::Failure { kind, message } = &draft.outcome {
                debug!("{} failed on {} ({}): {}", forecaster.name(), question.id, kind, message);
            }

            let forecast = draft.bind(question_set_id);
            match self.storage.save_forecast(&forecast).await {
                Ok(_) if succeeded => summary.successes += 1,
                Ok(_) => summary.failures += 1,
                Err(e) => {
                    error!(
                        "Failed to save forecast for {} from {}: {}",
                        question.id,
                        forecaster.name(),
                        e
                    );
                    summary.storage_errors += 1;
                }
            }

            if let Some(bar) = bar {
                bar.inc(1);
            }
        }

        if let Some(bar) = bar {
            bar.finish_with_message(format!(
                "{} ok, {} failed",
                summary.successes,
                summary.failures + summary.storage_errors
            ));
        }
        info!(
            "{}: {} successes, {} failures",
            summary.model, summary.successes, summary.failures
        );

        summary
    }
}

fn model_progress_bar(model: &str, len: usize) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("{prefix:.bold} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    bar.set_style(style);
    bar.set_prefix(model.to_string());
    bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        FailureKind, ForecastDraft, ForecastStatus, NewQuestionSet, Prediction, QuestionType,
        SourceType, ERROR_REASONING_PREFIX,
    };
    use crate::storage::testing::RejectingStorage;
    use crate::storage::{ForecastFilter, SqliteStorage};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysFails;

    #[async_trait]
    impl Forecaster for AlwaysFails {
        fn name(&self) -> &str {
            "test/always-fails"
        }

        async fn forecast(&self, question: &Question) -> ForecastDraft {
            ForecastDraft::failure(question, self.name(), FailureKind::Http, "connection refused")
        }
    }

    struct Fixed {
        name: &'static str,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Forecaster for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn forecast(&self, question: &Question) -> ForecastDraft {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ForecastDraft::success(
                question,
                self.name,
                Prediction::Probability(0.8),
                "base rate".to_string(),
            )
        }
    }

    fn questions() -> Vec<Question> {
        (0..3)
            .map(|i| {
                Question::new(
                    format!("q{}", i),
                    "manifold",
                    SourceType::Market,
                    format!("Question {}?", i),
                )
            })
            .collect()
    }

    async fn storage_with_set(questions: &[Question]) -> (Arc<SqliteStorage>, i64) {
        let storage = Arc::new(SqliteStorage::in_memory());
        storage.save_questions(questions).await.unwrap();
        let due = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let set_id = storage
            .create_question_set(&NewQuestionSet {
                name: "dispatch-test".to_string(),
                questions,
                freeze_date: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
                forecast_due_date: due,
                resolution_dates: vec![NaiveDate::from_ymd_opt(2026, 10, 23).unwrap()],
            })
            .await
            .unwrap();
        (storage, set_id)
    }

    #[tokio::test]
    async fn test_failing_forecaster_persists_error_rows() {
        let questions = questions();
        let (storage, set_id) = storage_with_set(&questions).await;
        let runner = ForecastRunner::new(storage.clone());
        let forecasters: Vec<Arc<dyn Forecaster>> = vec![Arc::new(AlwaysFails)];

        let summaries = runner.run(Some(set_id), &questions, &forecasters).await;

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].successes, 0);
        assert_eq!(summaries[0].failures, 3);

        let rows = storage
            .get_forecasts(&ForecastFilter::for_question_set(set_id))
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        for row in rows {
            assert!(row.reasoning.as_deref().unwrap_or("").starts_with(ERROR_REASONING_PREFIX));
            assert_eq!(row.probability, Some(0.5));
            assert_eq!(row.status, ForecastStatus::Failure);
        }
    }

    #[tokio::test]
    async fn test_concurrent_models_keep_input_order() {
        let questions = questions();
        let (storage, set_id) = storage_with_set(&questions).await;
        let runner = ForecastRunner::new(storage.clone()).concurrency(3);
        let forecasters: Vec<Arc<dyn Forecaster>> = vec![
            Arc::new(Fixed::new("a/first")),
            Arc::new(AlwaysFails),
            Arc::new(Fixed::new("c/third")),
        ];

        let summaries = runner.run(Some(set_id), &questions, &forecasters).await;

        let names: Vec<_> = summaries.iter().map(|s| s.model.as_str()).collect();
        assert_eq!(names, vec!["a/first", "test/always-fails", "c/third"]);
        assert_eq!(summaries[0].successes, 3);
        assert_eq!(summaries[1].failures, 3);

        let rows = storage
            .get_forecasts(&ForecastFilter::for_question_set(set_id))
            .await
            .unwrap();
        assert_eq!(rows.len(), 9);
    }

    #[tokio::test]
    async fn test_repeated_runs_append() {
        let questions = questions();
        let (storage, set_id) = storage_with_set(&questions).await;
        let runner = ForecastRunner::new(storage.clone());
        let forecasters: Vec<Arc<dyn Forecaster>> = vec![Arc::new(Fixed::new("a/first"))];

        runner.run(Some(set_id), &questions, &forecasters).await;
        runner.run(Some(set_id), &questions, &forecasters).await;

        let rows = storage
            .get_forecasts(&ForecastFilter::for_question_set(set_id))
            .await
            .unwrap();
        assert_eq!(rows.len(), 6);
    }

    #[tokio::test]
    async fn test_storage_error_is_counted_and_pass_continues() {
        let questions = questions();
        let storage = Arc::new(RejectingStorage::new("q1"));
        let fixed = Arc::new(Fixed::new("a/first"));
        let forecasters: Vec<Arc<dyn Forecaster>> = vec![fixed.clone()];

        let summaries = ForecastRunner::new(storage.clone())
            .run(None, &questions, &forecasters)
            .await;

        assert_eq!(fixed.calls.load(Ordering::SeqCst), 3);
        assert_eq!(summaries[0].successes, 2);
        assert_eq!(summaries[0].storage_errors, 1);
        assert_eq!(summaries[0].attempted(), 3);

        let rows = storage.get_forecasts(&ForecastFilter::default()).await.unwrap();
        let mut ids: Vec<_> = rows.iter().map(|f| f.question_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["q0", "q2"]);
    }

    #[tokio::test]
    async fn test_dry_run_calls_nothing() {
        let questions = questions();
        let storage = Arc::new(SqliteStorage::in_memory());
        let fixed = Arc::new(Fixed::new("a/first"));
        let forecasters: Vec<Arc<dyn Forecaster>> = vec![fixed.clone()];
        let runner = ForecastRunner::new(storage.clone()).dry_run(true);

        let summaries = runner.run(None, &questions, &forecasters).await;

        assert_eq!(summaries[0].attempted(), 0);
        assert_eq!(fixed.calls.load(Ordering::SeqCst), 0);
        assert!(storage
            .get_forecasts(&ForecastFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_numeric_failure_has_no_probability() {
        let mut question = Question::new("gdp", "fred", SourceType::Data, "GDP growth?");
        question.question_type = QuestionType::Continuous;
        let storage = Arc::new(SqliteStorage::in_memory());
        storage.save_questions(&[question.clone()]).await.unwrap();
        let forecasters: Vec<Arc<dyn Forecaster>> = vec![Arc::new(AlwaysFails)];

        ForecastRunner::new(storage.clone())
            .run(None, &[question], &forecasters)
            .await;

        let rows = storage.get_forecasts(&ForecastFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].probability, None);
    }
}
