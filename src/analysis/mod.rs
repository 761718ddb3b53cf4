//! Analysis of stored forecasts.

pub mod aggregator;

pub use aggregator::{summarize, ModelStats, QuestionSetSummary, SampleForecast};
