//! Question set summary rendering.
//!
//! The same summary is rendered as terminal text, Markdown or JSON.

use crate::analysis::{ModelStats, QuestionSetSummary, SampleForecast};
use anyhow::{Context, Result};
use std::path::Path;

fn format_probability(p: Option<f64>) -> String {
    p.map(|p| format!("{:.3}", p))
        .unwrap_or_else(|| "-".to_string())
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(summary: &QuestionSetSummary) -> String {
    let mut output = String::new();

    output.push_str(&format!("# Question Set Summary: {}\n\n", summary.set.name));
    output.push_str(&generate_metadata_section(summary));
    output.push_str(&generate_models_section(&summary.models));
    output.push_str(&generate_samples_section(&summary.samples));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(summary: &QuestionSetSummary) -> String {
    let set = &summary.set;
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Question Set ID:** {}\n", set.id));
    section.push_str(&format!("- **Status:** {}\n", summary.status));
    section.push_str(&format!("- **Freeze Date:** {}\n", set.freeze_date));
    section.push_str(&format!("- **Forecast Due:** {}\n", set.forecast_due_date));
    if !set.resolution_dates.is_empty() {
        let dates: Vec<String> = set.resolution_dates.iter().map(|d| d.to_string()).collect();
        section.push_str(&format!("- **Resolution Dates:** {}\n", dates.join(", ")));
    }
    section.push_str(&format!("- **Questions:** {}\n", summary.question_count));
    section.push_str(&format!("- **Total Forecasts:** {}\n", summary.total_forecasts));
    if summary.failures > 0 {
        section.push_str(&format!("- **Failed Forecasts:** {}\n", summary.failures));
    }
    section.push_str(&format!(
        "- **Resolved Questions:** {} ({} final)\n",
        summary.resolved_questions, summary.final_resolutions
    ));
    section.push_str(&format!(
        "- **Generated:** {}\n\n",
        summary.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    section
}

fn generate_models_section(models: &[ModelStats]) -> String {
    let mut section = String::new();

    section.push_str("## Forecasts by Model\n\n");
    if models.is_empty() {
        section.push_str("No forecasts have been recorded for this question set yet.\n\n");
        return section;
    }

    section.push_str("| Model | Forecasts | Successes | Failures | Mean Probability |\n");
    section.push_str("|:---|:---:|:---:|:---:|:---:|\n");
    for stats in models {
        section.push_str(&format!(
            "| `{}` | {} | {} | {} | {} |\n",
            stats.model,
            stats.total,
            stats.successes,
            stats.failures,
            format_probability(stats.mean_probability)
        ));
    }
    section.push('\n');

    let failing: Vec<_> = models.iter().filter(|m| !m.failure_kinds.is_empty()).collect();
    if !failing.is_empty() {
        section.push_str("### Failures by Kind\n\n");
        for stats in failing {
            let kinds: Vec<String> = stats
                .failure_kinds
                .iter()
                .map(|(kind, count)| format!("{} x{}", kind, count))
                .collect();
            section.push_str(&format!("- `{}`: {}\n", stats.model, kinds.join(", ")));
        }
        section.push('\n');
    }

    section
}

fn generate_samples_section(samples: &[SampleForecast]) -> String {
    if samples.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Sample Forecasts\n\n");

    for sample in samples {
        section.push_str(&format!(
            "### {} / {}\n\n",
            sample.source, sample.question_id
        ));
        section.push_str(&format!("- **Model:** `{}`\n", sample.forecaster));
        section.push_str(&format!(
            "- **Probability:** {}\n\n",
            format_probability(sample.probability)
        ));
        if !sample.reasoning.is_empty() {
            section.push_str(&format!("> {}\n\n", sample.reasoning.replace('\n', " ")));
        }
    }

    section
}

fn generate_footer() -> String {
    format!(
        "---\n\n*Generated by forecastbench v{}*\n",
        env!("CARGO_PKG_VERSION")
    )
}

/// Plain-text summary for the terminal.
pub fn generate_terminal_summary(summary: &QuestionSetSummary) -> String {
    let mut lines = Vec::new();

    lines.push(format!(
        "📊 Question set {} ({}): {}",
        summary.set.id, summary.set.name, summary.status
    ));
    lines.push(format!("   Questions: {}", summary.question_count));
    lines.push(format!(
        "   Total forecasts: {} ({} failed)",
        summary.total_forecasts, summary.failures
    ));
    lines.push(format!(
        "   Resolved questions: {} ({} final)",
        summary.resolved_questions, summary.final_resolutions
    ));

    for stats in &summary.models {
        lines.push(format!(
            "   - {}: {} forecasts, {} failed, mean probability {}",
            stats.model,
            stats.total,
            stats.failures,
            format_probability(stats.mean_probability)
        ));
    }

    if !summary.samples.is_empty() {
        lines.push(String::new());
        lines.push("   Sample forecasts:".to_string());
        for sample in &summary.samples {
            lines.push(format!(
                "     {} on {}: {}",
                sample.forecaster,
                sample.question_id,
                format_probability(sample.probability)
            ));
        }
    }

    lines.join("\n")
}

/// Generate a JSON report.
pub fn generate_json_report(summary: &QuestionSetSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).map_err(Into::into)
}

/// Write rendered report content to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QuestionSet, QuestionSetStatus};
    use chrono::{NaiveDate, Utc};
    use std::collections::BTreeMap;

    fn create_test_summary() -> QuestionSetSummary {
        let date = |d| NaiveDate::from_ymd_opt(2026, 10, d).unwrap();
        QuestionSetSummary {
            set: QuestionSet {
                id: 4,
                name: "test-20261016-120000".to_string(),
                freeze_date: date(16),
                forecast_due_date: date(17),
                resolution_dates: vec![date(23), date(30)],
                created_at: Utc::now(),
            },
            status: QuestionSetStatus::Collecting,
            question_count: 2,
            total_forecasts: 4,
            failures: 1,
            models: vec![
                ModelStats {
                    model: "anthropic/claude-3-haiku-20240307".to_string(),
                    total: 2,
                    successes: 2,
                    failures: 0,
                    mean_probability: Some(0.35),
                    failure_kinds: BTreeMap::new(),
                },
                ModelStats {
                    model: "openai/gpt-4o-mini".to_string(),
                    total: 2,
                    successes: 1,
                    failures: 1,
                    mean_probability: Some(0.6),
                    failure_kinds: [("timeout".to_string(), 1)].into_iter().collect(),
                },
            ],
            resolved_questions: 0,
            final_resolutions: 0,
            samples: vec![SampleForecast {
                forecaster: "openai/gpt-4o-mini".to_string(),
                source: "manifold".to_string(),
                question_id: "abc".to_string(),
                probability: Some(0.6),
                reasoning: "Polls lean\nthis way".to_string(),
            }],
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let markdown = generate_markdown_report(&create_test_summary());

        assert!(markdown.contains("# Question Set Summary: test-20261016-120000"));
        assert!(markdown.contains("- **Status:** collecting forecasts"));
        assert!(markdown.contains("- **Resolution Dates:** 2026-10-23, 2026-10-30"));
        assert!(markdown.contains("| `openai/gpt-4o-mini` | 2 | 1 | 1 | 0.600 |"));
        assert!(markdown.contains("timeout x1"));
        assert!(markdown.contains("> Polls lean this way"));
    }

    #[test]
    fn test_empty_models_section() {
        let section = generate_models_section(&[]);
        assert!(section.contains("No forecasts have been recorded"));
    }

    #[test]
    fn test_terminal_summary() {
        let text = generate_terminal_summary(&create_test_summary());

        assert!(text.contains("Question set 4"));
        assert!(text.contains("Total forecasts: 4 (1 failed)"));
        assert!(text.contains("anthropic/claude-3-haiku-20240307: 2 forecasts, 0 failed, mean probability 0.350"));
    }

    #[test]
    fn test_generate_json_report() {
        let json = generate_json_report(&create_test_summary()).unwrap();

        assert!(json.contains("\"total_forecasts\": 4"));
        assert!(json.contains("\"status\": \"collecting\""));
        assert!(json.contains("\"mean_probability\""));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.md");

        write_report("# hello\n", &path).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# hello\n");
    }
}
