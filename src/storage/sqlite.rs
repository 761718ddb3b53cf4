//! SQLite storage backend.

use super::{ForecastFilter, QuestionFilter, Storage};
use crate::models::{
    FailureKind, Forecast, ForecastStatus, NewQuestionSet, Question, QuestionSet,
    QuestionSetItem, QuestionType, Resolution, SourceType,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS questions (
    id TEXT NOT NULL,
    source TEXT NOT NULL,
    source_type TEXT NOT NULL CHECK(source_type IN ('market', 'data')),
    text TEXT NOT NULL,
    background TEXT,
    url TEXT,
    question_type TEXT NOT NULL DEFAULT 'binary',
    created_at TEXT NOT NULL,
    resolution_date TEXT,
    category TEXT,
    resolved INTEGER NOT NULL DEFAULT 0,
    resolution_value REAL,
    base_rate REAL,
    value_range_low REAL,
    value_range_high REAL,
    quantiles TEXT,
    PRIMARY KEY (source, id)
);

CREATE TABLE IF NOT EXISTS question_sets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    freeze_date TEXT NOT NULL,
    forecast_due_date TEXT NOT NULL,
    resolution_dates TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS question_set_items (
    question_set_id INTEGER NOT NULL REFERENCES question_sets(id),
    position INTEGER NOT NULL,
    source TEXT NOT NULL,
    question_id TEXT NOT NULL,
    PRIMARY KEY (question_set_id, position)
);

CREATE TABLE IF NOT EXISTS forecasts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    question_id TEXT NOT NULL,
    source TEXT NOT NULL,
    forecaster TEXT NOT NULL,
    probability REAL,
    point_estimate REAL,
    quantile_values TEXT,
    reasoning TEXT,
    status TEXT NOT NULL CHECK(status IN ('success', 'failure')),
    error_kind TEXT,
    created_at TEXT NOT NULL,
    question_set_id INTEGER REFERENCES question_sets(id)
);

CREATE TABLE IF NOT EXISTS resolutions (
    question_id TEXT NOT NULL,
    source TEXT NOT NULL,
    date TEXT NOT NULL,
    value REAL NOT NULL,
    is_final INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (source, question_id, date)
);

CREATE INDEX IF NOT EXISTS idx_questions_resolved ON questions(resolved, created_at);
CREATE INDEX IF NOT EXISTS idx_forecasts_set ON forecasts(question_set_id);
CREATE INDEX IF NOT EXISTS idx_forecasts_question ON forecasts(source, question_id);
"#;

const QUESTION_COLUMNS: &str = "id, source, source_type, text, background, url, question_type, \
     created_at, resolution_date, category, resolved, resolution_value, base_rate, \
     value_range_low, value_range_high, quantiles";

const FORECAST_COLUMNS: &str = "id, question_id, source, forecaster, probability, point_estimate, \
     quantile_values, reasoning, status, error_kind, created_at, question_set_id";

/// SQLite-backed [`Storage`].
///
/// The connection is opened and the schema created on first use. All
/// statements run under one mutex-guarded connection.
pub struct SqliteStorage {
    db_path: Option<PathBuf>,
    conn: Mutex<Option<Connection>>,
}

impl SqliteStorage {
    /// Storage backed by a database file, created on first use.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            db_path: Some(path.as_ref().to_path_buf()),
            conn: Mutex::new(None),
        }
    }

    /// Storage backed by a private in-memory database.
    pub fn in_memory() -> Self {
        Self {
            db_path: None,
            conn: Mutex::new(None),
        }
    }

    fn open(&self) -> Result<Connection> {
        let conn = match self.db_path {
            Some(ref path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .context("Failed to create database directory")?;
                }
                Connection::open(path).with_context(|| {
                    format!("Failed to open database at {}", path.display())
                })?
            }
            None => Connection::open_in_memory().context("Failed to open in-memory database")?,
        };

        conn.execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;
        info!("Database schema initialized");
        Ok(conn)
    }

    /// Runs `f` on the connection, opening it on first use.
    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Database connection lock poisoned"))?;

        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        let conn = guard.as_mut().context("Database connection unavailable")?;
        f(conn)
    }
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn parse_column<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| conversion_error(idx, e))
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| serde_json::from_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to encode column as JSON")
}

fn row_to_question(row: &Row<'_>) -> rusqlite::Result<Question> {
    let low: Option<f64> = row.get(13)?;
    let high: Option<f64> = row.get(14)?;

    Ok(Question {
        id: row.get(0)?,
        source: row.get(1)?,
        source_type: parse_column::<SourceType>(row, 2)?,
        text: row.get(3)?,
        background: row.get(4)?,
        url: row.get(5)?,
        question_type: parse_column::<QuestionType>(row, 6)?,
        created_at: row.get(7)?,
        resolution_date: row.get(8)?,
        category: row.get(9)?,
        resolved: row.get(10)?,
        resolution_value: row.get(11)?,
        base_rate: row.get(12)?,
        value_range: low.zip(high),
        quantiles: json_column(row, 15)?,
    })
}

fn row_to_forecast(row: &Row<'_>) -> rusqlite::Result<Forecast> {
    let error_kind: Option<String> = row.get(9)?;

    Ok(Forecast {
        id: row.get(0)?,
        question_id: row.get(1)?,
        source: row.get(2)?,
        forecaster: row.get(3)?,
        probability: row.get(4)?,
        point_estimate: row.get(5)?,
        quantile_values: json_column(row, 6)?,
        reasoning: row.get(7)?,
        status: parse_column::<ForecastStatus>(row, 8)?,
        error_kind: error_kind
            .map(|k| FailureKind::from_str(&k).map_err(|e| conversion_error(9, e)))
            .transpose()?,
        created_at: row.get(10)?,
        question_set_id: row.get(11)?,
    })
}

fn row_to_resolution(row: &Row<'_>) -> rusqlite::Result<Resolution> {
    Ok(Resolution {
        question_id: row.get(0)?,
        source: row.get(1)?,
        date: row.get(2)?,
        value: row.get(3)?,
        is_final: row.get(4)?,
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_questions(&self, questions: &[Question]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&format!(
                    r#"
                    INSERT INTO questions ({QUESTION_COLUMNS})
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                    ON CONFLICT(source, id) DO UPDATE SET
                        resolved = MAX(resolved, excluded.resolved),
                        resolution_value = COALESCE(excluded.resolution_value, resolution_value)
                    "#
                ))?;

                for q in questions {
                    let quantiles = q.quantiles.as_ref().map(to_json).transpose()?;
                    stmt.execute(params![
                        q.id,
                        q.source,
                        q.source_type.as_str(),
                        q.text,
                        q.background,
                        q.url,
                        q.question_type.as_str(),
                        q.created_at,
                        q.resolution_date,
                        q.category,
                        q.resolved,
                        q.resolution_value,
                        q.base_rate,
                        q.value_range.map(|(low, _)| low),
                        q.value_range.map(|(_, high)| high),
                        quantiles,
                    ])
                    .with_context(|| format!("Failed to save question {}/{}", q.source, q.id))?;
                }
            }
            tx.commit().context("Failed to commit questions")?;

            debug!("Saved {} questions", questions.len());
            Ok(())
        })
    }

    async fn get_question(&self, source: &str, question_id: &str) -> Result<Option<Question>> {
        self.with_conn(|conn| {
            let question = conn
                .query_row(
                    &format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE source = ?1 AND id = ?2"),
                    params![source, question_id],
                    row_to_question,
                )
                .optional()
                .context("Failed to load question")?;
            Ok(question)
        })
    }

    async fn get_questions(&self, filter: &QuestionFilter) -> Result<Vec<Question>> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE 1 = 1");
            let mut args: Vec<Value> = Vec::new();

            if let Some(resolved) = filter.resolved {
                sql.push_str(" AND resolved = ?");
                args.push(Value::Integer(resolved as i64));
            }
            if let Some(ref source) = filter.source {
                sql.push_str(" AND source = ?");
                args.push(Value::Text(source.clone()));
            }
            if let Some(ref category) = filter.category {
                sql.push_str(" AND category = ?");
                args.push(Value::Text(category.clone()));
            }
            sql.push_str(" ORDER BY created_at DESC");
            if let Some(limit) = filter.limit {
                sql.push_str(" LIMIT ?");
                args.push(Value::Integer(limit as i64));
            }

            let mut stmt = conn.prepare(&sql)?;
            let questions = stmt
                .query_map(params_from_iter(args), row_to_question)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to load questions")?;
            Ok(questions)
        })
    }

    async fn mark_resolved(&self, source: &str, question_id: &str, value: f64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE questions SET resolved = 1, resolution_value = ?1 WHERE source = ?2 AND id = ?3",
                params![value, source, question_id],
            )
            .context("Failed to mark question resolved")?;
            Ok(())
        })
    }

    async fn create_question_set(&self, set: &NewQuestionSet<'_>) -> Result<i64> {
        let resolution_dates = to_json(&set.resolution_dates)?;

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                r#"
                INSERT INTO question_sets (name, freeze_date, forecast_due_date, resolution_dates, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    set.name,
                    set.freeze_date,
                    set.forecast_due_date,
                    resolution_dates,
                    Utc::now(),
                ],
            )
            .context("Failed to create question set")?;
            let set_id = tx.last_insert_rowid();

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO question_set_items (question_set_id, position, source, question_id) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (position, question) in set.questions.iter().enumerate() {
                    stmt.execute(params![set_id, position as i64, question.source, question.id])
                        .context("Failed to add question set item")?;
                }
            }
            tx.commit().context("Failed to commit question set")?;

            info!(
                "Created question set #{} '{}' with {} questions",
                set_id,
                set.name,
                set.questions.len()
            );
            Ok(set_id)
        })
    }

    async fn get_question_set(&self, set_id: i64) -> Result<Option<QuestionSet>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    r#"
                    SELECT id, name, freeze_date, forecast_due_date, resolution_dates, created_at
                    FROM question_sets WHERE id = ?1
                    "#,
                    params![set_id],
                    |row| {
                        Ok(QuestionSet {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            freeze_date: row.get(2)?,
                            forecast_due_date: row.get(3)?,
                            resolution_dates: json_column(row, 4)?.unwrap_or_default(),
                            created_at: row.get(5)?,
                        })
                    },
                )
                .optional()
                .context("Failed to load question set")?;
            Ok(row)
        })
    }

    async fn get_question_set_items(&self, set_id: i64) -> Result<Vec<QuestionSetItem>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT source, question_id FROM question_set_items WHERE question_set_id = ?1 ORDER BY position",
            )?;
            let items = stmt
                .query_map(params![set_id], |row| {
                    Ok(QuestionSetItem {
                        source: row.get(0)?,
                        question_id: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to load question set items")?;
            Ok(items)
        })
    }

    async fn save_forecast(&self, forecast: &Forecast) -> Result<i64> {
        let quantile_values = forecast.quantile_values.as_ref().map(to_json).transpose()?;

        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO forecasts ({}) VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    FORECAST_COLUMNS
                ),
                params![
                    forecast.question_id,
                    forecast.source,
                    forecast.forecaster,
                    forecast.probability,
                    forecast.point_estimate,
                    quantile_values,
                    forecast.reasoning,
                    forecast.status.as_str(),
                    forecast.error_kind.map(|k| k.as_str()),
                    forecast.created_at,
                    forecast.question_set_id,
                ],
            )
            .with_context(|| {
                format!(
                    "Failed to save forecast for {}/{}",
                    forecast.source, forecast.question_id
                )
            })?;
            Ok(conn.last_insert_rowid())
        })
    }

    async fn get_forecasts(&self, filter: &ForecastFilter) -> Result<Vec<Forecast>> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {FORECAST_COLUMNS} FROM forecasts WHERE 1 = 1");
            let mut args: Vec<Value> = Vec::new();

            if let Some(set_id) = filter.question_set_id {
                sql.push_str(" AND question_set_id = ?");
                args.push(Value::Integer(set_id));
            }
            if let Some(ref question_id) = filter.question_id {
                sql.push_str(" AND question_id = ?");
                args.push(Value::Text(question_id.clone()));
            }
            if let Some(ref source) = filter.source {
                sql.push_str(" AND source = ?");
                args.push(Value::Text(source.clone()));
            }
            if let Some(ref forecaster) = filter.forecaster {
                sql.push_str(" AND forecaster = ?");
                args.push(Value::Text(forecaster.clone()));
            }
            sql.push_str(" ORDER BY created_at DESC, id DESC");
            if let Some(limit) = filter.limit {
                sql.push_str(" LIMIT ?");
                args.push(Value::Integer(limit as i64));
            }

            let mut stmt = conn.prepare(&sql)?;
            let forecasts = stmt
                .query_map(params_from_iter(args), row_to_forecast)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to load forecasts")?;
            Ok(forecasts)
        })
    }

    async fn save_resolution(&self, resolution: &Resolution) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO resolutions (question_id, source, date, value, is_final)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    resolution.question_id,
                    resolution.source,
                    resolution.date,
                    resolution.value,
                    resolution.is_final,
                ],
            )
            .context("Failed to save resolution")?;
            Ok(())
        })
    }

    async fn get_resolution(
        &self,
        source: &str,
        question_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<Option<Resolution>> {
        self.with_conn(|conn| {
            let base = "SELECT question_id, source, date, value, is_final FROM resolutions \
                        WHERE source = ?1 AND question_id = ?2";
            let resolution = match date {
                Some(date) => conn
                    .query_row(
                        &format!("{} AND date = ?3", base),
                        params![source, question_id, date],
                        row_to_resolution,
                    )
                    .optional(),
                None => conn
                    .query_row(
                        &format!("{} ORDER BY date DESC LIMIT 1", base),
                        params![source, question_id],
                        row_to_resolution,
                    )
                    .optional(),
            }
            .context("Failed to load resolution")?;
            Ok(resolution)
        })
    }

    async fn get_resolutions(
        &self,
        question_id: Option<&str>,
        source: Option<&str>,
    ) -> Result<Vec<Resolution>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT question_id, source, date, value, is_final FROM resolutions WHERE 1 = 1",
            );
            let mut args: Vec<Value> = Vec::new();

            if let Some(question_id) = question_id {
                sql.push_str(" AND question_id = ?");
                args.push(Value::Text(question_id.to_string()));
            }
            if let Some(source) = source {
                sql.push_str(" AND source = ?");
                args.push(Value::Text(source.to_string()));
            }
            sql.push_str(" ORDER BY date DESC");

            let mut stmt = conn.prepare(&sql)?;
            let resolutions = stmt
                .query_map(params_from_iter(args), row_to_resolution)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to load resolutions")?;
            Ok(resolutions)
        })
    }
}
