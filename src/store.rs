//! Outcome Recorder: interaction records and usage statistics (SQLite).

use crate::error::{Result, StoreError};
use crate::ChatId;

use chrono::NaiveDateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row as _, SqlitePool};
use std::path::Path;

pub const MSG_DATABASE_NOT_CONFIGURED: &str =
    "Database not configured. Set `db_filepath` in your config file.";
pub const MSG_DATABASE_EMPTY: &str = "Database is empty.";

/// Summary of one top-level answer attempt. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionRecord {
    pub chat_id: ChatId,
    pub user_id: u64,
    pub username: String,
    pub prompt: String,
    pub prompt_tokens: u32,
    pub result: String,
    pub result_tokens: u32,
    pub successful: bool,
}

/// Fire-and-forget sink for interaction records.
pub trait Recorder: Send + Sync + 'static {
    /// Persist in the background. Failures are logged, never returned.
    fn record(&self, record: InteractionRecord);
}

/// Aggregated usage since the first record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub since: NaiveDateTime,
    pub chats: i64,
    pub prompts: i64,
    pub prompt_tokens: i64,
    pub completions: i64,
    pub completion_tokens: i64,
    pub errors: i64,
}

impl Stats {
    pub fn render(&self) -> String {
        [
            format!("Since {}", self.since.format("%Y-%m-%d %H:%M:%S")),
            String::new(),
            format!("Chats: {}", thousands(self.chats)),
            format!(
                "Prompts: {} (Total tokens: {})",
                thousands(self.prompts),
                thousands(self.prompt_tokens)
            ),
            format!(
                "Completions: {} (Total tokens: {})",
                thousands(self.completions),
                thousands(self.completion_tokens)
            ),
            format!("Errors: {}", thousands(self.errors)),
        ]
        .join("\n")
    }
}

/// Format with comma thousands separators.
fn thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if value < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

/// SQLite-backed interaction log.
#[derive(Debug, Clone)]
pub struct InteractionStore {
    pool: SqlitePool,
}

impl InteractionStore {
    /// Open (creating if needed) the database file and run migrations.
    pub async fn connect(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(StoreError::Connect)?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    /// Insert a record, returning its id.
    pub async fn insert(&self, record: &InteractionRecord) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO interactions \
             (chat_id, user_id, username, prompt, prompt_tokens, result, result_tokens, successful) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.chat_id)
        .bind(record.user_id as i64)
        .bind(&record.username)
        .bind(&record.prompt)
        .bind(i64::from(record.prompt_tokens))
        .bind(&record.result)
        .bind(i64::from(record.result_tokens))
        .bind(record.successful)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(result.last_insert_rowid())
    }

    /// Usage statistics, or `None` when nothing was recorded yet.
    pub async fn stats(&self) -> Result<Option<Stats>> {
        let row = sqlx::query(
            "SELECT \
                MIN(created_at) AS since, \
                COUNT(DISTINCT chat_id) AS chats, \
                COALESCE(SUM(CASE WHEN prompt_tokens > 0 THEN 1 ELSE 0 END), 0) AS prompts, \
                COALESCE(SUM(prompt_tokens), 0) AS prompt_tokens, \
                COALESCE(SUM(CASE WHEN successful = 1 THEN 1 ELSE 0 END), 0) AS completions, \
                COALESCE(SUM(CASE WHEN successful = 1 THEN result_tokens ELSE 0 END), 0) AS completion_tokens, \
                COALESCE(SUM(CASE WHEN successful = 0 THEN 1 ELSE 0 END), 0) AS errors \
             FROM interactions",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)?;

        let since: Option<NaiveDateTime> = row.try_get("since").map_err(StoreError::from)?;
        let Some(since) = since else {
            return Ok(None);
        };

        Ok(Some(Stats {
            since,
            chats: row.try_get("chats").map_err(StoreError::from)?,
            prompts: row.try_get("prompts").map_err(StoreError::from)?,
            prompt_tokens: row.try_get("prompt_tokens").map_err(StoreError::from)?,
            completions: row.try_get("completions").map_err(StoreError::from)?,
            completion_tokens: row.try_get("completion_tokens").map_err(StoreError::from)?,
            errors: row.try_get("errors").map_err(StoreError::from)?,
        }))
    }
}

impl Recorder for InteractionStore {
    fn record(&self, record: InteractionRecord) {
        let store = self.clone();
        tokio::spawn(async move {
            if let Err(error) = store.insert(&record).await {
                tracing::warn!(%error, chat_id = record.chat_id, "failed to persist interaction");
            }
        });
    }
}

/// Text for the `/stats` command.
pub async fn stats_message(store: Option<&InteractionStore>) -> String {
    let Some(store) = store else {
        return MSG_DATABASE_NOT_CONFIGURED.to_string();
    };
    match store.stats().await {
        Ok(Some(stats)) => stats.render(),
        Ok(None) => MSG_DATABASE_EMPTY.to_string(),
        Err(error) => {
            tracing::warn!(%error, "failed to load stats");
            MSG_DATABASE_EMPTY.to_string()
        }
    }
}
