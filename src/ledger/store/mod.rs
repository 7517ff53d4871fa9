//! Durable usage storage: one SQLite row per identity.
//!
//! Records are read and written as whole units so the lock scope stays
//! per-identity. The in-memory ledger remains authoritative for admission
//! decisions; this store provides durability across restarts and data for
//! the stats surfaces.

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, info};

use crate::ledger::models::{HistoryEntry, UsageRecord};

pub type DbPool = Pool<Sqlite>;

/// Storage seam for the usage ledger.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn upsert(&self, record: &UsageRecord) -> Result<()>;
    async fn get(&self, identity: &str) -> Result<Option<UsageRecord>>;
    async fn load_all(&self) -> Result<Vec<UsageRecord>>;
}

#[derive(Debug, Clone)]
pub struct SqliteUsageStore {
    pool: DbPool,
}

#[derive(FromRow)]
struct UsageRow {
    identity: String,
    prompt_count: i64,
    token_count: i64,
    window_start: NaiveDateTime,
    last_request_at: NaiveDateTime,
    history_json: String,
}

impl UsageRow {
    fn into_record(self) -> Result<UsageRecord> {
        let history: VecDeque<HistoryEntry> = serde_json::from_str(&self.history_json)
            .with_context(|| format!("Failed to parse history for '{}'", self.identity))?;

        Ok(UsageRecord {
            identity: self.identity,
            prompt_count: u64::try_from(self.prompt_count).unwrap_or(0),
            token_count: u64::try_from(self.token_count).unwrap_or(0),
            window_start: self.window_start.and_utc(),
            last_request_at: self.last_request_at.and_utc(),
            history,
        })
    }
}

impl SqliteUsageStore {
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running usage database migrations");

        sqlx::migrate!("src/ledger/store/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Usage database migrations completed successfully");
        Ok(())
    }

    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        let db_path = config_dir.join("usage.db");

        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(db_path).await
    }
}

#[async_trait]
impl UsageStore for SqliteUsageStore {
    async fn upsert(&self, record: &UsageRecord) -> Result<()> {
        let history_json =
            serde_json::to_string(&record.history).context("Failed to serialize history")?;
        let prompt_count = i64::try_from(record.prompt_count)
            .context("prompt_count does not fit in storage")?;
        let token_count =
            i64::try_from(record.token_count).context("token_count does not fit in storage")?;

        sqlx::query(
            r#"
            INSERT INTO usage_records
                (identity, prompt_count, token_count, window_start, last_request_at, history_json)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(identity) DO UPDATE SET
                prompt_count = excluded.prompt_count,
                token_count = excluded.token_count,
                window_start = excluded.window_start,
                last_request_at = excluded.last_request_at,
                history_json = excluded.history_json
            "#,
        )
        .bind(&record.identity)
        .bind(prompt_count)
        .bind(token_count)
        .bind(record.window_start.naive_utc())
        .bind(record.last_request_at.naive_utc())
        .bind(&history_json)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to persist usage record for '{}'", record.identity))?;

        Ok(())
    }

    async fn get(&self, identity: &str) -> Result<Option<UsageRecord>> {
        let row: Option<UsageRow> = sqlx::query_as(
            r#"
            SELECT identity, prompt_count, token_count, window_start, last_request_at, history_json
            FROM usage_records WHERE identity = ?
            "#,
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to read usage record for '{}'", identity))?;

        row.map(UsageRow::into_record).transpose()
    }

    async fn load_all(&self) -> Result<Vec<UsageRecord>> {
        let rows: Vec<UsageRow> = sqlx::query_as(
            r#"
            SELECT identity, prompt_count, token_count, window_start, last_request_at, history_json
            FROM usage_records ORDER BY identity
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load usage records")?;

        rows.into_iter().map(UsageRow::into_record).collect()
    }
}
