use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Utc;
use settings::Settings;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

pub const INIT_SQL: &str = include_str!("../../../scripts/init_db.sql");

pub const REQUIRED_TABLES: &[&str] = &["runs", "raw_events", "incidents", "settings"];

const USER_SETTINGS_KEY: &str = "user";

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct EventRow {
    pub ts_ms: i64,
    pub source: String,
    pub topic: String,
    pub payload_json: String,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)
            .with_context(|| format!("invalid sqlite url `{path}`"))?
            .create_if_missing(true);
        // every connection to `sqlite::memory:` opens a fresh database
        let max_connections = if path.starts_with("sqlite::memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        run_init_sql(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert_run(&self, run_id: &str, version: Option<&str>) -> Result<()> {
        let host = hostname::get()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let ts_ms = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT OR REPLACE INTO runs (run_id, started_at_ms, version, host) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(run_id)
        .bind(ts_ms)
        .bind(version)
        .bind(host)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn log_event(
        &self,
        run_id: &str,
        source: &str,
        topic: &str,
        payload_json: &str,
    ) -> Result<()> {
        let ts_ms = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO raw_events (run_id, ts_ms, source, topic, payload_json) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(run_id)
        .bind(ts_ms)
        .bind(source)
        .bind(topic)
        .bind(payload_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_events(&self, run_id: &str, topic: &str, limit: u32) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT ts_ms, source, topic, payload_json FROM raw_events \
             WHERE run_id = ?1 AND topic = ?2 ORDER BY id DESC LIMIT ?3",
        )
        .bind(run_id)
        .bind(topic)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn log_incident(
        &self,
        run_id: &str,
        severity: &str,
        kind: &str,
        message: &str,
    ) -> Result<()> {
        let ts_ms = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO incidents (run_id, ts_ms, severity, kind, message) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(run_id)
        .bind(ts_ms)
        .bind(severity)
        .bind(kind)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        let value_json = serde_json::to_string(settings)?;
        sqlx::query(
            "INSERT INTO settings (key, value_json, updated_at_ms) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at_ms = excluded.updated_at_ms",
        )
        .bind(USER_SETTINGS_KEY)
        .bind(value_json)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_settings(&self) -> Result<Option<Settings>> {
        let row = sqlx::query("SELECT value_json FROM settings WHERE key = ?1")
            .bind(USER_SETTINGS_KEY)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.try_get("value_json")?;
        let settings = Settings::from_json(&raw).context("stored settings are not valid")?;
        Ok(Some(settings))
    }

    /// Names from [`REQUIRED_TABLES`] missing from the database.
    pub async fn validate_required_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(&self.pool)
            .await?;
        let mut present = Vec::with_capacity(rows.len());
        for row in rows {
            present.push(row.try_get::<String, _>("name")?);
        }
        Ok(REQUIRED_TABLES
            .iter()
            .filter(|table| !present.iter().any(|name| name == *table))
            .map(|table| table.to_string())
            .collect())
    }
}

pub async fn init_sqlite(path: &str) -> Result<Store> {
    let store = Store::connect(path).await?;
    info!(path = path, "sqlite initialized");
    Ok(store)
}

async fn run_init_sql(pool: &SqlitePool) -> Result<()> {
    for statement in INIT_SQL.split(';') {
        let trimmed = statement.trim();
        if trimmed.is_empty() {
            continue;
        }
        sqlx::query(trimmed).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_has_required_tables() {
        let store = init_sqlite("sqlite::memory:").await.expect("memory store");
        let missing = store.validate_required_tables().await.expect("table check");
        assert!(missing.is_empty(), "missing tables: {missing:?}");
    }

    #[tokio::test]
    async fn settings_are_absent_until_saved() {
        let store = init_sqlite("sqlite::memory:").await.expect("memory store");
        assert_eq!(store.load_settings().await.expect("load"), None);
    }

    #[tokio::test]
    async fn dropped_table_is_reported_missing() {
        let store = init_sqlite("sqlite::memory:").await.expect("memory store");
        sqlx::query("DROP TABLE incidents")
            .execute(store.pool())
            .await
            .expect("drop");
        let missing = store.validate_required_tables().await.expect("table check");
        assert_eq!(missing, vec!["incidents"]);
    }
}
