use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{fs, path::Path, str::FromStr};

use shared::domain::SpaceId;

/// SQLite-backed persistence for the client session snapshot.
///
/// One row per session key; the payload is the serialized restore snapshot
/// and is overwritten on every mutation, so the table never grows beyond the
/// number of concurrent sessions sharing the file.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredSessionSnapshot {
    pub space_id: Option<SpaceId>,
    pub payload_json: String,
    pub updated_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        let storage = Self { pool };
        storage.ensure_session_snapshot_table().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn ensure_session_snapshot_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_snapshots (
                session_key  TEXT PRIMARY KEY,
                space_id     TEXT,
                payload_json TEXT NOT NULL,
                updated_at   TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure session_snapshots table exists")?;
        Ok(())
    }

    pub async fn save_session_snapshot(
        &self,
        session_key: &str,
        space_id: Option<&SpaceId>,
        payload_json: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO session_snapshots (session_key, space_id, payload_json, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(session_key) DO UPDATE SET
               space_id = excluded.space_id,
               payload_json = excluded.payload_json,
               updated_at = excluded.updated_at",
        )
        .bind(session_key)
        .bind(space_id.map(|id| id.0.as_str()))
        .bind(payload_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to save session snapshot")?;
        Ok(())
    }

    pub async fn load_session_snapshot(
        &self,
        session_key: &str,
    ) -> Result<Option<StoredSessionSnapshot>> {
        let row = sqlx::query(
            "SELECT space_id, payload_json, updated_at
             FROM session_snapshots WHERE session_key = ?",
        )
        .bind(session_key)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load session snapshot")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let space_id: Option<String> = row.try_get("space_id")?;
        let payload_json: String = row.try_get("payload_json")?;
        let updated_at: String = row.try_get("updated_at")?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .with_context(|| format!("invalid updated_at timestamp '{updated_at}'"))?
            .with_timezone(&Utc);

        Ok(Some(StoredSessionSnapshot {
            space_id: space_id.map(SpaceId),
            payload_json,
            updated_at,
        }))
    }

    pub async fn clear_session_snapshot(&self, session_key: &str) -> Result<()> {
        sqlx::query("DELETE FROM session_snapshots WHERE session_key = ?")
            .bind(session_key)
            .execute(&self.pool)
            .await
            .context("failed to clear session snapshot")?;
        Ok(())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return Ok(());
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return Ok(());
    }

    let Some(parent) = Path::new(path).parent() else {
        return Ok(());
    };

    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
