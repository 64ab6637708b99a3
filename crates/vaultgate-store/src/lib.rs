#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **vaultgate-store** – SQLite-backed persistence for the trust plane.
//!
//! Holds the relational state the platform keeps outside the vault:
//! authentication events (the durable audit trail), issued-token records,
//! credential metadata snapshots, and credential rotation history. The
//! backend uses sqlx with plain queries so the schema lives next to the
//! code, and runs `CREATE TABLE IF NOT EXISTS` migrations on open.
//!
//! [`SqliteStore`] implements [`AuditSink`] (best-effort, never fails the
//! emitting request) and [`RotationStore`] so the gateway can persist both
//! through one handle.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use tracing::error;
use uuid::Uuid;

use vaultgate_cache::CachedToken;
use vaultgate_rotation::{RotationError, RotationStore};
use vaultgate_types::{AuditEvent, AuditSink, RotationRecord, RotationState};

/// SQLite persistence backend.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create the database at `path` and run migrations.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let database_url = format!("sqlite://{}?mode=rwc", path.as_ref().display());
        let pool = SqlitePool::connect(&database_url).await?;
        Self::from_pool(pool).await
    }

    /// In-memory database for tests and local development. The pool is
    /// pinned to one connection: every SQLite `:memory:` connection is its
    /// own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    /// Build from an existing pool, running migrations.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                client_id TEXT NOT NULL,
                version TEXT NOT NULL,
                secret_hash TEXT NOT NULL,
                active INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT,
                PRIMARY KEY (client_id, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tokens (
                jti TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                credential_version TEXT NOT NULL,
                issued_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS authentication_events (
                event_id TEXT PRIMARY KEY,
                event_type TEXT NOT NULL,
                client_id TEXT,
                token_id_mask TEXT,
                request_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                event_time TEXT NOT NULL,
                attributes TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credential_rotation_history (
                rotation_id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                state TEXT NOT NULL,
                old_version TEXT NOT NULL,
                new_version TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                transition_seconds INTEGER NOT NULL,
                reason TEXT NOT NULL,
                forced INTEGER NOT NULL,
                message TEXT NOT NULL,
                superseded_by TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_credentials_client ON credentials(client_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tokens_client ON tokens(client_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tokens_jti ON tokens(jti)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_client_time ON authentication_events(client_id, event_time)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_rotation_client ON credential_rotation_history(client_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record an issued token.
    pub async fn record_token(&self, token: &CachedToken) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO tokens (jti, client_id, credential_version, issued_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&token.jti)
        .bind(&token.client_id)
        .bind(&token.credential_version)
        .bind(token.issued_at.to_rfc3339())
        .bind(token.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count persisted token records for a client.
    pub async fn token_count_for_client(&self, client_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM tokens WHERE client_id = ?")
            .bind(client_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    /// Authentication events for a client in a time range, oldest first.
    pub async fn events_for_client(
        &self,
        client_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, event_type, client_id, token_id_mask, request_id,
                   sequence, event_time, attributes
            FROM authentication_events
            WHERE client_id = ? AND event_time >= ?
            ORDER BY event_time ASC, sequence ASC
            "#,
        )
        .bind(client_id)
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEvent> {
    let event_type_raw: String = row.get("event_type");
    let event_type = serde_json::from_value(serde_json::Value::String(event_type_raw))?;
    let attributes_raw: String = row.get("attributes");
    let event_time: String = row.get("event_time");
    let event_id: String = row.get("event_id");
    let request_id: String = row.get("request_id");
    let sequence: i64 = row.get("sequence");
    Ok(AuditEvent {
        event_id: Uuid::parse_str(&event_id)?,
        event_type,
        client_id: row.get("client_id"),
        token_id_mask: row.get("token_id_mask"),
        timestamp: parse_instant(&event_time)?,
        request_id: Uuid::parse_str(&request_id)?,
        sequence: sequence.max(0) as u64,
        attributes: serde_json::from_str(&attributes_raw)?,
    })
}

fn row_to_rotation(row: &sqlx::sqlite::SqliteRow) -> Result<RotationRecord> {
    let state_raw: String = row.get("state");
    let state: RotationState = serde_json::from_value(serde_json::Value::String(state_raw))?;
    let rotation_id: String = row.get("rotation_id");
    let started_at: String = row.get("started_at");
    let completed_at: Option<String> = row.get("completed_at");
    let superseded_by: Option<String> = row.get("superseded_by");
    let transition_seconds: i64 = row.get("transition_seconds");
    let forced: i64 = row.get("forced");
    Ok(RotationRecord {
        rotation_id: Uuid::parse_str(&rotation_id)?,
        client_id: row.get("client_id"),
        state,
        old_version: row.get("old_version"),
        new_version: row.get("new_version"),
        started_at: parse_instant(&started_at)?,
        completed_at: completed_at.as_deref().map(parse_instant).transpose()?,
        transition_window: Duration::seconds(transition_seconds),
        reason: row.get("reason"),
        forced: forced != 0,
        message: row.get("message"),
        superseded_by: superseded_by
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()?,
    })
}

async fn upsert_rotation(pool: &SqlitePool, record: &RotationRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO credential_rotation_history
        (rotation_id, client_id, state, old_version, new_version, started_at,
         completed_at, transition_seconds, reason, forced, message, superseded_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.rotation_id.to_string())
    .bind(&record.client_id)
    .bind(record.state.to_string())
    .bind(&record.old_version)
    .bind(&record.new_version)
    .bind(record.started_at.to_rfc3339())
    .bind(record.completed_at.map(|t| t.to_rfc3339()))
    .bind(record.transition_window.num_seconds())
    .bind(&record.reason)
    .bind(record.forced as i64)
    .bind(&record.message)
    .bind(record.superseded_by.map(|id| id.to_string()))
    .execute(pool)
    .await?;
    Ok(())
}

#[async_trait]
impl AuditSink for SqliteStore {
    async fn record(&self, event: AuditEvent) {
        let attributes = match serde_json::to_string(&event.attributes) {
            Ok(attributes) => attributes,
            Err(err) => {
                error!(error = %err, "audit attributes unserializable");
                return;
            }
        };
        let event_type = event.event_type.as_str();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO authentication_events
            (event_id, event_type, client_id, token_id_mask, request_id, sequence, event_time, attributes)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.event_id.to_string())
        .bind(event_type)
        .bind(&event.client_id)
        .bind(&event.token_id_mask)
        .bind(event.request_id.to_string())
        .bind(event.sequence as i64)
        .bind(event.timestamp.to_rfc3339())
        .bind(attributes)
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            // Best-effort: a failing audit store must not fail the request.
            error!(error = %err, event_type, "failed to persist audit event");
        }
    }
}

#[async_trait]
impl RotationStore for SqliteStore {
    async fn insert(&self, record: RotationRecord) -> vaultgate_rotation::Result<()> {
        upsert_rotation(&self.pool, &record)
            .await
            .map_err(|e| RotationError::Store(e.to_string()))
    }

    async fn update(&self, record: RotationRecord) -> vaultgate_rotation::Result<()> {
        upsert_rotation(&self.pool, &record)
            .await
            .map_err(|e| RotationError::Store(e.to_string()))
    }

    async fn get(&self, rotation_id: Uuid) -> vaultgate_rotation::Result<Option<RotationRecord>> {
        let row = sqlx::query("SELECT * FROM credential_rotation_history WHERE rotation_id = ?")
            .bind(rotation_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RotationError::Store(e.to_string()))?;
        row.as_ref()
            .map(row_to_rotation)
            .transpose()
            .map_err(|e| RotationError::Store(e.to_string()))
    }

    async fn active_for_client(
        &self,
        client_id: &str,
    ) -> vaultgate_rotation::Result<Option<RotationRecord>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM credential_rotation_history
            WHERE client_id = ? AND state NOT IN ('NEW_ACTIVE', 'FAILED')
            LIMIT 1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RotationError::Store(e.to_string()))?;
        row.as_ref()
            .map(row_to_rotation)
            .transpose()
            .map_err(|e| RotationError::Store(e.to_string()))
    }

    async fn open_records(&self) -> vaultgate_rotation::Result<Vec<RotationRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM credential_rotation_history WHERE state NOT IN ('NEW_ACTIVE', 'FAILED')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RotationError::Store(e.to_string()))?;
        rows.iter()
            .map(|row| row_to_rotation(row).map_err(|e| RotationError::Store(e.to_string())))
            .collect()
    }

    async fn history_for_client(
        &self,
        client_id: &str,
    ) -> vaultgate_rotation::Result<Vec<RotationRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM credential_rotation_history WHERE client_id = ? ORDER BY started_at ASC",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RotationError::Store(e.to_string()))?;
        rows.iter()
            .map(|row| row_to_rotation(row).map_err(|e| RotationError::Store(e.to_string())))
            .collect()
    }
}
