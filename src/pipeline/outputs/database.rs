use async_trait::async_trait;
use chrono::Utc;
use log::info;
use sqlx::{PgPool, Pool, Sqlite, SqlitePool};
use tokio::sync::Mutex;

use super::Output;
use crate::pipeline::errors::PipelineError;
use crate::pipeline::types::PipelineEvent;

/// Connection parameters for [`DatabaseOutput`].
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// A `sqlite:` or `postgres(ql):` connection URL.
    pub url: String,
}

enum DbPool {
    Sqlite(Pool<Sqlite>),
    Postgres(PgPool),
}

/// Persists every event into three tables — primary header row, raw/processed
/// content, and one row per metadata key/value — against SQLite (tests) or
/// PostgreSQL (production) with an identical logical schema, per spec.md
/// §4.5. Duplicate `event_id` inserts are silently skipped: the dedup filter
/// is upstream, this is defence in depth.
pub struct DatabaseOutput {
    output_id: String,
    config: DatabaseConfig,
    pool: Mutex<Option<DbPool>>,
}

impl DatabaseOutput {
    pub fn new(output_id: impl Into<String>, config: DatabaseConfig) -> Self {
        Self {
            output_id: output_id.into(),
            config,
            pool: Mutex::new(None),
        }
    }

    fn is_postgres(&self) -> bool {
        self.config.url.starts_with("postgres://") || self.config.url.starts_with("postgresql://")
    }
}

const SQLITE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    event_id TEXT PRIMARY KEY,
    awipsid TEXT NOT NULL,
    cccc TEXT NOT NULL,
    product_id TEXT NOT NULL,
    issue TEXT NOT NULL,
    ttaaii TEXT NOT NULL,
    subject TEXT NOT NULL,
    content_type TEXT NOT NULL,
    event_variant TEXT NOT NULL,
    received_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS event_content (
    event_id TEXT NOT NULL REFERENCES events(event_id),
    noaaport_raw TEXT,
    processed_payload TEXT
);
CREATE TABLE IF NOT EXISTS event_metadata (
    event_id TEXT NOT NULL REFERENCES events(event_id),
    key TEXT NOT NULL,
    value TEXT NOT NULL
);
"#;

const POSTGRES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    event_id UUID PRIMARY KEY,
    awipsid TEXT NOT NULL,
    cccc TEXT NOT NULL,
    product_id TEXT NOT NULL,
    issue TIMESTAMPTZ NOT NULL,
    ttaaii TEXT NOT NULL,
    subject TEXT NOT NULL,
    content_type TEXT NOT NULL,
    event_variant TEXT NOT NULL,
    received_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS event_content (
    event_id UUID NOT NULL REFERENCES events(event_id),
    noaaport_raw TEXT,
    processed_payload JSONB
);
CREATE TABLE IF NOT EXISTS event_metadata (
    event_id UUID NOT NULL REFERENCES events(event_id),
    key TEXT NOT NULL,
    value TEXT NOT NULL
);
"#;

fn processed_payload(event: &PipelineEvent) -> Option<String> {
    match event {
        PipelineEvent::RawIngest(_) => None,
        PipelineEvent::TextProduct(e) => serde_json::to_string(&e.product).ok(),
        PipelineEvent::Xml(e) => Some(e.xml.clone()),
    }
}

fn raw_payload(event: &PipelineEvent) -> &str {
    match event {
        PipelineEvent::RawIngest(e) => &e.noaaport,
        PipelineEvent::TextProduct(e) => &e.noaaport,
        PipelineEvent::Xml(e) => &e.noaaport,
    }
}

fn header_fields(event: &PipelineEvent) -> (&str, &str) {
    match event {
        PipelineEvent::RawIngest(e) => (&e.ttaaii, &e.subject),
        PipelineEvent::TextProduct(e) => (&e.ttaaii, &e.subject),
        PipelineEvent::Xml(e) => (&e.ttaaii, &e.subject),
    }
}

#[async_trait]
impl Output for DatabaseOutput {
    fn output_id(&self) -> &str {
        &self.output_id
    }

    async fn start(&self) -> Result<(), PipelineError> {
        let mut guard = self.pool.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let db_pool = if self.is_postgres() {
            let pool = PgPool::connect(&self.config.url).await.map_err(|e| PipelineError::Output {
                stage_id: self.output_id.clone(),
                message: format!("postgres connect failed: {e}"),
            })?;
            sqlx::query(POSTGRES_SCHEMA).execute(&pool).await.map_err(|e| PipelineError::Output {
                stage_id: self.output_id.clone(),
                message: format!("postgres schema migration failed: {e}"),
            })?;
            DbPool::Postgres(pool)
        } else {
            let pool = SqlitePool::connect(&self.config.url).await.map_err(|e| PipelineError::Output {
                stage_id: self.output_id.clone(),
                message: format!("sqlite connect failed: {e}"),
            })?;
            for statement in SQLITE_SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                sqlx::query(statement).execute(&pool).await.map_err(|e| PipelineError::Output {
                    stage_id: self.output_id.clone(),
                    message: format!("sqlite schema migration failed: {e}"),
                })?;
            }
            DbPool::Sqlite(pool)
        };

        info!("database output {} connected and migrated", self.output_id);
        *guard = Some(db_pool);
        Ok(())
    }

    async fn stop(&self) -> Result<(), PipelineError> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.take() {
            match pool {
                DbPool::Sqlite(p) => p.close().await,
                DbPool::Postgres(p) => p.close().await,
            }
        }
        Ok(())
    }

    async fn send(&self, event: &PipelineEvent) -> Result<(), PipelineError> {
        let guard = self.pool.lock().await;
        let Some(pool) = guard.as_ref() else {
            return Err(PipelineError::Output {
                stage_id: self.output_id.clone(),
                message: "output not started".to_string(),
            });
        };

        let metadata = event.metadata();
        let event_id = metadata.event_id;
        let content_type = event.content_type();
        let event_variant = match event {
            PipelineEvent::RawIngest(_) => "raw_ingest",
            PipelineEvent::TextProduct(_) => "text_product",
            PipelineEvent::Xml(_) => "xml",
        };
        let received_at = Utc::now();
        let raw = raw_payload(event);
        let processed = processed_payload(event);
        let (ttaaii, subject) = header_fields(event);

        let fail = |e: sqlx::Error| PipelineError::Output {
            stage_id: self.output_id.clone(),
            message: format!("insert failed: {e}"),
        };

        match pool {
            DbPool::Sqlite(p) => {
                let inserted = sqlx::query(
                    "INSERT OR IGNORE INTO events (event_id, awipsid, cccc, product_id, issue, ttaaii, subject, content_type, event_variant, received_at) VALUES (?,?,?,?,?,?,?,?,?,?)",
                )
                .bind(event_id.to_string())
                .bind(event.awipsid())
                .bind(event.cccc())
                .bind(event.product_id())
                .bind(metadata.timestamp.to_rfc3339())
                .bind(ttaaii)
                .bind(subject)
                .bind(content_type)
                .bind(event_variant)
                .bind(received_at.to_rfc3339())
                .execute(p)
                .await
                .map_err(fail)?;

                if inserted.rows_affected() == 0 {
                    return Ok(());
                }

                sqlx::query("INSERT INTO event_content (event_id, noaaport_raw, processed_payload) VALUES (?,?,?)")
                    .bind(event_id.to_string())
                    .bind(raw)
                    .bind(processed)
                    .execute(p)
                    .await
                    .map_err(fail)?;

                for (key, value) in &metadata.custom {
                    sqlx::query("INSERT INTO event_metadata (event_id, key, value) VALUES (?,?,?)")
                        .bind(event_id.to_string())
                        .bind(key)
                        .bind(value.to_string())
                        .execute(p)
                        .await
                        .map_err(fail)?;
                }
            }
            DbPool::Postgres(p) => {
                let inserted = sqlx::query(
                    "INSERT INTO events (event_id, awipsid, cccc, product_id, issue, ttaaii, subject, content_type, event_variant, received_at) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10) ON CONFLICT (event_id) DO NOTHING",
                )
                .bind(event_id)
                .bind(event.awipsid())
                .bind(event.cccc())
                .bind(event.product_id())
                .bind(metadata.timestamp)
                .bind(ttaaii)
                .bind(subject)
                .bind(content_type)
                .bind(event_variant)
                .bind(received_at)
                .execute(p)
                .await
                .map_err(fail)?;

                if inserted.rows_affected() == 0 {
                    return Ok(());
                }

                sqlx::query("INSERT INTO event_content (event_id, noaaport_raw, processed_payload) VALUES ($1,$2,$3)")
                    .bind(event_id)
                    .bind(raw)
                    .bind(processed)
                    .execute(p)
                    .await
                    .map_err(fail)?;

                for (key, value) in &metadata.custom {
                    sqlx::query("INSERT INTO event_metadata (event_id, key, value) VALUES ($1,$2,$3)")
                        .bind(event_id)
                        .bind(key)
                        .bind(value.to_string())
                        .execute(p)
                        .await
                        .map_err(fail)?;
                }
            }
        }

        Ok(())
    }
}
