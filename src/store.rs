//! Key/value document storage.
//!
//! Documents are addressed by `(kind, key)` and stored as JSON. Writes are
//! unconditional overwrites; there are no transactions across documents.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::info;

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// `Ok(None)` when nothing is stored under the key.
    async fn get(&self, kind: &str, key: &str) -> Result<Option<Value>>;
    async fn put(&self, kind: &str, key: &str, doc: Value) -> Result<()>;
    /// Removing a missing document is not an error.
    async fn delete(&self, kind: &str, key: &str) -> Result<()>;
}

// ── PostgreSQL ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;

        info!("Database migrations complete");

        Ok(Self { pool })
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn get(&self, kind: &str, key: &str) -> Result<Option<Value>> {
        let body: Option<String> =
            sqlx::query_scalar("SELECT body FROM documents WHERE kind = $1 AND key = $2")
                .bind(kind)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        body.map(|b| serde_json::from_str(&b).with_context(|| format!("corrupt {kind}/{key}")))
            .transpose()
    }

    async fn put(&self, kind: &str, key: &str, doc: Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO documents (kind, key, body, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (kind, key) DO UPDATE SET body = $3, updated_at = now()",
        )
        .bind(kind)
        .bind(key)
        .bind(doc.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, kind: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE kind = $1 AND key = $2")
            .bind(kind)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ── In-memory ───────────────────────────────────────────────────────────────

/// Process-local store. Used when no `DATABASE_URL` is configured, and in tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    docs: Arc<RwLock<HashMap<(String, String), Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, kind: &str, key: &str) -> Result<Option<Value>> {
        let docs = self.docs.read().await;
        Ok(docs.get(&(kind.to_string(), key.to_string())).cloned())
    }

    async fn put(&self, kind: &str, key: &str, doc: Value) -> Result<()> {
        self.docs
            .write()
            .await
            .insert((kind.to_string(), key.to_string()), doc);
        Ok(())
    }

    async fn delete(&self, kind: &str, key: &str) -> Result<()> {
        self.docs
            .write()
            .await
            .remove(&(kind.to_string(), key.to_string()));
        Ok(())
    }
}
