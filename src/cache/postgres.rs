//! Postgres-backed cache store.
//!
//! One row per normalized `(word, era)` in `cached_etymologies`; the
//! composite primary key makes `ON CONFLICT` upserts atomic per key, so
//! concurrent writers for the same pair leave exactly one row.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, info};

use super::store::{CacheKey, CacheStore};
use crate::error::{EtymologyError, Result};
use crate::etymology::EtymologyResult;

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS cached_etymologies (
    word       TEXT        NOT NULL,
    era        TEXT        NOT NULL,
    content    JSONB       NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (word, era)
)
"#;

const LOOKUP_SQL: &str = "SELECT content FROM cached_etymologies WHERE word = $1 AND era = $2";

const UPSERT_SQL: &str = r#"
INSERT INTO cached_etymologies (word, era, content, created_at)
VALUES ($1, $2, $3, now())
ON CONFLICT (word, era)
DO UPDATE SET content = EXCLUDED.content, created_at = now()
"#;

const COUNT_SQL: &str = "SELECT COUNT(*) FROM cached_etymologies";

/// Cache store over a Postgres connection pool.
#[derive(Clone)]
pub struct PgCacheStore {
    pool: PgPool,
}

impl PgCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a small pool against `database_url`.
    ///
    /// The pool connects lazily so a database outage at startup degrades to
    /// cache misses instead of preventing the service from starting.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    /// Create the cache table if it does not exist.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        info!("cached_etymologies table ready");
        Ok(())
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<EtymologyResult>> {
        let row: Option<(Value,)> = sqlx::query_as(LOOKUP_SQL)
            .bind(key.word())
            .bind(key.era())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            None => Ok(None),
            Some((content,)) => {
                // Rows written by older schema versions surface as errors, i.e. misses.
                let result = EtymologyResult::from_value(content).map_err(|e| {
                    EtymologyError::Cache(format!("stored row for {} is invalid: {}", key, e))
                })?;
                Ok(Some(result))
            }
        }
    }

    async fn upsert(&self, key: &CacheKey, result: &EtymologyResult) -> Result<()> {
        let content = serde_json::to_value(result)?;
        sqlx::query(UPSERT_SQL)
            .bind(key.word())
            .bind(key.era())
            .bind(content)
            .execute(&self.pool)
            .await?;
        debug!(key = %key, "Upserted cached etymology");
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(COUNT_SQL).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
