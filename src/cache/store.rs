//! Cache store contract and the in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::error::Result;
use crate::etymology::{effective_era, EtymologyResult};

/// Composite cache key `(word, era)`.
///
/// Both parts are trimmed and lower-cased; a blank era becomes the default
/// era first. Reads and writes build keys through [`CacheKey::new`] only, so
/// `"Gay" / "victorian era "` and `"gay" / "Victorian Era"` share one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    word: String,
    era: String,
}

impl CacheKey {
    pub fn new(word: &str, era: &str) -> Self {
        Self {
            word: word.trim().to_lowercase(),
            era: effective_era(era).to_lowercase(),
        }
    }

    pub fn word(&self) -> &str {
        &self.word
    }

    pub fn era(&self) -> &str {
        &self.era
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.word, self.era)
    }
}

/// A stored result with its last write time.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub content: EtymologyResult,
    pub created_at: DateTime<Utc>,
}

/// Keyed lookup and upsert of generated results.
///
/// `lookup` returns `Ok(None)` for a plain miss and `Err` only for genuine
/// store failures; callers treat both as a miss. `upsert` replaces any
/// existing row for the key atomically, last writer wins. Entries never
/// expire.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<EtymologyResult>>;

    async fn upsert(&self, key: &CacheKey, result: &EtymologyResult) -> Result<()>;

    /// Number of stored entries.
    async fn count(&self) -> Result<u64>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Process-local cache store.
///
/// Used when no database is configured. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the stored entry including its timestamp.
    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<EtymologyResult>> {
        Ok(self.entries.get(key).map(|e| e.content.clone()))
    }

    async fn upsert(&self, key: &CacheKey, result: &EtymologyResult) -> Result<()> {
        debug!(key = %key, "Upserting cached etymology");
        self.entries.insert(
            key.clone(),
            CacheEntry {
                content: result.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.entries.len() as u64)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
