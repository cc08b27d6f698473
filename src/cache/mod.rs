//! Result cache keyed by `(word, era)`, with Postgres and in-memory backends.

pub mod postgres;
pub mod store;

pub use postgres::PgCacheStore;
pub use store::{CacheEntry, CacheKey, CacheStore, MemoryCacheStore};

#[cfg(test)]
pub use store::MockCacheStore;
