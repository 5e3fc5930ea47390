//! In-memory cache store for query results.
//!
//! Maps canonical query keys to timestamped values with staleness and
//! expiry metadata. One live entry per key; entries are overwritten (never
//! merged) on each successful fetch and evicted lazily on access once
//! expired. There is no background sweeper and nothing is persisted — the
//! cache is rebuilt from zero on process restart.
//!
//! The store is a constructed, dependency-injected service shared through
//! an `Arc`, not a process-wide global, so tests can use isolated
//! instances.

mod store;

pub use store::{CacheEntry, CachePolicy, CacheStore};
