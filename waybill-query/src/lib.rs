//! Live query orchestration.
//!
//! Ties the other Waybill crates together: a [`LiveQuery`] serves cached
//! data immediately, revalidates stale entries in the background, refetches
//! when the event stream pushes a matching invalidation, and degrades to
//! last-known-good data when a fetch fails.

mod config;
pub mod fetcher;
mod query;

pub use config::QueryConfig;
pub use fetcher::Fetcher;
pub use query::{LiveQuery, QueryState};
