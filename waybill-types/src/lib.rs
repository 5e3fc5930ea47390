//! Core type definitions for Waybill.
//!
//! This crate defines the fundamental, domain-agnostic types used by the
//! data-synchronization core:
//! - Server-pushed stream event records and subscription filters
//! - The canonical query-key codec
//!
//! Domain-specific payload schemas (shipments, payments, alerts, risk)
//! belong to the data-access layer built on top of the core, not here.

mod event;
mod key;

pub use event::{EventFilter, StreamEvent};
pub use key::QueryKey;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
