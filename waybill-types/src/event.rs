//! Stream event records and subscription filters.
//!
//! Events are the unit of push invalidation: the server emits one JSON
//! record per frame describing a change in some upstream domain (shipments,
//! payments, alerts, ...). Events are transient: they are relayed to
//! matching subscribers and never stored, so a consumer that misses one
//! recovers through its own staleness-driven refetch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single server-pushed event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Event type, e.g. `"alert_created"`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Originating domain, e.g. `"alerts"`.
    pub source: String,

    /// Key of the affected resource within the source domain.
    pub key: String,

    /// Domain-defined payload. The core never inspects it.
    #[serde(default)]
    pub payload: serde_json::Value,

    /// When the server emitted the event.
    pub timestamp: DateTime<Utc>,
}

impl StreamEvent {
    /// Creates a new event stamped with the current time.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        key: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            key: key.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Filter deciding which events a subscription receives.
///
/// Each dimension is optional: `None` matches every event on that
/// dimension, `Some(list)` matches events whose corresponding field is in
/// the list. The filter as a whole matches when all three dimensions match,
/// so a default filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Event types to accept, or `None` for all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,

    /// Source domains to accept, or `None` for all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,

    /// Resource keys to accept, or `None` for all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
}

impl EventFilter {
    /// Creates a filter that matches every event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the filter to the given event types.
    #[must_use]
    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Restricts the filter to the given source domains.
    #[must_use]
    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = Some(sources.into_iter().map(Into::into).collect());
        self
    }

    /// Restricts the filter to the given resource keys.
    #[must_use]
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Returns true when the event passes every dimension of the filter.
    #[must_use]
    pub fn matches(&self, event: &StreamEvent) -> bool {
        fn dimension(list: &Option<Vec<String>>, value: &str) -> bool {
            list.as_ref().map_or(true, |l| l.iter().any(|v| v == value))
        }

        dimension(&self.types, &event.event_type)
            && dimension(&self.sources, &event.source)
            && dimension(&self.keys, &event.key)
    }
}
