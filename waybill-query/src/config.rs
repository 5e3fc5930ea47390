//! Per-query configuration.

use serde_json::Value;
use tokio::time::Duration;
use waybill_cache::CachePolicy;
use waybill_types::EventFilter;

/// Configuration for one live query.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Named data domain, e.g. `"alerts"` or `"shipments"`.
    pub topic: String,
    /// Structured parameter descriptor. Together with the topic it
    /// determines the canonical cache key.
    pub params: Value,
    /// Freshness policy for this query's cache entry.
    pub policy: CachePolicy,
    /// Delay before the single retry of a failed fetch. `None` disables
    /// retrying.
    pub retry_delay: Option<Duration>,
    /// Which pushed events force a refetch. `None` leaves the query
    /// detached from the event stream.
    pub filter: Option<EventFilter>,
}

impl QueryConfig {
    /// Creates a config for a topic with no parameters, default freshness,
    /// no retry, and no event subscription.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            params: Value::Object(serde_json::Map::new()),
            policy: CachePolicy::default(),
            retry_delay: None,
            filter: None,
        }
    }

    /// Sets the parameter descriptor.
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Sets the freshness policy.
    #[must_use]
    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enables one retry of a failed fetch after the given delay.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Subscribes the query to pushed events matching the filter.
    #[must_use]
    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}
