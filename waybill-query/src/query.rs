//! The live query: stale-while-revalidate orchestration over the cache
//! store and the event stream.

use crate::config::QueryConfig;
use crate::fetcher::Fetcher;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tracing::{debug, warn};
use waybill_cache::CacheStore;
use waybill_stream::{EventStreamClient, Subscription};
use waybill_types::QueryKey;

// Lifecycle phases. Stopping is terminal: a stopped query never
// reactivates.
const IDLE: u8 = 0;
const ACTIVE: u8 = 1;
const STOPPED: u8 = 2;

/// Observable state of a live query.
///
/// `value` holds the last successfully fetched or cached data and survives
/// later fetch failures; `error` holds the most recent failure and clears
/// on the next success. `loading` is true only while no value is available
/// yet, never during a background revalidation.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    /// Last known good data, if any.
    pub value: Option<T>,
    /// True while the first value is being fetched.
    pub loading: bool,
    /// Most recent fetch error, cleared by the next success.
    pub error: Option<Arc<anyhow::Error>>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            value: None,
            loading: false,
            error: None,
        }
    }
}

/// One live query bound to a fetcher, a shared cache, and optionally the
/// event stream.
///
/// Lifecycle is explicit: [`start`](Self::start) serves the cache and
/// schedules whatever fetching is needed, [`stop`](Self::stop) detaches
/// the query from state updates and push events. Stopping is terminal;
/// a torn-down query is recreated, never restarted. Two queries
/// constructed with the same topic and semantically equal parameters
/// share one cache entry through the canonical key.
pub struct LiveQuery<F: Fetcher> {
    inner: Arc<QueryInner<F>>,
    subscription: Mutex<Option<Subscription>>,
}

struct QueryInner<F: Fetcher> {
    key: QueryKey,
    config: QueryConfig,
    fetcher: Arc<F>,
    cache: Arc<CacheStore>,
    stream: Option<Arc<EventStreamClient>>,
    state_tx: watch::Sender<QueryState<F::Output>>,
    phase: AtomicU8,
}

impl<F: Fetcher> LiveQuery<F> {
    /// Creates a query without starting it. Pass `None` for `stream` (or
    /// leave the config's filter unset) to keep the query poll-only.
    pub fn new(
        fetcher: Arc<F>,
        config: QueryConfig,
        cache: Arc<CacheStore>,
        stream: Option<Arc<EventStreamClient>>,
    ) -> Self {
        let key = QueryKey::encode(&config.topic, &config.params);
        let (state_tx, _) = watch::channel(QueryState::default());

        Self {
            inner: Arc::new(QueryInner {
                key,
                config,
                fetcher,
                cache,
                stream,
                state_tx,
                phase: AtomicU8::new(IDLE),
            }),
            subscription: Mutex::new(None),
        }
    }

    /// The canonical cache key for this query.
    pub fn key(&self) -> &QueryKey {
        &self.inner.key
    }

    /// True between `start` and `stop`.
    pub fn is_active(&self) -> bool {
        self.inner.phase.load(Ordering::SeqCst) == ACTIVE
    }

    /// Snapshot of the current query state.
    pub fn state(&self) -> QueryState<F::Output> {
        self.inner.state_tx.borrow().clone()
    }

    /// Watch channel following state transitions.
    pub fn watch(&self) -> watch::Receiver<QueryState<F::Output>> {
        self.inner.state_tx.subscribe()
    }

    /// Activates the query.
    ///
    /// A cached value is published immediately; if it is stale, a
    /// background revalidation is scheduled without touching `loading`.
    /// With no cached value the query enters its loading state and a fetch
    /// runs. If the config carries an event filter and a stream client is
    /// attached, matching push events force a refetch regardless of
    /// freshness. Has no effect when already active or already stopped.
    pub async fn start(&self) {
        if self
            .inner
            .phase
            .compare_exchange(IDLE, ACTIVE, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        match self.inner.cache.get(&self.inner.key).await {
            Some(raw) => match serde_json::from_value::<F::Output>(raw) {
                Ok(value) => {
                    let delivered = self.inner.publish(|s| {
                        s.value = Some(value);
                        s.loading = false;
                    });
                    // A stop racing this start lands here as a failed
                    // publish; the query is already torn down.
                    if !delivered {
                        return;
                    }
                    if self.inner.cache.is_stale(&self.inner.key).await {
                        debug!(key = %self.inner.key, "cached value stale, revalidating in background");
                        tokio::spawn(QueryInner::run_fetch(self.inner.clone()));
                    }
                }
                Err(e) => {
                    // An entry written by an incompatible producer. Treat
                    // it as a miss.
                    warn!(key = %self.inner.key, error = %e, "cached value failed to decode, refetching");
                    if !self.inner.publish(|s| s.loading = true) {
                        return;
                    }
                    tokio::spawn(QueryInner::run_fetch(self.inner.clone()));
                }
            },
            None => {
                if !self.inner.publish(|s| s.loading = true) {
                    return;
                }
                tokio::spawn(QueryInner::run_fetch(self.inner.clone()));
            }
        }

        if let (Some(stream), Some(filter)) = (&self.inner.stream, &self.inner.config.filter) {
            let weak: Weak<QueryInner<F>> = Arc::downgrade(&self.inner);
            let sub = stream.subscribe(
                filter.clone(),
                Box::new(move |event| {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if inner.phase.load(Ordering::SeqCst) != ACTIVE {
                        return;
                    }
                    debug!(
                        key = %inner.key,
                        event_type = %event.event_type,
                        "push event received, forcing refetch"
                    );
                    tokio::spawn(QueryInner::run_fetch(inner));
                }),
            );
            let mut slot = self.lock_subscription();
            if self.inner.phase.load(Ordering::SeqCst) == ACTIVE {
                *slot = Some(sub);
            }
            // Otherwise a stop won the race; dropping `sub` unsubscribes.
        }
    }

    /// Forces a fetch now, skipping the cache read, and waits for it to
    /// settle. The result is written to the cache as usual.
    pub async fn refresh(&self) {
        QueryInner::run_fetch(self.inner.clone()).await;
    }

    /// Deactivates the query: drops its event subscription and stops
    /// publishing state. An in-flight fetch still completes into the
    /// cache, but its result is not delivered to this query's state.
    /// Terminal: once stopped the query never reactivates, and no state
    /// update can be observed after this call returns.
    pub fn stop(&self) {
        // The phase flip rides the state channel's internal lock so it
        // serializes with every publish.
        self.inner.state_tx.send_if_modified(|_| {
            self.inner.phase.store(STOPPED, Ordering::SeqCst);
            false
        });
        if let Some(sub) = self.lock_subscription().take() {
            sub.unsubscribe();
        }
    }

    fn lock_subscription(&self) -> std::sync::MutexGuard<'_, Option<Subscription>> {
        self.subscription.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<F: Fetcher> QueryInner<F> {
    /// Applies a state mutation unless the query has stopped. Returns
    /// whether the update was delivered. Checking the phase inside the
    /// channel's modify closure serializes the check with `stop`, so a
    /// completed `stop` is never followed by an observable update.
    fn publish(&self, mutate: impl FnOnce(&mut QueryState<F::Output>)) -> bool {
        self.state_tx.send_if_modified(|s| {
            if self.phase.load(Ordering::SeqCst) != ACTIVE {
                return false;
            }
            mutate(s);
            true
        })
    }

    /// One fetch cycle: call the fetcher, write the result through to the
    /// cache, publish it if the query is still live. A failure keeps the
    /// last known value and surfaces the error; with a retry delay
    /// configured the fetch is retried once before the error is published.
    async fn run_fetch(inner: Arc<Self>) {
        let mut retried = false;

        loop {
            match inner.fetcher.fetch(&inner.config.params).await {
                Ok(output) => {
                    match serde_json::to_value(&output) {
                        Ok(raw) => {
                            // Written even when the query stopped while the
                            // fetch was in flight: the next reader of this
                            // key still benefits.
                            inner
                                .cache
                                .set(inner.key.clone(), raw, &inner.config.policy)
                                .await;
                        }
                        Err(e) => {
                            warn!(key = %inner.key, error = %e, "fetched value failed to encode for caching");
                        }
                    }

                    let delivered = inner.publish(|s| {
                        s.value = Some(output);
                        s.error = None;
                        s.loading = false;
                    });
                    if !delivered {
                        debug!(key = %inner.key, "dropping fetch result for stopped query");
                    }
                    return;
                }
                Err(e) => {
                    warn!(key = %inner.key, error = %e, "fetch failed");

                    if let Some(delay) = inner.config.retry_delay {
                        if !retried && inner.phase.load(Ordering::SeqCst) == ACTIVE {
                            retried = true;
                            debug!(key = %inner.key, ?delay, "retrying fetch");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }

                    inner.publish(|s| {
                        s.error = Some(Arc::new(e));
                        s.loading = false;
                    });
                    return;
                }
            }
        }
    }
}
