//! The event-stream client and its connection loop.

use crate::error::{StreamError, StreamResult};
use crate::subscription::{EventCallback, Subscription, SubscriptionRegistry};
use futures::StreamExt;
use rand::Rng;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};
use waybill_types::{EventFilter, StreamEvent};

/// State of the underlying feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The initial request has not completed yet.
    Connecting,
    /// The feed is open and delivering events.
    Open,
    /// The connection dropped; a reconnect is scheduled or in progress.
    Retrying,
}

/// Configuration for the event-stream client.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// URL of the event feed.
    pub url: String,
    /// First reconnect delay; doubles per consecutive failure.
    pub initial_backoff: Duration,
    /// Upper bound on the reconnect delay.
    pub max_backoff: Duration,
    /// Consecutive failed reconnect attempts before giving up;
    /// `None` retries forever. The counter resets whenever the feed opens.
    pub max_retries: Option<u32>,
    /// TCP connect timeout. The stream body itself is long-lived and has
    /// no overall timeout.
    pub connect_timeout: Duration,
}

impl StreamConfig {
    /// Creates a config for the given feed URL with default timing.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_retries: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Client holding one durable event-feed connection.
///
/// Constructed explicitly and shared through an `Arc`; call
/// [`connect`](Self::connect) to start the connection loop and
/// [`dispose`](Self::dispose) to tear it down.
pub struct EventStreamClient {
    config: StreamConfig,
    http: Client,
    registry: Arc<SubscriptionRegistry>,
    state_tx: watch::Sender<ConnectionState>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventStreamClient {
    /// Creates a client for the given config. Does not connect yet.
    pub fn new(config: StreamConfig) -> StreamResult<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);

        Ok(Self {
            config,
            http,
            registry: Arc::new(SubscriptionRegistry::new()),
            state_tx,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch channel following connection-state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Registers a filtered subscription. Matching events invoke the
    /// callback synchronously, in registration order. The subscription is
    /// removed when the returned handle is dropped.
    ///
    /// Callbacks run with the registry lock held, so a callback must not
    /// subscribe or drop a [`Subscription`] itself; defer such work to a
    /// spawned task.
    pub fn subscribe(&self, filter: EventFilter, callback: EventCallback) -> Subscription {
        let id = self.registry.add(filter, callback);
        Subscription::new(id, self.registry.clone())
    }

    /// Feeds one event through the subscription fan-out as if it had
    /// arrived on the wire. Returns the number of matching subscriptions.
    /// Useful for bridging events from another transport and in tests.
    pub fn dispatch_event(&self, event: &StreamEvent) -> usize {
        self.registry.dispatch(event)
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    /// Starts the connection loop on a background task. Idempotent: a
    /// second call while the loop is running is a no-op.
    pub async fn connect(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state_tx.send_replace(ConnectionState::Connecting);

        let handle = tokio::spawn(Self::run_connection_loop(
            self.http.clone(),
            self.config.clone(),
            self.registry.clone(),
            self.state_tx.clone(),
            self.running.clone(),
        ));
        *self.task.lock().await = Some(handle);
        info!(url = %self.config.url, "event stream client connecting");
    }

    /// Stops the connection loop and drops all subscriptions.
    pub async fn dispose(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
        self.registry.clear();
        info!("event stream client disposed");
    }

    /// The connection loop: open the feed, drain it, reconnect with
    /// backoff on failure or end of stream.
    async fn run_connection_loop(
        http: Client,
        config: StreamConfig,
        registry: Arc<SubscriptionRegistry>,
        state_tx: watch::Sender<ConnectionState>,
        running: Arc<AtomicBool>,
    ) {
        let mut attempt: u32 = 0;

        while running.load(Ordering::SeqCst) {
            match Self::run_attempt(&http, &config, &registry, &state_tx, &running, &mut attempt)
                .await
            {
                Ok(()) => {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    info!("event stream ended, reconnecting");
                }
                Err(e) => warn!(error = %e, "event stream connection failed"),
            }
            if !running.load(Ordering::SeqCst) {
                break;
            }

            state_tx.send_replace(ConnectionState::Retrying);
            attempt += 1;
            if let Some(max) = config.max_retries {
                if attempt > max {
                    warn!(attempts = attempt, "event stream retries exhausted, giving up");
                    break;
                }
            }

            let delay = backoff_delay(&config, attempt);
            debug!(attempt, ?delay, "scheduling event stream reconnect");
            tokio::time::sleep(delay).await;
        }

        running.store(false, Ordering::SeqCst);
    }

    /// One connection attempt: request the feed and drain it until it ends
    /// or fails. Resets the retry counter once the feed opens.
    async fn run_attempt(
        http: &Client,
        config: &StreamConfig,
        registry: &SubscriptionRegistry,
        state_tx: &watch::Sender<ConnectionState>,
        running: &AtomicBool,
        attempt: &mut u32,
    ) -> StreamResult<()> {
        let response = http
            .get(&config.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status(status.as_u16()));
        }

        state_tx.send_replace(ConnectionState::Open);
        *attempt = 0;
        info!(url = %config.url, "event stream open");

        let mut body = response.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            if !running.load(Ordering::SeqCst) {
                return Ok(());
            }
            let chunk = chunk?;
            buf.extend_from_slice(&chunk);

            while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                match std::str::from_utf8(&line[..line.len() - 1]) {
                    Ok(frame) => Self::handle_frame(frame, registry),
                    Err(e) => warn!(error = %e, "dropping non-UTF-8 event frame"),
                }
            }
        }

        Ok(())
    }

    /// Parses one frame and relays it. A malformed frame is logged and
    /// dropped; the connection stays open.
    fn handle_frame(frame: &str, registry: &SubscriptionRegistry) {
        let frame = frame.trim();
        // Tolerate SSE framing: blank separators, comment lines, and
        // `data:` prefixes around the JSON record.
        if frame.is_empty() || frame.starts_with(':') {
            return;
        }
        let json = frame.strip_prefix("data:").map(str::trim_start).unwrap_or(frame);

        match serde_json::from_str::<StreamEvent>(json) {
            Ok(event) => {
                registry.dispatch(&event);
            }
            Err(e) => warn!(error = %e, "dropping malformed event frame"),
        }
    }
}

/// Exponential backoff with jitter: `initial * 2^(attempt-1)`, capped at
/// `max_backoff`, scaled by a random factor in `0.5..1.0`.
fn backoff_delay(config: &StreamConfig, attempt: u32) -> Duration {
    let shift = (attempt - 1).min(16);
    let exp = config.initial_backoff.saturating_mul(1u32 << shift);
    let capped = exp.min(config.max_backoff);
    capped.mul_f64(rand::thread_rng().gen_range(0.5..1.0))
}
