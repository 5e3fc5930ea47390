use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use waybill_stream::{ConnectionState, EventStreamClient, StreamConfig};
use waybill_types::{EventFilter, StreamEvent};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn event(event_type: &str, source: &str, key: &str) -> StreamEvent {
    StreamEvent::new(event_type, source, key, json!({}))
}

fn test_config(url: String) -> StreamConfig {
    StreamConfig {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        ..StreamConfig::new(url)
    }
}

// ── Config ───────────────────────────────────────────────────────

#[test]
fn config_defaults() {
    let cfg = StreamConfig::new("http://example.test/events");
    assert_eq!(cfg.url, "http://example.test/events");
    assert_eq!(cfg.initial_backoff, Duration::from_millis(500));
    assert_eq!(cfg.max_backoff, Duration::from_secs(30));
    assert_eq!(cfg.max_retries, None);
    assert_eq!(cfg.connect_timeout, Duration::from_secs(10));
}

#[test]
fn client_starts_in_connecting_state() {
    let client = EventStreamClient::new(StreamConfig::new("http://example.test")).unwrap();
    assert_eq!(client.state(), ConnectionState::Connecting);
}

// ── Fan-out (no network) ─────────────────────────────────────────

#[tokio::test]
async fn matching_subscription_fires_exactly_once() {
    let client = EventStreamClient::new(StreamConfig::new("http://example.test")).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    let _sub = client.subscribe(
        EventFilter::new()
            .with_types(["payment_state_changed"])
            .with_sources(["payments"]),
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let matched = client.dispatch_event(&event("payment_state_changed", "payments", "p-1"));
    assert_eq!(matched, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn non_matching_subscription_never_fires() {
    let client = EventStreamClient::new(StreamConfig::new("http://example.test")).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    let _sub = client.subscribe(
        EventFilter::new().with_types(["alert_created"]),
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let matched = client.dispatch_event(&event("payment_state_changed", "payments", "p-1"));
    assert_eq!(matched, 0);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn callbacks_run_in_registration_order() {
    let client = EventStreamClient::new(StreamConfig::new("http://example.test")).unwrap();
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let first = order.clone();
    let _a = client.subscribe(
        EventFilter::default(),
        Box::new(move |_| first.lock().unwrap().push("first")),
    );
    let second = order.clone();
    let _b = client.subscribe(
        EventFilter::default(),
        Box::new(move |_| second.lock().unwrap().push("second")),
    );

    client.dispatch_event(&event("alert_created", "alerts", "a-1"));
    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
}

#[tokio::test]
async fn dropping_the_handle_unsubscribes() {
    let client = EventStreamClient::new(StreamConfig::new("http://example.test")).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    let sub = client.subscribe(
        EventFilter::default(),
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    assert_eq!(client.subscription_count(), 1);

    drop(sub);
    assert_eq!(client.subscription_count(), 0);
    assert_eq!(client.dispatch_event(&event("alert_created", "alerts", "a-1")), 0);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn explicit_unsubscribe_removes_subscription() {
    let client = EventStreamClient::new(StreamConfig::new("http://example.test")).unwrap();
    let sub = client.subscribe(EventFilter::default(), Box::new(|_| {}));
    sub.unsubscribe();
    assert_eq!(client.subscription_count(), 0);
}

// ── Wire delivery ────────────────────────────────────────────────

#[tokio::test]
async fn delivers_events_from_the_wire() {
    let server = MockServer::start().await;

    let e1 = serde_json::to_string(&event("alert_created", "alerts", "a-1")).unwrap();
    let e2 = serde_json::to_string(&event("alert_updated", "alerts", "a-2")).unwrap();
    let e3 = serde_json::to_string(&event("payment_state_changed", "payments", "p-1")).unwrap();
    // Mixed framing: plain NDJSON, a comment line, a data:-prefixed
    // record, and one malformed frame that must be dropped silently.
    let body = format!("{e1}\n: keepalive\n{e2}\nnot-json\ndata: {e3}\n");

    Mock::given(method("GET"))
        .and(path("/events"))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let mut config = test_config(format!("{}/events", server.uri()));
    config.max_retries = Some(0); // one pass, no replay
    let client = EventStreamClient::new(config).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = client.subscribe(
        EventFilter::default(),
        Box::new(move |ev| {
            let _ = tx.send(ev.clone());
        }),
    );
    client.connect().await;

    let mut received = Vec::new();
    for _ in 0..3 {
        let ev = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed");
        received.push(ev);
    }

    assert_eq!(received[0].event_type, "alert_created");
    assert_eq!(received[1].event_type, "alert_updated");
    assert_eq!(received[2].event_type, "payment_state_changed");
    assert_eq!(received[2].source, "payments");

    // The malformed frame was dropped without closing the stream (the
    // data:-prefixed event after it still arrived) and produced no event.
    assert!(rx.try_recv().is_err());

    client.dispose().await;
}

#[tokio::test]
async fn only_matching_subscribers_see_wire_events() {
    let server = MockServer::start().await;
    let e1 = serde_json::to_string(&event("payment_state_changed", "payments", "p-1")).unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(format!("{e1}\n"), "text/event-stream"))
        .mount(&server)
        .await;

    let mut config = test_config(server.uri());
    config.max_retries = Some(0);
    let client = EventStreamClient::new(config).unwrap();

    let (payments_tx, mut payments_rx) = mpsc::unbounded_channel();
    let _payments = client.subscribe(
        EventFilter::new()
            .with_types(["payment_state_changed"])
            .with_sources(["payments"]),
        Box::new(move |ev| {
            let _ = payments_tx.send(ev.clone());
        }),
    );

    let alert_hits = Arc::new(AtomicUsize::new(0));
    let counter = alert_hits.clone();
    let _alerts = client.subscribe(
        EventFilter::new().with_types(["alert_created"]),
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    client.connect().await;

    let ev = timeout(Duration::from_secs(2), payments_rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed");
    assert_eq!(ev.key, "p-1");
    assert_eq!(alert_hits.load(Ordering::SeqCst), 0);

    client.dispose().await;
}

// ── Reconnection ─────────────────────────────────────────────────

#[tokio::test]
async fn reconnects_after_stream_end() {
    let server = MockServer::start().await;
    let e1 = serde_json::to_string(&event("alert_created", "alerts", "a-1")).unwrap();

    // The mock serves the same finite body on every request; receiving the
    // event more than once proves a reconnect happened.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(format!("{e1}\n"), "text/event-stream"))
        .mount(&server)
        .await;

    let client = EventStreamClient::new(test_config(server.uri())).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = client.subscribe(
        EventFilter::default(),
        Box::new(move |ev| {
            let _ = tx.send(ev.clone());
        }),
    );
    client.connect().await;

    for _ in 0..2 {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for reconnect delivery")
            .expect("channel closed");
    }

    client.dispose().await;
}

#[tokio::test]
async fn gives_up_after_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut config = test_config(server.uri());
    config.max_retries = Some(2);
    let client = EventStreamClient::new(config).unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let _sub = client.subscribe(
        EventFilter::default(),
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    client.connect().await;

    // Give the loop time to exhaust its attempts.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.state(), ConnectionState::Retrying);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    client.dispose().await;
}

#[tokio::test]
async fn state_transitions_to_retrying_after_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = EventStreamClient::new(test_config(server.uri())).unwrap();
    let mut state_rx = client.state_changes();
    client.connect().await;

    let reached = timeout(
        Duration::from_secs(2),
        state_rx.wait_for(|s| *s == ConnectionState::Retrying),
    )
    .await;
    assert!(reached.is_ok(), "never reached Retrying");

    client.dispose().await;
}

#[tokio::test]
async fn connect_is_idempotent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("\n", "text/event-stream"))
        .mount(&server)
        .await;

    let client = EventStreamClient::new(test_config(server.uri())).unwrap();
    client.connect().await;
    client.connect().await; // no second loop, no panic
    client.dispose().await;
}
