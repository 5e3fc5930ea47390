//! The fetcher seam between the sync core and the application's data layer.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Produces fresh data for a query.
///
/// Implementations wrap whatever transport the application uses (a REST
/// call, a database read, a computed view). The orchestrator treats the
/// fetcher as a black box: it only cares whether the call produced a value
/// or an error, and it never interprets the error beyond surfacing it.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// The data this fetcher produces.
    type Output: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Fetches fresh data for the given parameter descriptor.
    async fn fetch(&self, params: &Value) -> anyhow::Result<Self::Output>;
}

/// Scriptable fetcher for tests.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    /// A fetcher that replays a scripted queue of results.
    ///
    /// Each call pops the next scripted result; an empty queue yields
    /// `Value::Null`. A gate can be installed to hold calls open until the
    /// test releases them, which makes loading states observable.
    #[derive(Default)]
    pub struct MockFetcher {
        results: Mutex<VecDeque<Result<Value, String>>>,
        calls: AtomicUsize,
        gate: Mutex<Option<Arc<Notify>>>,
    }

    impl MockFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        /// Scripts a successful result.
        pub fn push_ok(&self, value: Value) {
            self.results.lock().unwrap().push_back(Ok(value));
        }

        /// Scripts a failed result with the given message.
        pub fn push_err(&self, message: impl Into<String>) {
            self.results.lock().unwrap().push_back(Err(message.into()));
        }

        /// Installs a gate. Every subsequent call blocks until the
        /// returned handle's `notify_one` releases it.
        pub fn gated(&self) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            *self.gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        /// Number of fetch calls so far.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for MockFetcher {
        type Output = Value;

        async fn fetch(&self, _params: &Value) -> anyhow::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }

            let next = self.results.lock().unwrap().pop_front();
            match next {
                Some(Ok(value)) => Ok(value),
                Some(Err(message)) => Err(anyhow::anyhow!(message)),
                None => Ok(Value::Null),
            }
        }
    }
}
