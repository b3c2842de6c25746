//! In-memory connection for tests.
//!
//! `MockConnection` answers requests from scripted responders, records every
//! request it receives and lets the test push messages as if the server had
//! emitted them.

use crate::connection::{Connection, InboundMessage};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

type Responder = Box<dyn Fn(Option<&Value>) -> Value + Send + Sync>;

/// A request as seen by the mock server.
#[derive(Debug, Clone, PartialEq)]
pub struct SentRequest {
    pub event: String,
    pub payload: Option<Value>,
}

pub struct MockConnection {
    id: String,
    responders: Mutex<HashMap<String, Responder>>,
    delays: Mutex<HashMap<String, Duration>>,
    requests: Mutex<Vec<SentRequest>>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<InboundMessage>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnection")
            .field("id", &self.id)
            .field("requests", &lock(&self.requests).len())
            .finish_non_exhaustive()
    }
}

impl MockConnection {
    /// A connection that acknowledges every event with `{"error": false}`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            id: id.into(),
            responders: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            closed: AtomicBool::new(false),
        }
    }

    /// A connection whose `info` reply advertises the given version and datasets.
    #[must_use]
    pub fn with_server_info(id: impl Into<String>, version: &str, datasets: &[&str]) -> Self {
        let mock = Self::new(id);
        mock.respond_with("info", json!({"error": false, "data": {"serverVersion": version, "datasets": datasets}}));
        mock
    }

    /// Always answer `event` with `response`.
    pub fn respond_with(&self, event: &str, response: Value) {
        self.respond(event, move |_| response.clone());
    }

    /// Answer `event` with whatever `responder` builds from the request payload.
    pub fn respond<F>(&self, event: &str, responder: F)
    where
        F: Fn(Option<&Value>) -> Value + Send + Sync + 'static,
    {
        lock(&self.responders).insert(event.to_string(), Box::new(responder));
    }

    /// Wait `delay` before answering `event`.
    pub fn delay(&self, event: &str, delay: Duration) {
        lock(&self.delays).insert(event.to_string(), delay);
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<SentRequest> {
        lock(&self.requests).clone()
    }

    pub fn requests_for(&self, event: &str) -> Vec<SentRequest> {
        lock(&self.requests).iter().filter(|r| r.event == event).cloned().collect()
    }

    /// Emit a message as the server would.
    pub fn push(&self, topic: impl Into<String>, payload: impl Into<String>) {
        let message = InboundMessage { topic: topic.into(), payload: payload.into() };
        let sent = lock(&self.inbound_tx).as_ref().is_some_and(|tx| tx.send(message).is_ok());
        if !sent {
            debug!(connection_id = %self.id, "Inbound stream dropped, message discarded");
        }
    }

    /// Ends the pushed-message stream, as a server hanging up would.
    pub fn disconnect(&self) {
        lock(&self.inbound_tx).take();
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn request(&self, event: &str, payload: Option<Value>) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Connection("connection is closed".to_string()));
        }

        lock(&self.requests).push(SentRequest { event: event.to_string(), payload: payload.clone() });

        let delay = lock(&self.delays).get(event).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let responders = lock(&self.responders);
        Ok(match responders.get(event) {
            Some(responder) => responder(payload.as_ref()),
            None => json!({"error": false}),
        })
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        lock(&self.inbound_rx).take()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
