//! In-process endpoint hub: named addresses with pub/sub delivery.
//!
//! Each address is backed by a `tokio::sync::broadcast` channel, created on
//! first use. Every consumer of an address sees every envelope sent to it
//! after it subscribed. Sending to an address nobody consumes is an error, so
//! translators can report unreachable outputs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use fedbus_core::Capability;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Buffer size for each address's broadcast channel.
const ENDPOINT_BUFFER: usize = 1024;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("no consumers on '{0}'")]
    NoConsumers(String),

    #[error("endpoint hub is closed")]
    Closed,
}

/// Wire shape of a hub message: a JSON body plus string headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub body: Value,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Envelope {
    pub fn new(body: impl Into<Value>) -> Self {
        Self {
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

struct HubInner {
    endpoints: DashMap<String, broadcast::Sender<Envelope>>,
    closed: AtomicBool,
}

/// Shared endpoint hub. Cloning shares the same addresses.
#[derive(Clone)]
pub struct EndpointHub {
    inner: Arc<HubInner>,
}

impl EndpointHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                endpoints: DashMap::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to `address`, creating it if needed.
    pub fn consumer(&self, address: &str) -> Result<broadcast::Receiver<Envelope>, HubError> {
        if self.is_closed() {
            return Err(HubError::Closed);
        }
        let sender = self
            .inner
            .endpoints
            .entry(address.to_string())
            .or_insert_with(|| broadcast::channel(ENDPOINT_BUFFER).0);
        debug!(address, "endpoint consumer added");
        Ok(sender.subscribe())
    }

    /// Deliver `envelope` to every current consumer of `address`.
    ///
    /// Returns how many consumers it reached.
    pub fn send(&self, address: &str, envelope: Envelope) -> Result<usize, HubError> {
        if self.is_closed() {
            return Err(HubError::Closed);
        }
        let sender = self
            .inner
            .endpoints
            .get(address)
            .ok_or_else(|| HubError::NoConsumers(address.to_string()))?;
        sender
            .send(envelope)
            .map_err(|_| HubError::NoConsumers(address.to_string()))
    }

    /// Live consumers on `address`.
    pub fn consumer_count(&self, address: &str) -> usize {
        self.inner
            .endpoints
            .get(address)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    /// Drop every address. Consumers see their channel close.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.endpoints.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Default for EndpointHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EndpointHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointHub")
            .field("endpoints", &self.inner.endpoints.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Context key for the shared [`EndpointHub`].
pub struct EndpointHubCapability;

impl Capability for EndpointHubCapability {
    type Resource = EndpointHub;
    const NAME: &'static str = "endpoint-hub";
}
