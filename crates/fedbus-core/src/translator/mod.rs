//! Translator protocol: the adapter between one external channel and the bus.
//!
//! - `Translator` -- the capability a channel adapter implements
//! - `TranslatorHandle` -- type-erased, cloneable handle the bus holds
//! - `MessageSink` / `BusHandle` -- the narrow view of the bus a translator
//!   gets at `start`

mod handle;

use std::sync::{Arc, Weak};

use fedbus_types::{DeliveryError, Message, TranslatorError};

use crate::context::CompoundContext;

pub use handle::{TranslatorDyn, TranslatorHandle};

/// Trait for channel adapters attached to a federated bus.
///
/// Uses native async fn in traits (RPITIT) for the channel-facing operations;
/// the bus stores translators behind [`TranslatorHandle`].
///
/// Lifecycle: `initialize` (once, at registration) -> `start` -> `stop`.
pub trait Translator: Send + Sync + 'static {
    /// Routing key. Unique within one bus.
    fn name(&self) -> &str;

    /// Rename the translator. Only possible before registration: the bus
    /// keeps a type-erased handle that exposes `name()` alone.
    fn set_name(&mut self, name: String);

    /// Bind long-lived external resources drawn from the context.
    ///
    /// Called exactly once by the bus when the translator is registered.
    fn initialize(&mut self, context: &CompoundContext) -> Result<(), TranslatorError> {
        let _ = context;
        Ok(())
    }

    /// Record the owning bus and begin consuming from input endpoints.
    ///
    /// Must not block: consumption runs on translator-owned tasks.
    fn start(
        &self,
        bus: BusHandle,
    ) -> impl std::future::Future<Output = Result<(), TranslatorError>> + Send;

    /// Cease consumption. Calling it twice is harmless.
    fn stop(&self) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }

    /// Deliver a message to this translator's output endpoint(s), tagging it
    /// with the anti-echo signature.
    fn send_message(
        &self,
        message: Message,
    ) -> impl std::future::Future<Output = Result<(), DeliveryError>> + Send;
}

/// The inbound side of a bus, as seen by translators.
pub trait MessageSink: Send + Sync {
    /// Hand a freshly received message to the bus for routing.
    ///
    /// Never blocks on delivery and never fails for routing reasons.
    fn process_message(&self, message: Message);
}

/// Back-reference from a translator to its owning bus.
///
/// Holds the bus weakly so a translator never keeps a stopped bus alive.
#[derive(Clone)]
pub struct BusHandle {
    bus_name: Arc<str>,
    sink: Weak<dyn MessageSink>,
}

impl BusHandle {
    pub fn new(bus_name: impl Into<Arc<str>>, sink: &Arc<dyn MessageSink>) -> Self {
        Self {
            bus_name: bus_name.into(),
            sink: Arc::downgrade(sink),
        }
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    /// Forward a message to the bus.
    ///
    /// Returns `false` if the bus has already been dropped; the message is
    /// discarded in that case.
    pub fn process_message(&self, message: Message) -> bool {
        match self.sink.upgrade() {
            Some(sink) => {
                sink.process_message(message);
                true
            }
            None => {
                tracing::debug!(
                    bus = %self.bus_name,
                    message_id = %message.id(),
                    "bus is gone, discarding inbound message"
                );
                false
            }
        }
    }

    /// Whether the owning bus still exists.
    pub fn is_attached(&self) -> bool {
        self.sink.strong_count() > 0
    }
}

impl std::fmt::Debug for BusHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusHandle")
            .field("bus", &self.bus_name)
            .field("attached", &self.is_attached())
            .finish()
    }
}
