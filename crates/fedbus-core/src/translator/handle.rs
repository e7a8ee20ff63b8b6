//! TranslatorHandle -- object-safe dynamic dispatch wrapper for Translator.
//!
//! 1. `TranslatorDyn` is an object-safe mirror of `Translator` with boxed futures
//! 2. Blanket impl of `TranslatorDyn` for every `T: Translator`
//! 3. `TranslatorHandle` wraps `Arc<dyn TranslatorDyn>` so delivery tasks can
//!    hold their own reference

use std::sync::Arc;

use fedbus_types::{DeliveryError, Message, TranslatorError};

use futures_util::future::BoxFuture;

use super::{BusHandle, Translator};

/// Object-safe version of [`Translator`] with boxed futures.
///
/// Only the operations the bus needs after registration are exposed;
/// `initialize` and `set_name` are called on the concrete type beforehand.
pub trait TranslatorDyn: Send + Sync {
    fn name(&self) -> &str;

    fn start_boxed(
        &self,
        bus: BusHandle,
    ) -> BoxFuture<'_, Result<(), TranslatorError>>;

    fn stop_boxed(&self) -> BoxFuture<'_, ()>;

    fn send_message_boxed(
        &self,
        message: Message,
    ) -> BoxFuture<'_, Result<(), DeliveryError>>;
}

impl<T: Translator> TranslatorDyn for T {
    fn name(&self) -> &str {
        Translator::name(self)
    }

    fn start_boxed(
        &self,
        bus: BusHandle,
    ) -> BoxFuture<'_, Result<(), TranslatorError>> {
        Box::pin(self.start(bus))
    }

    fn stop_boxed(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.stop())
    }

    fn send_message_boxed(
        &self,
        message: Message,
    ) -> BoxFuture<'_, Result<(), DeliveryError>> {
        Box::pin(self.send_message(message))
    }
}

/// Type-erased, cloneable translator as held by a bus.
///
/// Cloning shares the same underlying translator.
#[derive(Clone)]
pub struct TranslatorHandle {
    inner: Arc<dyn TranslatorDyn>,
}

impl TranslatorHandle {
    pub fn new<T: Translator>(translator: T) -> Self {
        Self {
            inner: Arc::new(translator),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn start(&self, bus: BusHandle) -> Result<(), TranslatorError> {
        self.inner.start_boxed(bus).await
    }

    pub async fn stop(&self) {
        self.inner.stop_boxed().await
    }

    pub async fn send_message(&self, message: Message) -> Result<(), DeliveryError> {
        self.inner.send_message_boxed(message).await
    }
}

impl std::fmt::Debug for TranslatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslatorHandle")
            .field("name", &self.name())
            .finish()
    }
}
