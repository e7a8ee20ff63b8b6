//! Translator bridging an observer registry to a federated bus.
//!
//! Outbound events are fired with [`ObserverRegistry::fire_signed`]. Every
//! bridge on the registry drops signed events, whichever translator fired
//! them, so translators sharing a registry never re-inject each other's
//! traffic.

use std::sync::{Arc, Mutex, PoisonError};

use fedbus_core::{BusHandle, CompoundContext, Translator};
use fedbus_types::{DeliveryError, Message, TranslatorError};
use serde_json::Value;
use tracing::debug;

use crate::observer::{EventObserver, ObserverId, ObserverRegistry, ObserverRegistryCapability};

pub struct ObserverTranslator {
    name: String,
    registry: Option<ObserverRegistry>,
    registration: Mutex<Option<ObserverId>>,
}

impl ObserverTranslator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: None,
            registration: Mutex::new(None),
        }
    }

    fn registration(&self) -> std::sync::MutexGuard<'_, Option<ObserverId>> {
        self.registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.registration().is_some()
    }
}

/// JSON type name of an event, used as its channel address.
fn event_kind(event: &Value) -> &'static str {
    match event {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The observer registered on behalf of a started translator.
struct BusBridge {
    translator: String,
    bus: BusHandle,
}

impl EventObserver for BusBridge {
    fn on_event(&self, event: &Value) {
        let mut message = Message::new(event.clone());
        message.set_origin(&self.translator, event_kind(event));
        self.bus.process_message(message);
    }

    fn on_signed_event(&self, _event: &Value, signer: &str) {
        debug!(translator = %self.translator, signer, "dropping already-processed event");
    }
}

impl Translator for ObserverTranslator {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn initialize(&mut self, context: &CompoundContext) -> Result<(), TranslatorError> {
        let registry = context.get::<ObserverRegistryCapability>().ok_or_else(|| {
            TranslatorError::MissingCapability {
                translator: self.name.clone(),
                capability: "observer-registry",
            }
        })?;
        self.registry = Some(registry.clone());
        Ok(())
    }

    async fn start(&self, bus: BusHandle) -> Result<(), TranslatorError> {
        let registry = self
            .registry
            .as_ref()
            .ok_or_else(|| TranslatorError::NotInitialized(self.name.clone()))?;
        let mut registration = self.registration();
        if registration.is_some() {
            return Err(TranslatorError::AlreadyStarted(self.name.clone()));
        }

        let bridge = BusBridge {
            translator: self.name.clone(),
            bus,
        };
        *registration = Some(registry.register(Arc::new(bridge)));
        debug!(translator = %self.name, "observer translator started");
        Ok(())
    }

    async fn stop(&self) {
        let id = self.registration().take();
        if let (Some(id), Some(registry)) = (id, &self.registry) {
            registry.unregister(id);
            debug!(translator = %self.name, "observer translator stopped");
        }
    }

    async fn send_message(&self, message: Message) -> Result<(), DeliveryError> {
        let registry = self
            .registry
            .as_ref()
            .ok_or_else(|| DeliveryError::NotStarted(self.name.clone()))?;

        let event = message.into_payload();
        let notified = registry.fire_signed(&event, &self.name);
        debug!(translator = %self.name, notified, "event fired");
        Ok(())
    }
}

impl std::fmt::Debug for ObserverTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverTranslator")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}
