//! Core of the federated message bus.
//!
//! Defines the translator protocol, the anti-echo signature, the compound
//! context used for dependency handoff, the bounded delivery pool, the two
//! routing policies (broadcast and rule-routed), and the embedded JEXL rule
//! engine. Concrete channel adapters live in `fedbus-infra`.

pub mod bus;
pub mod context;
pub mod pool;
pub mod rules;
pub mod signature;
pub mod translator;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bus::{BroadcastBus, BusError, BusState, FederatedBus, RuleRoutedBus};
pub use context::{Capability, CompoundContext};
pub use translator::{BusHandle, MessageSink, Translator, TranslatorHandle};
