//! Concrete channel adapters and federation assembly.
//!
//! - `hub` / `hub_translator` -- named in-process endpoints and the
//!   translator bridging them to a bus
//! - `observer` / `observer_translator` -- in-process event observers and
//!   their translator
//! - `loader` -- builds buses from a TOML descriptor

pub mod hub;
pub mod hub_translator;
pub mod loader;
pub mod observer;
pub mod observer_translator;

pub use hub::{EndpointHub, EndpointHubCapability, Envelope, HubError};
pub use hub_translator::HubTranslator;
pub use loader::{
    Federation, FederationReport, LoadError, check_federation, default_context, load_federation,
    shutdown_context,
};
pub use observer::{EventObserver, ObserverId, ObserverRegistry, ObserverRegistryCapability};
pub use observer_translator::ObserverTranslator;
