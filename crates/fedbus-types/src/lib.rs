//! Shared domain types for the federated message bus.
//!
//! This crate contains the types exchanged between the bus and its
//! translators: the `Message` envelope, the reserved header names, the
//! shared error taxonomy, and the typed assembly descriptors.
//!
//! Zero runtime dependencies -- only serde, uuid, thiserror, toml.

pub mod config;
pub mod error;
pub mod message;

pub use error::{DeliveryError, ShutdownTimeout, TranslatorError};
pub use message::{Headers, Message, Properties};
