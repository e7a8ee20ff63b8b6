use std::time::Duration;

use thiserror::Error;

/// A translator failed to hand a message to its external channel.
///
/// Delivery errors are local to one translator: the bus logs them and keeps
/// delivering to everyone else.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("translator '{translator}' cannot reach '{endpoint}': {reason}")]
    Unreachable {
        translator: String,
        endpoint: String,
        reason: String,
    },

    #[error("translator '{0}' is not started")]
    NotStarted(String),

    #[error("translator '{translator}' rejected message: {reason}")]
    Rejected { translator: String, reason: String },
}

/// Errors raised while binding or starting a translator.
#[derive(Debug, Error)]
pub enum TranslatorError {
    #[error("capability '{capability}' is not present in the compound context (translator '{translator}')")]
    MissingCapability {
        translator: String,
        capability: &'static str,
    },

    #[error("translator '{0}' used before initialize()")]
    NotInitialized(String),

    #[error("translator '{0}' is already started")]
    AlreadyStarted(String),

    #[error("translator '{translator}' failed to start: {reason}")]
    StartFailed { translator: String, reason: String },
}

/// In-flight deliveries did not finish within the shutdown budget.
///
/// Reported as a warning; stopping a bus always completes.
#[derive(Debug, Error)]
#[error("{pending} deliveries still in flight after waiting {waited:?}")]
pub struct ShutdownTimeout {
    pub pending: usize,
    pub waited: Duration,
}
