//! Rule engine seam for rule-routed buses.
//!
//! A `RuleEngine` compiles rule source text into a `FactSession`. The bus
//! inserts every inbound message into the session as a fact and fires the
//! rules; matching rules emit derived messages on named channels, which the
//! bus wires to translators.

pub mod definition;
pub mod jexl;

use std::path::{Path, PathBuf};

use fedbus_types::Message;
use thiserror::Error;

pub use definition::{RuleDefinition, RuleFile};
pub use jexl::{JexlRuleEngine, JexlSession};

/// Entry point inbound messages are inserted into.
pub const INBOUND_ENTRY_POINT: &str = "inbound";

/// Channel name meaning "deliver to every translator".
pub const OUTBOUND_CHANNEL: &str = "outbound";

/// Callback receiving messages a rule emits on a channel.
pub type ChannelCallback = Box<dyn Fn(Message) + Send + Sync>;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule resource '{0}' not found")]
    ResourceNotFound(String),

    #[error("cannot read rule resource '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse rule set: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid rule set: {0}")]
    Invalid(String),

    #[error("rule evaluation failed: {0}")]
    Evaluation(String),

    #[error("rule session already disposed")]
    Disposed,
}

/// A live, stateful rule session.
///
/// Not thread-safe on its own; callers serialize access.
pub trait FactSession: Send {
    /// Queue a fact on an entry point.
    fn insert(&mut self, entry_point: &str, fact: Message) -> Result<(), RuleError>;

    /// Evaluate every queued fact. Returns the number of rule activations.
    fn fire_all_rules(&mut self) -> Result<usize, RuleError>;

    /// Bind a channel name to a callback. Replaces any previous binding.
    fn register_channel(&mut self, name: &str, callback: ChannelCallback);

    /// Remove a channel binding. Returns whether one existed.
    fn unregister_channel(&mut self, name: &str) -> bool;

    /// Release the session. Further inserts fail with `RuleError::Disposed`.
    fn dispose(&mut self);
}

/// Compiles rule source text into sessions.
pub trait RuleEngine: Send + Sync {
    fn build_session(&self, source: &str) -> Result<Box<dyn FactSession>, RuleError>;
}

/// Locate a rule resource.
///
/// A relative identifier is tried under `resource_root` first, then as given
/// (relative to the working directory). An absolute identifier is used as is.
pub async fn resolve_rules_path(
    identifier: &str,
    resource_root: Option<&Path>,
) -> Result<PathBuf, RuleError> {
    let requested = Path::new(identifier);

    let mut candidates = Vec::with_capacity(2);
    if let Some(root) = resource_root.filter(|_| requested.is_relative()) {
        candidates.push(root.join(requested));
    }
    candidates.push(requested.to_path_buf());

    for candidate in candidates {
        if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return Ok(candidate);
        }
    }
    Err(RuleError::ResourceNotFound(identifier.to_string()))
}

/// Resolve and read a rule resource.
pub async fn load_rules_source(
    identifier: &str,
    resource_root: Option<&Path>,
) -> Result<String, RuleError> {
    let path = resolve_rules_path(identifier, resource_root).await?;
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| RuleError::Io { path, source })
}
