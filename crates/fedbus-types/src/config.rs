//! Typed assembly descriptors for federated buses.
//!
//! A `FederationConfig` is the deserialized form of a federation descriptor
//! (TOML). Each bus and each translator kind has its own typed struct, so the
//! loader never binds properties by name at runtime.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing or validating a descriptor.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot parse federation descriptor: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid federation descriptor: {0}")]
    Invalid(String),
}

/// Top-level federation descriptor: one or more buses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FederationConfig {
    #[serde(default, rename = "bus")]
    pub buses: Vec<BusConfig>,
}

impl FederationConfig {
    /// Parse a descriptor from TOML text. Does not validate.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Check structural constraints.
    ///
    /// Returns non-fatal warnings on success (e.g. a hub translator without
    /// any endpoints), or the first hard violation.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        if self.buses.is_empty() {
            return Err(ConfigError::Invalid(
                "descriptor declares no buses".to_string(),
            ));
        }

        let mut warnings = Vec::new();
        let mut bus_names = HashSet::new();

        for bus in &self.buses {
            if bus.name.trim().is_empty() {
                return Err(ConfigError::Invalid("bus name must not be empty".to_string()));
            }
            if !bus_names.insert(bus.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate bus name '{}'",
                    bus.name
                )));
            }
            if bus.pool.workers == 0 {
                return Err(ConfigError::Invalid(format!(
                    "bus '{}': pool.workers must be at least 1",
                    bus.name
                )));
            }
            if let RoutingConfig::Rules { rules } = &bus.routing {
                if rules.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "bus '{}': rules resource must not be empty",
                        bus.name
                    )));
                }
            }

            let mut translator_names = HashSet::new();
            for translator in &bus.translators {
                let name = translator.name();
                if name.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "bus '{}': translator name must not be empty",
                        bus.name
                    )));
                }
                if !translator_names.insert(name) {
                    return Err(ConfigError::Invalid(format!(
                        "bus '{}': duplicate translator name '{name}'",
                        bus.name
                    )));
                }
                if let TranslatorConfig::Hub(hub) = translator {
                    if hub.inputs.is_empty() && hub.outputs.is_empty() {
                        warnings.push(format!(
                            "bus '{}': hub translator '{name}' has no input or output endpoints",
                            bus.name
                        ));
                    }
                }
            }
        }

        Ok(warnings)
    }
}

/// One bus: routing strategy, delivery pool, translators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub name: String,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default, rename = "translator")]
    pub translators: Vec<TranslatorConfig>,
}

/// Routing strategy for a bus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoutingConfig {
    /// Every inbound message goes to every translator.
    #[default]
    Broadcast,
    /// Routing decided by a rule set.
    Rules {
        /// Rule resource identifier: a file path, absolute or relative to the
        /// descriptor's directory.
        rules: String,
    },
}

/// Delivery pool sizing and shutdown budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum concurrent deliveries.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// How long `stop()` waits for in-flight deliveries.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_workers() -> usize {
    10
}

fn default_shutdown_timeout_ms() -> u64 {
    10_000
}

impl PoolConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

/// A translator entry, tagged by adapter kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranslatorConfig {
    /// Endpoint-hub adapter (named in-process addresses).
    Hub(HubTranslatorConfig),
    /// Observer-registry adapter (in-process event observers).
    Observer(ObserverTranslatorConfig),
}

impl TranslatorConfig {
    pub fn name(&self) -> &str {
        match self {
            TranslatorConfig::Hub(c) => &c.name,
            TranslatorConfig::Observer(c) => &c.name,
        }
    }

    /// Adapter kind as written in the descriptor.
    pub fn kind(&self) -> &'static str {
        match self {
            TranslatorConfig::Hub(_) => "hub",
            TranslatorConfig::Observer(_) => "observer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubTranslatorConfig {
    pub name: String,
    /// Addresses consumed from the hub.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Addresses published to on delivery.
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverTranslatorConfig {
    pub name: String,
}
