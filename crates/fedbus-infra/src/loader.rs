//! Federation assembly from a TOML descriptor.
//!
//! Reads the descriptor, validates it, then builds one `FederatedBus<Routing>`
//! per `[[bus]]` entry and registers (and so initializes) its translators
//! against the shared compound context. Starting the buses is left to the
//! caller, through [`Federation::start`].

use std::path::{Path, PathBuf};

use fedbus_core::bus::{BroadcastPolicy, BusError, FederatedBus, RuleEnginePolicy, Routing};
use fedbus_core::rules::{JexlSession, RuleError, load_rules_source};
use fedbus_core::CompoundContext;
use fedbus_types::config::{BusConfig, ConfigError, FederationConfig, RoutingConfig, TranslatorConfig};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::hub::{EndpointHub, EndpointHubCapability};
use crate::hub_translator::HubTranslator;
use crate::observer::{ObserverRegistry, ObserverRegistryCapability};
use crate::observer_translator::ObserverTranslator;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read federation descriptor '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("bus '{bus}': {source}")]
    Bus {
        bus: String,
        #[source]
        source: BusError,
    },

    #[error("bus '{bus}': {source}")]
    Rules {
        bus: String,
        #[source]
        source: RuleError,
    },
}

/// Every bus declared by one descriptor.
#[derive(Debug)]
pub struct Federation {
    buses: Vec<FederatedBus<Routing>>,
}

impl Federation {
    pub fn buses(&self) -> &[FederatedBus<Routing>] {
        &self.buses
    }

    pub fn bus(&self, name: &str) -> Option<&FederatedBus<Routing>> {
        self.buses.iter().find(|b| b.name() == name)
    }

    /// Start every bus in declaration order.
    ///
    /// If one fails, the buses already started are stopped again.
    pub async fn start(&self) -> Result<(), LoadError> {
        for (idx, bus) in self.buses.iter().enumerate() {
            if let Err(source) = bus.start().await {
                for started in self.buses[..idx].iter().rev() {
                    started.stop().await;
                }
                return Err(LoadError::Bus {
                    bus: bus.name().to_string(),
                    source,
                });
            }
        }
        Ok(())
    }

    /// Stop every bus in reverse declaration order.
    pub async fn stop(&self) {
        for bus in self.buses.iter().rev() {
            bus.stop().await;
        }
    }
}

async fn read_descriptor(path: &Path) -> Result<FederationConfig, LoadError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let config = FederationConfig::from_toml_str(&content)?;
    for warning in config.validate()? {
        warn!(descriptor = %path.display(), "{warning}");
    }
    Ok(config)
}

/// Read, validate and assemble the descriptor at `path`.
///
/// Relative rule paths resolve against the descriptor's directory.
pub async fn load_federation(path: &Path, context: &CompoundContext) -> Result<Federation, LoadError> {
    let config = read_descriptor(path).await?;
    let federation = build_federation(&config, path.parent(), context)?;
    info!(
        descriptor = %path.display(),
        buses = federation.buses.len(),
        "federation loaded"
    );
    Ok(federation)
}

/// Assemble buses from an already validated descriptor.
pub fn build_federation(
    config: &FederationConfig,
    resource_root: Option<&Path>,
    context: &CompoundContext,
) -> Result<Federation, LoadError> {
    let buses = config
        .buses
        .iter()
        .map(|bus| build_bus(bus, resource_root, context))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Federation { buses })
}

fn build_bus(
    config: &BusConfig,
    resource_root: Option<&Path>,
    context: &CompoundContext,
) -> Result<FederatedBus<Routing>, LoadError> {
    let routing = match &config.routing {
        RoutingConfig::Broadcast => Routing::from(BroadcastPolicy),
        RoutingConfig::Rules { rules } => {
            let mut policy = RuleEnginePolicy::new(rules.clone());
            if let Some(root) = resource_root {
                policy = policy.with_resource_root(root);
            }
            Routing::from(policy)
        }
    };

    let mut bus = FederatedBus::new(config.name.as_str(), routing, context.clone())
        .with_pool_config(config.pool.clone());

    for translator in &config.translators {
        let registered = match translator {
            TranslatorConfig::Hub(c) => bus.register_translator(HubTranslator::new(
                c.name.clone(),
                c.inputs.clone(),
                c.outputs.clone(),
            )),
            TranslatorConfig::Observer(c) => {
                bus.register_translator(ObserverTranslator::new(c.name.clone()))
            }
        };
        registered.map_err(|source| LoadError::Bus {
            bus: config.name.clone(),
            source,
        })?;
    }
    Ok(bus)
}

/// Summary of a descriptor, as reported by [`check_federation`].
#[derive(Debug, Clone, Serialize)]
pub struct FederationReport {
    pub descriptor: PathBuf,
    pub buses: Vec<BusReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BusReport {
    pub name: String,
    pub routing: &'static str,
    pub workers: usize,
    pub translators: Vec<TranslatorReport>,
    /// Rule names, for rule-routed buses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslatorReport {
    pub name: String,
    pub kind: &'static str,
}

/// Validate the descriptor at `path` and compile its rule sets, without
/// building any bus.
pub async fn check_federation(path: &Path) -> Result<FederationReport, LoadError> {
    let config = read_descriptor(path).await?;

    let mut buses = Vec::with_capacity(config.buses.len());
    for bus in &config.buses {
        let (routing, rules) = match &bus.routing {
            RoutingConfig::Broadcast => ("broadcast", None),
            RoutingConfig::Rules { rules } => {
                let compiled = compile_rules(rules, path.parent())
                    .await
                    .map_err(|source| LoadError::Rules {
                        bus: bus.name.clone(),
                        source,
                    })?;
                ("rules", Some(compiled))
            }
        };
        buses.push(BusReport {
            name: bus.name.clone(),
            routing,
            workers: bus.pool.workers,
            translators: bus
                .translators
                .iter()
                .map(|t| TranslatorReport {
                    name: t.name().to_string(),
                    kind: t.kind(),
                })
                .collect(),
            rules,
        });
    }

    Ok(FederationReport {
        descriptor: path.to_path_buf(),
        buses,
    })
}

async fn compile_rules(
    identifier: &str,
    resource_root: Option<&Path>,
) -> Result<Vec<String>, RuleError> {
    let source = load_rules_source(identifier, resource_root).await?;
    let session = JexlSession::compile(&source)?;
    Ok(session.rule_names().into_iter().map(str::to_string).collect())
}

/// A context holding a fresh endpoint hub and observer registry.
pub fn default_context() -> CompoundContext {
    CompoundContext::new()
        .with::<EndpointHubCapability>(EndpointHub::new())
        .with::<ObserverRegistryCapability>(ObserverRegistry::new())
}

/// Release the resources of a context built by [`default_context`].
///
/// Call after every bus using the context has stopped.
pub fn shutdown_context(context: &CompoundContext) {
    if let Some(hub) = context.get::<EndpointHubCapability>() {
        hub.close();
    }
    if let Some(registry) = context.get::<ObserverRegistryCapability>() {
        registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Envelope;
    use crate::observer::EventObserver;
    use fedbus_core::bus::BusState;
    use fedbus_core::signature::is_signed;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    const DESCRIPTOR: &str = r#"
[[bus]]
name = "main"
routing = { kind = "rules", rules = "rules/routing.toml" }

[bus.pool]
workers = 4
shutdown_timeout_ms = 2000

[[bus.translator]]
kind = "hub"
name = "camel"
inputs = ["direct://test1"]
outputs = ["direct://camel-out"]

[[bus.translator]]
kind = "hub"
name = "vertx"
inputs = ["inbound-channel"]
outputs = ["outbound-channel"]

[[bus.translator]]
kind = "observer"
name = "cdi"
"#;

    const RULES: &str = r#"
[[rule]]
name = "camel greets vertx"
when = "fact.headers.source == 'camel'"
channel = "vertx"
payload = "'Hello ' + fact.payload"
"#;

    fn write_fixture(dir: &TempDir) -> PathBuf {
        std::fs::create_dir(dir.path().join("rules")).unwrap();
        std::fs::write(dir.path().join("rules/routing.toml"), RULES).unwrap();
        let path = dir.path().join("federation.toml");
        std::fs::write(&path, DESCRIPTOR).unwrap();
        path
    }

    #[tokio::test]
    async fn load_builds_registered_buses() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir);
        let context = default_context();

        let federation = load_federation(&path, &context).await.unwrap();
        let bus = federation.bus("main").unwrap();
        assert_eq!(bus.translator_names(), vec!["camel", "vertx", "cdi"]);
        assert_eq!(bus.state(), BusState::Created);
    }

    #[tokio::test]
    async fn rule_routed_federation_end_to_end() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir);
        let context = default_context();
        let hub = context.get::<EndpointHubCapability>().unwrap().clone();

        let federation = load_federation(&path, &context).await.unwrap();
        let mut vertx_out = hub.consumer("outbound-channel").unwrap();
        federation.start().await.unwrap();

        hub.send("direct://test1", Envelope::new("world")).unwrap();
        let envelope = tokio::time::timeout(Duration::from_secs(2), vertx_out.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(envelope.body, json!("Hello world"));
        assert_eq!(envelope.headers["from"], "camel:direct://test1");
        assert_eq!(envelope.headers["source"], "camel");
        assert!(is_signed(&envelope.headers));
        assert_eq!(hub.consumer_count("direct://camel-out"), 0);

        federation.stop().await;
        shutdown_context(&context);
        assert!(hub.is_closed());
        assert_eq!(federation.bus("main").unwrap().state(), BusState::Stopped);
    }

    #[derive(Default)]
    struct EventLog(std::sync::Mutex<Vec<serde_json::Value>>);

    impl EventObserver for EventLog {
        fn on_event(&self, event: &serde_json::Value) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[tokio::test]
    async fn broadcast_bus_reaches_observers_and_hub_without_echo() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fanout.toml");
        std::fs::write(
            &path,
            r#"
[[bus]]
name = "fanout"

[[bus.translator]]
kind = "hub"
name = "vertx"
inputs = ["in"]
outputs = ["out"]

[[bus.translator]]
kind = "observer"
name = "cdi1"

[[bus.translator]]
kind = "observer"
name = "cdi2"
"#,
        )
        .unwrap();
        let context = default_context();
        let hub = context.get::<EndpointHubCapability>().unwrap().clone();
        let registry = context.get::<ObserverRegistryCapability>().unwrap().clone();
        let log = std::sync::Arc::new(EventLog::default());
        registry.register(log.clone());
        let mut out = hub.consumer("out").unwrap();

        let federation = load_federation(&path, &context).await.unwrap();
        federation.start().await.unwrap();

        // One hub message: delivered to vertx, and fired once by each observer.
        hub.send("in", Envelope::new(json!({"n": 1}))).unwrap();
        let envelope = tokio::time::timeout(Duration::from_secs(2), out.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.body, json!({"n": 1}));

        // One external event: picked up by both bridges, so two bus messages.
        registry.fire(&json!({"n": 2}));
        for _ in 0..2 {
            let envelope = tokio::time::timeout(Duration::from_secs(2), out.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(envelope.body, json!({"n": 2}));
        }
        federation.stop().await;

        let events = log.0.lock().unwrap().clone();
        let ones = events.iter().filter(|e| **e == json!({"n": 1})).count();
        let twos = events.iter().filter(|e| **e == json!({"n": 2})).count();
        assert_eq!(ones, 2);
        assert_eq!(twos, 5);
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_descriptor_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = load_federation(&dir.path().join("absent.toml"), &default_context()).await;
        assert!(matches!(result, Err(LoadError::Io { .. })));
    }

    #[tokio::test]
    async fn translator_without_capability_fails_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.toml");
        std::fs::write(
            &path,
            "[[bus]]\nname = \"main\"\n\n[[bus.translator]]\nkind = \"observer\"\nname = \"cdi\"\n",
        )
        .unwrap();

        let err = load_federation(&path, &CompoundContext::new()).await.unwrap_err();
        assert!(matches!(err, LoadError::Bus { bus, source: BusError::Translator(_) } if bus == "main"));
    }

    #[tokio::test]
    async fn missing_rules_fail_federation_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.toml");
        std::fs::write(
            &path,
            r#"
[[bus]]
name = "plain"

[[bus]]
name = "ruled"
routing = { kind = "rules", rules = "nope.toml" }
"#,
        )
        .unwrap();

        let federation = load_federation(&path, &default_context()).await.unwrap();
        let err = federation.start().await.unwrap_err();
        assert!(matches!(
            err,
            LoadError::Bus { ref bus, source: BusError::RoutingEngineStartup(_) } if bus == "ruled"
        ));
        assert_eq!(federation.bus("plain").unwrap().state(), BusState::Stopped);
        assert_eq!(federation.bus("ruled").unwrap().state(), BusState::Created);
    }

    #[tokio::test]
    async fn check_reports_rules_and_translators() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir);

        let report = check_federation(&path).await.unwrap();
        let main = &report.buses[0];
        assert_eq!(main.routing, "rules");
        assert_eq!(main.workers, 4);
        assert_eq!(main.rules.as_deref(), Some(&["camel greets vertx".to_string()][..]));
        assert_eq!(main.translators[2].kind, "observer");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["buses"][0]["name"], "main");
    }

    #[tokio::test]
    async fn check_reports_broken_rules() {
        let dir = TempDir::new().unwrap();
        let path = write_fixture(&dir);
        std::fs::write(dir.path().join("rules/routing.toml"), "").unwrap();

        let err = check_federation(&path).await.unwrap_err();
        assert!(matches!(err, LoadError::Rules { source: RuleError::Invalid(_), .. }));
    }
}
