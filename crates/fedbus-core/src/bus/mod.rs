//! The federated bus: translators, one routing policy, one delivery pool.
//!
//! Lifecycle is `Created -> Started -> Stopped`. Translators are registered
//! (and initialized against the bus's compound context) only while `Created`.
//! `start` brings up the routing policy, then the translators; `stop` stops
//! routing, drains in-flight deliveries, then stops the translators.

mod broadcast;
mod policy;
mod router;
mod rule_routed;

use std::sync::{Arc, PoisonError, RwLock};

use fedbus_types::config::PoolConfig;
use fedbus_types::{Message, TranslatorError};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::context::CompoundContext;
use crate::pool::DeliveryPool;
use crate::rules::RuleError;
use crate::translator::{BusHandle, MessageSink, Translator, TranslatorHandle};

pub use broadcast::BroadcastPolicy;
pub use policy::{Routing, RoutingPolicy};
pub use router::Router;
pub use rule_routed::RuleEnginePolicy;

/// A bus that hands every message to every translator.
pub type BroadcastBus = FederatedBus<BroadcastPolicy>;

/// A bus whose routing is decided by a rule session.
pub type RuleRoutedBus = FederatedBus<RuleEnginePolicy>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Created,
    Started,
    Stopped,
}

impl std::fmt::Display for BusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BusState::Created => "created",
            BusState::Started => "started",
            BusState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus '{bus}' cannot {operation} while {state}")]
    InvalidState {
        bus: String,
        operation: &'static str,
        state: BusState,
    },

    #[error("bus '{bus}' already has a translator named '{translator}'")]
    DuplicateTranslator { bus: String, translator: String },

    #[error(transparent)]
    Translator(#[from] TranslatorError),

    #[error("routing engine failed to start: {0}")]
    RoutingEngineStartup(#[from] RuleError),

    #[error("bus '{0}' must be started from within a tokio runtime")]
    NoRuntime(String),
}

/// State shared between the bus and the handles its translators hold.
struct BusCore<P> {
    name: Arc<str>,
    policy: P,
    state: RwLock<BusState>,
    /// Serializes `start` and `stop`.
    lifecycle: tokio::sync::Mutex<()>,
    /// Present only while started.
    router: RwLock<Option<Router>>,
}

impl<P> BusCore<P> {
    fn state(&self) -> BusState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: BusState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn router(&self) -> Option<Router> {
        self.router
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_router(&self, router: Option<Router>) -> Option<Router> {
        std::mem::replace(
            &mut *self.router.write().unwrap_or_else(PoisonError::into_inner),
            router,
        )
    }
}

impl<P: RoutingPolicy> MessageSink for BusCore<P> {
    fn process_message(&self, message: Message) {
        let Some(router) = self.router() else {
            debug!(
                bus = %self.name,
                message_id = %message.id(),
                "bus not started, dropping message"
            );
            return;
        };
        if router.pool().is_closed() {
            debug!(
                bus = %self.name,
                message_id = %message.id(),
                "bus stopping, dropping message"
            );
            return;
        }
        debug!(
            bus = %self.name,
            message_id = %message.id(),
            source = message.source().unwrap_or("-"),
            "routing message"
        );
        self.policy.route(message, &router);
    }
}

/// A federated bus with routing policy `P`.
pub struct FederatedBus<P: RoutingPolicy> {
    name: Arc<str>,
    context: CompoundContext,
    pool_config: PoolConfig,
    translators: Vec<TranslatorHandle>,
    core: Arc<BusCore<P>>,
}

impl<P: RoutingPolicy> FederatedBus<P> {
    pub fn new(name: impl Into<Arc<str>>, policy: P, context: CompoundContext) -> Self {
        let name = name.into();
        Self {
            name: Arc::clone(&name),
            context,
            pool_config: PoolConfig::default(),
            translators: Vec::new(),
            core: Arc::new(BusCore {
                name,
                policy,
                state: RwLock::new(BusState::Created),
                lifecycle: tokio::sync::Mutex::new(()),
                router: RwLock::new(None),
            }),
        }
    }

    pub fn with_pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BusState {
        self.core.state()
    }

    pub fn context(&self) -> &CompoundContext {
        &self.context
    }

    pub fn policy(&self) -> &P {
        &self.core.policy
    }

    pub fn translator_names(&self) -> Vec<&str> {
        self.translators.iter().map(TranslatorHandle::name).collect()
    }

    /// Initialize `translator` with this bus's context and add it.
    pub fn register_translator<T: Translator>(&mut self, mut translator: T) -> Result<(), BusError> {
        let state = self.state();
        if state != BusState::Created {
            return Err(BusError::InvalidState {
                bus: self.name.to_string(),
                operation: "register a translator",
                state,
            });
        }
        if self.translators.iter().any(|t| t.name() == translator.name()) {
            return Err(BusError::DuplicateTranslator {
                bus: self.name.to_string(),
                translator: translator.name().to_string(),
            });
        }

        translator.initialize(&self.context)?;
        debug!(bus = %self.name, translator = translator.name(), "translator registered");
        self.translators.push(TranslatorHandle::new(translator));
        Ok(())
    }

    /// Hand a message to the routing policy, as a translator would.
    ///
    /// Dropped silently unless the bus is started.
    pub fn process_message(&self, message: Message) {
        self.core.process_message(message);
    }

    /// Start routing, then start every translator.
    ///
    /// On failure the bus is rolled back and stays `Created`.
    pub async fn start(&self) -> Result<(), BusError> {
        let _lifecycle = self.core.lifecycle.lock().await;
        let state = self.state();
        if state != BusState::Created {
            return Err(BusError::InvalidState {
                bus: self.name.to_string(),
                operation: "start",
                state,
            });
        }

        let runtime = Handle::try_current().map_err(|_| BusError::NoRuntime(self.name.to_string()))?;
        let pool = DeliveryPool::new(Arc::clone(&self.name), &self.pool_config, runtime);
        let router = Router::new(Arc::clone(&self.name), self.translators.clone(), pool.clone());

        if let Err(e) = self.core.policy.start(&router).await {
            self.drain(&pool).await;
            return Err(e);
        }
        self.core.replace_router(Some(router));

        let sink: Arc<dyn MessageSink> = self.core.clone();
        let handle = BusHandle::new(Arc::clone(&self.name), &sink);
        for (idx, translator) in self.translators.iter().enumerate() {
            if let Err(e) = translator.start(handle.clone()).await {
                warn!(
                    bus = %self.name,
                    translator = translator.name(),
                    error = %e,
                    "translator failed to start, rolling back"
                );
                self.core.replace_router(None);
                self.core.policy.stop();
                self.drain(&pool).await;
                for started in self.translators[..idx].iter().rev() {
                    started.stop().await;
                }
                return Err(e.into());
            }
        }

        self.core.set_state(BusState::Started);
        info!(
            bus = %self.name,
            routing = self.core.policy.kind(),
            translators = self.translators.len(),
            workers = pool.workers(),
            "bus started"
        );
        Ok(())
    }

    /// Stop routing, wait for in-flight deliveries, stop every translator.
    ///
    /// Always completes. Calling it again is a no-op.
    pub async fn stop(&self) {
        let _lifecycle = self.core.lifecycle.lock().await;
        match self.state() {
            BusState::Stopped => {
                debug!(bus = %self.name, "bus already stopped");
                return;
            }
            BusState::Created => {
                self.core.set_state(BusState::Stopped);
                info!(bus = %self.name, "bus stopped before it was started");
                return;
            }
            BusState::Started => {}
        }

        let router = self.core.replace_router(None);
        self.core.policy.stop();
        if let Some(router) = router {
            self.drain(router.pool()).await;
        }
        for translator in &self.translators {
            translator.stop().await;
        }

        self.core.set_state(BusState::Stopped);
        info!(bus = %self.name, "bus stopped");
    }

    async fn drain(&self, pool: &DeliveryPool) {
        if let Err(timeout) = pool.shutdown().await {
            warn!(bus = %self.name, error = %timeout, "delivery pool shutdown timed out");
        }
    }
}

impl FederatedBus<BroadcastPolicy> {
    pub fn broadcast(name: impl Into<Arc<str>>, context: CompoundContext) -> Self {
        Self::new(name, BroadcastPolicy, context)
    }
}

impl FederatedBus<RuleEnginePolicy> {
    pub fn rule_routed(
        name: impl Into<Arc<str>>,
        rules: impl Into<String>,
        context: CompoundContext,
    ) -> Self {
        Self::new(name, RuleEnginePolicy::new(rules), context)
    }
}

impl<P: RoutingPolicy> std::fmt::Debug for FederatedBus<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederatedBus")
            .field("name", &self.name)
            .field("routing", &self.core.policy.kind())
            .field("state", &self.state())
            .field("translators", &self.translator_names())
            .finish()
    }
}
