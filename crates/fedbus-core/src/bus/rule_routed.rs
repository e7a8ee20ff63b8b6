//! Rule-engine routing.
//!
//! Inbound messages become facts on the `inbound` entry point. Rules emit
//! derived messages on channels: `outbound` reaches every translator, any
//! other channel name reaches the translator of that name.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fedbus_types::Message;
use tracing::{debug, info, warn};

use super::BusError;
use super::policy::RoutingPolicy;
use super::router::Router;
use crate::rules::{
    FactSession, INBOUND_ENTRY_POINT, JexlRuleEngine, OUTBOUND_CHANNEL, RuleEngine,
    load_rules_source,
};

pub struct RuleEnginePolicy {
    rules: String,
    resource_root: Option<PathBuf>,
    engine: Arc<dyn RuleEngine>,
    session: Mutex<Option<Box<dyn FactSession>>>,
}

impl RuleEnginePolicy {
    /// Route with the rule set at `rules` using the JEXL engine.
    pub fn new(rules: impl Into<String>) -> Self {
        Self {
            rules: rules.into(),
            resource_root: None,
            engine: Arc::new(JexlRuleEngine::new()),
            session: Mutex::new(None),
        }
    }

    /// Directory relative rule identifiers are resolved against first.
    pub fn with_resource_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.resource_root = Some(root.into());
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn RuleEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn rules(&self) -> &str {
        &self.rules
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn FactSession>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RoutingPolicy for RuleEnginePolicy {
    fn kind(&self) -> &'static str {
        "rules"
    }

    async fn start(&self, router: &Router) -> Result<(), BusError> {
        let source = load_rules_source(&self.rules, self.resource_root.as_deref()).await?;
        let mut session = self.engine.build_session(&source)?;

        let everyone = router.clone();
        session.register_channel(
            OUTBOUND_CHANNEL,
            Box::new(move |message| {
                everyone.broadcast(&message);
            }),
        );

        for name in router.translator_names() {
            if name == OUTBOUND_CHANNEL {
                warn!(
                    bus = router.bus_name(),
                    translator = name,
                    "translator name collides with the broadcast channel, not addressable by rules"
                );
                continue;
            }
            let target = router.clone();
            let owned = name.to_string();
            session.register_channel(
                name,
                Box::new(move |message| {
                    target.deliver_to(&owned, message);
                }),
            );
        }

        info!(bus = router.bus_name(), rules = %self.rules, "rule session started");
        *self.lock() = Some(session);
        Ok(())
    }

    fn route(&self, message: Message, router: &Router) {
        let mut guard = self.lock();
        let Some(session) = guard.as_mut() else {
            debug!(
                bus = router.bus_name(),
                message_id = %message.id(),
                "no rule session, dropping message"
            );
            return;
        };

        let message_id = message.id();
        if let Err(e) = session.insert(INBOUND_ENTRY_POINT, message) {
            warn!(bus = router.bus_name(), %message_id, error = %e, "cannot insert fact");
            return;
        }
        match session.fire_all_rules() {
            Ok(fired) => debug!(bus = router.bus_name(), %message_id, fired, "rules fired"),
            Err(e) => warn!(bus = router.bus_name(), %message_id, error = %e, "rule firing failed"),
        }
    }

    fn stop(&self) {
        if let Some(mut session) = self.lock().take() {
            session.unregister_channel(OUTBOUND_CHANNEL);
            session.dispose();
        }
    }
}

impl std::fmt::Debug for RuleEnginePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEnginePolicy")
            .field("rules", &self.rules)
            .field("resource_root", &self.resource_root)
            .field("active", &self.is_active())
            .finish()
    }
}
