use std::sync::Arc;

use fedbus_types::Message;
use tracing::debug;

use crate::pool::DeliveryPool;
use crate::translator::TranslatorHandle;

/// Dispatch side of a started bus: its translators plus its delivery pool.
///
/// Routing policies decide *where* a message goes; the router does the
/// fan-out. Cheap to clone, so channel callbacks can each own one.
#[derive(Clone)]
pub struct Router {
    bus: Arc<str>,
    translators: Arc<[TranslatorHandle]>,
    pool: DeliveryPool,
}

impl Router {
    pub fn new(bus: impl Into<Arc<str>>, translators: Vec<TranslatorHandle>, pool: DeliveryPool) -> Self {
        Self {
            bus: bus.into(),
            translators: translators.into(),
            pool,
        }
    }

    pub fn bus_name(&self) -> &str {
        &self.bus
    }

    pub fn pool(&self) -> &DeliveryPool {
        &self.pool
    }

    /// Submit one delivery per translator. Returns how many were scheduled.
    pub fn broadcast(&self, message: &Message) -> usize {
        debug!(
            bus = %self.bus,
            message_id = %message.id(),
            targets = self.translators.len(),
            "broadcasting message"
        );
        self.translators
            .iter()
            .filter(|t| self.pool.submit((*t).clone(), message.clone()))
            .count()
    }

    /// Submit a delivery to the translator called `name`.
    ///
    /// Returns `false` if no such translator exists or the pool is closed.
    pub fn deliver_to(&self, name: &str, message: Message) -> bool {
        match self.translator(name) {
            Some(translator) => self.pool.submit(translator.clone(), message),
            None => {
                debug!(bus = %self.bus, translator = name, "no translator with that name");
                false
            }
        }
    }

    pub fn translator(&self, name: &str) -> Option<&TranslatorHandle> {
        self.translators.iter().find(|t| t.name() == name)
    }

    pub fn translator_names(&self) -> Vec<&str> {
        self.translators.iter().map(TranslatorHandle::name).collect()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("bus", &self.bus)
            .field("translators", &self.translator_names())
            .field("pool", &self.pool)
            .finish()
    }
}
