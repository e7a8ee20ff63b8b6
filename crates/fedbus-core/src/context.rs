//! Compound context: capability-keyed registry of shared external resources.
//!
//! Translators pull long-lived resources (an endpoint hub, an observer
//! registry, ...) out of the context during `initialize`. Resources are stored
//! under an abstract *capability* key rather than under their concrete type,
//! so a translator asking for "the event hub capability" gets whatever
//! implementation was configured.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// An abstract capability key.
///
/// Implement this on a zero-sized marker type; `Resource` is the handle
/// stored under it.
pub trait Capability: 'static {
    /// Handle type stored under this capability.
    type Resource: Send + Sync + 'static;

    /// Human-readable capability name, used in logs and errors.
    const NAME: &'static str;
}

#[derive(Clone)]
struct Entry {
    name: &'static str,
    resource: Arc<dyn Any + Send + Sync>,
}

/// Capability-keyed registry shared by every translator of a bus.
///
/// Cloning is cheap and yields a view of the same entries. `put` on a clone
/// that is already shared copies the table first, so resources visible to
/// running translators never change underneath them.
#[derive(Clone, Default)]
pub struct CompoundContext {
    entries: Arc<HashMap<TypeId, Entry>>,
}

impl CompoundContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `resource` under capability `K`. Last put wins.
    pub fn put<K: Capability>(&mut self, resource: K::Resource) {
        Arc::make_mut(&mut self.entries).insert(
            TypeId::of::<K>(),
            Entry {
                name: K::NAME,
                resource: Arc::new(resource),
            },
        );
    }

    /// Builder-style `put`.
    pub fn with<K: Capability>(mut self, resource: K::Resource) -> Self {
        self.put::<K>(resource);
        self
    }

    /// Look up the resource stored under capability `K`.
    pub fn get<K: Capability>(&self) -> Option<&K::Resource> {
        self.entries
            .get(&TypeId::of::<K>())
            .and_then(|entry| entry.resource.downcast_ref::<K::Resource>())
    }

    pub fn contains<K: Capability>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<K>())
    }

    /// Names of all stored capabilities.
    pub fn capability_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.values().map(|e| e.name).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for CompoundContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompoundContext")
            .field("capabilities", &self.capability_names())
            .finish()
    }
}
