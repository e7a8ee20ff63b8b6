//! In-process event observers.
//!
//! An `ObserverRegistry` owns an explicit registration table. Firing an event
//! notifies every registered observer synchronously, on the caller's thread.
//!
//! Events carry no headers, so the anti-echo signature travels with the fire
//! itself: [`ObserverRegistry::fire_signed`] tells every observer which
//! translator produced the event.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use fedbus_core::Capability;
use serde_json::Value;
use tracing::debug;

/// Receives every event fired on the registry it is registered with.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &Value);

    /// An event fired by a bus translator. Plain observers treat it like any
    /// other event; bus bridges drop it.
    fn on_signed_event(&self, event: &Value, signer: &str) {
        let _ = signer;
        self.on_event(event);
    }
}

/// Registration handle returned by [`ObserverRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct RegistryInner {
    observers: DashMap<ObserverId, Arc<dyn EventObserver>>,
    next_id: AtomicU64,
}

/// Shared observer registry. Cloning shares the same table.
#[derive(Clone)]
pub struct ObserverRegistry {
    inner: Arc<RegistryInner>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                observers: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn register(&self, observer: Arc<dyn EventObserver>) -> ObserverId {
        let id = ObserverId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.observers.insert(id, observer);
        debug!(observer = id.0, "observer registered");
        id
    }

    /// Returns `true` if the observer was registered.
    pub fn unregister(&self, id: ObserverId) -> bool {
        self.inner.observers.remove(&id).is_some()
    }

    /// Notify every registered observer. Returns how many were notified.
    pub fn fire(&self, event: &Value) -> usize {
        let observers = self.snapshot();
        for observer in &observers {
            observer.on_event(event);
        }
        observers.len()
    }

    /// Notify every registered observer of an event produced by the bus
    /// translator `signer`.
    pub fn fire_signed(&self, event: &Value, signer: &str) -> usize {
        let observers = self.snapshot();
        for observer in &observers {
            observer.on_signed_event(event, signer);
        }
        observers.len()
    }

    // Observers may register or unregister while handling.
    fn snapshot(&self) -> Vec<Arc<dyn EventObserver>> {
        self.inner
            .observers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.observers.is_empty()
    }

    pub fn clear(&self) {
        self.inner.observers.clear();
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}

/// Context key for the shared [`ObserverRegistry`].
pub struct ObserverRegistryCapability;

impl Capability for ObserverRegistryCapability {
    type Resource = ObserverRegistry;
    const NAME: &'static str = "observer-registry";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Value>>);

    impl EventObserver for Recorder {
        fn on_event(&self, event: &Value) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn fire_notifies_all_registered() {
        let registry = ObserverRegistry::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        registry.register(a.clone());
        registry.register(b.clone());

        assert_eq!(registry.fire(&json!({"kind": "ping"})), 2);
        assert_eq!(a.0.lock().unwrap().len(), 1);
        assert_eq!(b.0.lock().unwrap()[0], json!({"kind": "ping"}));
    }

    #[test]
    fn unregistered_observer_is_not_notified() {
        let registry = ObserverRegistry::new();
        let a = Arc::new(Recorder::default());
        let id = registry.register(a.clone());

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert_eq!(registry.fire(&json!(1)), 0);
        assert!(a.0.lock().unwrap().is_empty());
    }

    #[test]
    fn observer_may_unregister_itself_while_handling() {
        struct OneShot {
            registry: ObserverRegistry,
            id: Mutex<Option<ObserverId>>,
        }
        impl EventObserver for OneShot {
            fn on_event(&self, _event: &Value) {
                if let Some(id) = self.id.lock().unwrap().take() {
                    self.registry.unregister(id);
                }
            }
        }

        let registry = ObserverRegistry::new();
        let observer = Arc::new(OneShot {
            registry: registry.clone(),
            id: Mutex::new(None),
        });
        let id = registry.register(observer.clone());
        *observer.id.lock().unwrap() = Some(id);

        registry.fire(&json!("x"));
        assert!(registry.is_empty());
    }

    #[test]
    fn signed_fire_reaches_plain_observers_as_ordinary_events() {
        #[derive(Default)]
        struct SignerLog(Mutex<Vec<String>>);
        impl EventObserver for SignerLog {
            fn on_event(&self, _event: &Value) {
                self.0.lock().unwrap().push("-".to_string());
            }
            fn on_signed_event(&self, _event: &Value, signer: &str) {
                self.0.lock().unwrap().push(signer.to_string());
            }
        }

        let registry = ObserverRegistry::new();
        let plain = Arc::new(Recorder::default());
        let log = Arc::new(SignerLog::default());
        registry.register(plain.clone());
        registry.register(log.clone());

        assert_eq!(registry.fire_signed(&json!("e"), "cdi"), 2);
        registry.fire(&json!("f"));

        assert_eq!(plain.0.lock().unwrap().as_slice(), &[json!("e"), json!("f")]);
        assert_eq!(log.0.lock().unwrap().as_slice(), &["cdi".to_string(), "-".to_string()]);
    }

    #[test]
    fn clear_drops_everything() {
        let registry = ObserverRegistry::new();
        registry.register(Arc::new(Recorder::default()));
        registry.clear();
        assert!(registry.is_empty());
    }
}
