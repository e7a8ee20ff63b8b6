//! Bounded delivery pool.
//!
//! Every `send_message` a bus issues runs as its own task on the runtime the
//! bus was started on. A semaphore caps how many of those tasks talk to
//! translators at once; a `TaskTracker` lets `shutdown` refuse new work and
//! wait for in-flight deliveries.

use std::sync::Arc;
use std::time::Duration;

use fedbus_types::config::PoolConfig;
use fedbus_types::{Message, ShutdownTimeout};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::translator::TranslatorHandle;

/// Per-bus pool of delivery tasks. Cloning shares the pool.
#[derive(Clone)]
pub struct DeliveryPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    bus: Arc<str>,
    permits: Arc<Semaphore>,
    workers: usize,
    tracker: TaskTracker,
    runtime: Handle,
    shutdown_timeout: Duration,
}

impl DeliveryPool {
    pub fn new(bus: impl Into<Arc<str>>, config: &PoolConfig, runtime: Handle) -> Self {
        let workers = config.workers.max(1);
        Self {
            inner: Arc::new(PoolInner {
                bus: bus.into(),
                permits: Arc::new(Semaphore::new(workers)),
                workers,
                tracker: TaskTracker::new(),
                runtime,
                shutdown_timeout: config.shutdown_timeout(),
            }),
        }
    }

    /// Schedule `translator.send_message(message)`.
    ///
    /// Returns immediately. Returns `false` without scheduling anything once
    /// the pool is shutting down. A delivery failure is logged and stays local
    /// to this one task.
    pub fn submit(&self, translator: TranslatorHandle, message: Message) -> bool {
        let inner = &self.inner;
        if inner.tracker.is_closed() {
            debug!(
                bus = %inner.bus,
                translator = translator.name(),
                message_id = %message.id(),
                "delivery pool closed, dropping message"
            );
            return false;
        }

        let bus = Arc::clone(&inner.bus);
        let permits = Arc::clone(&inner.permits);
        inner.tracker.spawn_on(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                let message_id = message.id();
                match translator.send_message(message).await {
                    Ok(()) => debug!(
                        bus = %bus,
                        translator = translator.name(),
                        %message_id,
                        "message delivered"
                    ),
                    Err(e) => error!(
                        bus = %bus,
                        translator = translator.name(),
                        %message_id,
                        error = %e,
                        "delivery failed"
                    ),
                }
            },
            &inner.runtime,
        );
        true
    }

    /// Deliveries scheduled but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    pub fn is_closed(&self) -> bool {
        self.inner.tracker.is_closed()
    }

    /// Stop accepting work and wait for in-flight deliveries.
    ///
    /// Waits at most the configured shutdown timeout. Deliveries still running
    /// after that are left to finish on their own. Safe to call repeatedly.
    pub async fn shutdown(&self) -> Result<(), ShutdownTimeout> {
        let inner = &self.inner;
        inner.tracker.close();

        match tokio::time::timeout(inner.shutdown_timeout, inner.tracker.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(ShutdownTimeout {
                pending: inner.tracker.len(),
                waited: inner.shutdown_timeout,
            }),
        }
    }
}

impl std::fmt::Debug for DeliveryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryPool")
            .field("bus", &self.inner.bus)
            .field("workers", &self.inner.workers)
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish()
    }
}
