//! Test doubles for buses and translators.
//!
//! Compiled for this crate's tests and, behind the `testing` feature, for
//! downstream crates' tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fedbus_types::{DeliveryError, Message, TranslatorError};
use serde_json::Value;

use crate::translator::{BusHandle, MessageSink, Translator};

/// Property a [`RecordingTranslator`] sets on every message it records.
pub const PROCESS_SET_FLAG: &str = "federated.bus.processed_flag";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct ProbeState {
    name: Mutex<String>,
    messages: Mutex<Vec<Message>>,
    bus: Mutex<Option<BusHandle>>,
    attempts: AtomicUsize,
    started: AtomicUsize,
    stopped: AtomicUsize,
}

/// Translator that records everything delivered to it.
///
/// Keep a [`RecordingProbe`] before registering: the bus takes ownership of
/// the translator itself.
pub struct RecordingTranslator {
    name: String,
    state: Arc<ProbeState>,
    fail_sends: bool,
    fail_start: bool,
    delay: Option<Duration>,
}

impl RecordingTranslator {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let state = ProbeState::default();
        *lock(&state.name) = name.clone();
        Self {
            name,
            state: Arc::new(state),
            fail_sends: false,
            fail_start: false,
            delay: None,
        }
    }

    /// A translator whose every `send_message` fails.
    pub fn failing(name: impl Into<String>) -> Self {
        Self {
            fail_sends: true,
            ..Self::new(name)
        }
    }

    /// Sleep this long in `send_message` before recording.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make `start` fail.
    pub fn with_start_failure(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn probe(&self) -> RecordingProbe {
        RecordingProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl Translator for RecordingTranslator {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        *lock(&self.state.name) = name.clone();
        self.name = name;
    }

    async fn start(&self, bus: BusHandle) -> Result<(), TranslatorError> {
        if self.fail_start {
            return Err(TranslatorError::StartFailed {
                translator: self.name.clone(),
                reason: "configured to fail".to_string(),
            });
        }
        *lock(&self.state.bus) = Some(bus);
        self.state.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.state.stopped.fetch_add(1, Ordering::SeqCst);
    }

    async fn send_message(&self, mut message: Message) -> Result<(), DeliveryError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sends {
            return Err(DeliveryError::Rejected {
                translator: self.name.clone(),
                reason: "configured to fail".to_string(),
            });
        }
        message.set_property(PROCESS_SET_FLAG, "true");
        lock(&self.state.messages).push(message);
        Ok(())
    }
}

/// Observation side of a [`RecordingTranslator`]. Cheap to clone.
#[derive(Clone)]
pub struct RecordingProbe {
    state: Arc<ProbeState>,
}

impl RecordingProbe {
    pub fn name(&self) -> String {
        lock(&self.state.name).clone()
    }

    /// Messages successfully delivered, in completion order.
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.state.messages).clone()
    }

    pub fn payloads(&self) -> Vec<Value> {
        lock(&self.state.messages)
            .iter()
            .map(|m| m.payload().clone())
            .collect()
    }

    /// `send_message` calls, successful or not.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.state.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.state.stopped.load(Ordering::SeqCst)
    }

    /// Inject a message into the bus as if it arrived on this translator's
    /// channel. Returns `false` if the translator was never started or its
    /// bus is gone.
    pub fn generate_message(&self, payload: impl Into<Value>) -> bool {
        let Some(bus) = lock(&self.state.bus).clone() else {
            return false;
        };
        let mut message = Message::new(payload);
        message.set_origin(&self.name(), "generated");
        bus.process_message(message)
    }

    /// Poll until at least `count` messages were recorded or `timeout`
    /// elapses. Returns whether the count was reached.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if lock(&self.state.messages).len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Message sink that only collects what it is handed.
#[derive(Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<Message>>,
}

impl CollectingSink {
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.messages).clone()
    }

    pub fn payloads(&self) -> Vec<Value> {
        lock(&self.messages)
            .iter()
            .map(|m| m.payload().clone())
            .collect()
    }
}

impl MessageSink for CollectingSink {
    fn process_message(&self, message: Message) {
        lock(&self.messages).push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn generated_messages_carry_origin() {
        let translator = RecordingTranslator::new("vertx");
        let probe = translator.probe();
        let collector = Arc::new(CollectingSink::default());
        let sink: Arc<dyn MessageSink> = collector.clone();

        assert!(!probe.generate_message("too early"));
        translator.start(BusHandle::new("main", &sink)).await.unwrap();
        assert!(probe.generate_message("hi"));

        let received = collector.messages();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].origin(), Some("vertx:generated"));
        assert_eq!(received[0].source(), Some("vertx"));
        assert_eq!(probe.started(), 1);
    }

    #[tokio::test]
    async fn set_name_is_visible_through_probe() {
        let mut translator = RecordingTranslator::new("before");
        let probe = translator.probe();
        translator.set_name("after".to_string());

        assert_eq!(translator.name(), "after");
        assert_eq!(probe.name(), "after");
    }

    #[tokio::test]
    async fn send_marks_processed_flag() {
        let translator = RecordingTranslator::new("t");
        let probe = translator.probe();
        translator.send_message(Message::new(json!(1))).await.unwrap();

        assert!(probe.wait_for(1, Duration::from_millis(100)).await);
        assert_eq!(probe.messages()[0].property(PROCESS_SET_FLAG), Some("true"));
    }
}
