//! Translator bridging endpoint-hub addresses to a federated bus.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use fedbus_core::signature::{is_signed, sign};
use fedbus_core::{BusHandle, CompoundContext, Translator};
use fedbus_types::{DeliveryError, Headers, Message, TranslatorError};
use serde_json::Value;
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::hub::{EndpointHub, EndpointHubCapability, Envelope, HubError};

/// Consumer tasks of a started translator.
struct Consumers {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// Consumes from `inputs` into the bus; publishes bus traffic to `outputs`.
pub struct HubTranslator {
    name: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    hub: Option<EndpointHub>,
    consumers: Mutex<Option<Consumers>>,
}

impl HubTranslator {
    pub fn new(name: impl Into<String>, inputs: Vec<String>, outputs: Vec<String>) -> Self {
        Self {
            name: name.into(),
            inputs,
            outputs,
            hub: None,
            consumers: Mutex::new(None),
        }
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn is_running(&self) -> bool {
        self.consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn to_envelope(&self, message: Message) -> Envelope {
        let mut headers: HashMap<String, String> = message
            .headers()
            .iter()
            .map(|(k, v)| (k.clone(), header_text(v)))
            .collect();
        sign(&mut headers, &self.name);
        Envelope {
            body: message.into_payload(),
            headers,
        }
    }
}

/// Hub headers are strings. JSON strings are carried unquoted.
fn header_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn into_message(envelope: Envelope, translator: &str, address: &str) -> Message {
    let mut message = Message::new(envelope.body);
    let headers: Headers = envelope
        .headers
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    message.set_headers(headers);
    message.set_origin(translator, address);
    message
}

async fn consume(
    translator: String,
    address: String,
    mut rx: Receiver<Envelope>,
    bus: BusHandle,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => received,
        };
        match received {
            Ok(envelope) if is_signed(&envelope.headers) => {
                debug!(%translator, %address, "dropping already-processed envelope");
            }
            Ok(envelope) => {
                if !bus.process_message(into_message(envelope, &translator, &address)) {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(%translator, %address, skipped, "consumer lagged, envelopes lost");
            }
            Err(RecvError::Closed) => {
                debug!(%translator, %address, "endpoint closed");
                break;
            }
        }
    }
}

impl Translator for HubTranslator {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn initialize(&mut self, context: &CompoundContext) -> Result<(), TranslatorError> {
        let hub = context.get::<EndpointHubCapability>().ok_or_else(|| {
            TranslatorError::MissingCapability {
                translator: self.name.clone(),
                capability: "endpoint-hub",
            }
        })?;
        self.hub = Some(hub.clone());
        Ok(())
    }

    async fn start(&self, bus: BusHandle) -> Result<(), TranslatorError> {
        let hub = self
            .hub
            .as_ref()
            .ok_or_else(|| TranslatorError::NotInitialized(self.name.clone()))?;
        if self.is_running() {
            return Err(TranslatorError::AlreadyStarted(self.name.clone()));
        }

        // Subscribe to every input before spawning, so the addresses have
        // consumers by the time start returns.
        let mut receivers = Vec::with_capacity(self.inputs.len());
        for address in &self.inputs {
            let rx = hub.consumer(address).map_err(|e| TranslatorError::StartFailed {
                translator: self.name.clone(),
                reason: e.to_string(),
            })?;
            receivers.push((address.clone(), rx));
        }

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        for (address, rx) in receivers {
            tracker.spawn(consume(
                self.name.clone(),
                address,
                rx,
                bus.clone(),
                cancel.child_token(),
            ));
        }
        tracker.close();

        debug!(translator = %self.name, inputs = ?self.inputs, outputs = ?self.outputs, "hub translator started");
        *self.consumers.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Consumers { cancel, tracker });
        Ok(())
    }

    async fn stop(&self) {
        let consumers = self
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Consumers { cancel, tracker }) = consumers {
            cancel.cancel();
            tracker.wait().await;
            debug!(translator = %self.name, "hub translator stopped");
        }
    }

    async fn send_message(&self, message: Message) -> Result<(), DeliveryError> {
        let hub = self
            .hub
            .as_ref()
            .ok_or_else(|| DeliveryError::NotStarted(self.name.clone()))?;
        if self.outputs.is_empty() {
            debug!(translator = %self.name, "no output endpoints, message discarded");
            return Ok(());
        }

        let envelope = self.to_envelope(message);
        let mut first_error = None;
        for output in &self.outputs {
            if let Err(e) = hub.send(output, envelope.clone()) {
                let error = match e {
                    HubError::NoConsumers(_) => DeliveryError::Unreachable {
                        translator: self.name.clone(),
                        endpoint: output.clone(),
                        reason: "no consumers".to_string(),
                    },
                    // The hub will never accept traffic again.
                    HubError::Closed => DeliveryError::Rejected {
                        translator: self.name.clone(),
                        reason: e.to_string(),
                    },
                };
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for HubTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubTranslator")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedbus_core::MessageSink;
    use fedbus_core::testing::CollectingSink;
    use fedbus_types::message::TRANSLATOR_SIGNATURE;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn context_with(hub: &EndpointHub) -> CompoundContext {
        CompoundContext::new().with::<EndpointHubCapability>(hub.clone())
    }

    fn translator(name: &str, inputs: &[&str], outputs: &[&str], hub: &EndpointHub) -> HubTranslator {
        let mut t = HubTranslator::new(
            name,
            inputs.iter().map(|s| s.to_string()).collect(),
            outputs.iter().map(|s| s.to_string()).collect(),
        );
        t.initialize(&context_with(hub)).unwrap();
        t
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn initialize_without_hub_fails() {
        let mut t = HubTranslator::new("camel", vec![], vec![]);
        let err = t.initialize(&CompoundContext::new()).unwrap_err();
        assert!(matches!(err, TranslatorError::MissingCapability { capability: "endpoint-hub", .. }));
    }

    #[tokio::test]
    async fn outbound_message_is_signed_with_payload_unchanged() {
        let hub = EndpointHub::new();
        let mut out = hub.consumer("direct://outTest").unwrap();
        let camel = translator("camel", &[], &["direct://outTest"], &hub);

        let message = Message::new("hello").with_header("from", "camel:direct://test1");
        camel.send_message(message).await.unwrap();

        let envelope = out.recv().await.unwrap();
        assert_eq!(envelope.body, json!("hello"));
        assert_eq!(envelope.headers["from"], "camel:direct://test1");
        assert!(is_signed(&envelope.headers));
        assert_eq!(envelope.headers[TRANSLATOR_SIGNATURE], "camel");
    }

    #[tokio::test]
    async fn inbound_traffic_gets_origin_headers() {
        let hub = EndpointHub::new();
        let camel = translator("camel", &["direct://test1"], &[], &hub);
        let collector = Arc::new(CollectingSink::default());
        let sink: Arc<dyn MessageSink> = collector.clone();
        camel.start(BusHandle::new("main", &sink)).await.unwrap();

        hub.send("direct://test1", Envelope::new("hello").with_header("trace", "1"))
            .unwrap();
        settle().await;
        camel.stop().await;

        let received = collector.messages();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].payload(), &json!("hello"));
        assert_eq!(received[0].origin(), Some("camel:direct://test1"));
        assert_eq!(received[0].source(), Some("camel"));
        assert_eq!(received[0].header_str("trace"), Some("1"));
    }

    #[tokio::test]
    async fn looped_back_envelope_is_dropped() {
        let hub = EndpointHub::new();
        let camel = translator("camel", &["loop"], &["loop"], &hub);
        let collector = Arc::new(CollectingSink::default());
        let sink: Arc<dyn MessageSink> = collector.clone();
        camel.start(BusHandle::new("main", &sink)).await.unwrap();

        camel.send_message(Message::new("echo")).await.unwrap();
        hub.send("loop", Envelope::new("fresh")).unwrap();
        settle().await;
        camel.stop().await;

        assert_eq!(collector.payloads(), vec![json!("fresh")]);
    }

    #[tokio::test]
    async fn unreachable_output_is_a_delivery_error() {
        let hub = EndpointHub::new();
        let camel = translator("camel", &[], &["direct://nobody"], &hub);

        let err = camel.send_message(Message::new("x")).await.unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::Unreachable { endpoint, .. } if endpoint == "direct://nobody"
        ));
    }

    #[tokio::test]
    async fn closed_hub_rejects_delivery() {
        let hub = EndpointHub::new();
        let camel = translator("camel", &[], &["o"], &hub);
        hub.close();

        let err = camel.send_message(Message::new("x")).await.unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::Rejected { translator, .. } if translator == "camel"
        ));
    }

    #[tokio::test]
    async fn non_string_headers_are_serialized() {
        let hub = EndpointHub::new();
        let mut out = hub.consumer("o").unwrap();
        let camel = translator("camel", &[], &["o"], &hub);

        camel
            .send_message(Message::new(1).with_header("count", 3).with_header("flag", true))
            .await
            .unwrap();

        let envelope = out.recv().await.unwrap();
        assert_eq!(envelope.headers["count"], "3");
        assert_eq!(envelope.headers["flag"], "true");
    }

    #[tokio::test]
    async fn start_twice_is_rejected_and_stop_is_idempotent() {
        let hub = EndpointHub::new();
        let camel = translator("camel", &["a"], &[], &hub);
        let sink: Arc<dyn MessageSink> = Arc::new(CollectingSink::default());

        camel.start(BusHandle::new("main", &sink)).await.unwrap();
        assert!(matches!(
            camel.start(BusHandle::new("main", &sink)).await,
            Err(TranslatorError::AlreadyStarted(_))
        ));
        camel.stop().await;
        camel.stop().await;
        assert!(!camel.is_running());
        assert_eq!(hub.consumer_count("a"), 0);
    }

    #[tokio::test]
    async fn send_before_initialize_is_not_started() {
        let camel = HubTranslator::new("camel", vec![], vec!["o".to_string()]);
        assert!(matches!(
            camel.send_message(Message::new("x")).await,
            Err(DeliveryError::NotStarted(_))
        ));
    }
}
