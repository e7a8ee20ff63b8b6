//! Anti-echo protection for translators sharing a transport.
//!
//! Every message a translator pushes to its channel carries
//! `processed-signature`. A translator that sees the header on inbound
//! traffic drops it instead of re-injecting it into the bus.

use std::collections::HashMap;

use fedbus_types::Headers;
use fedbus_types::message::TRANSLATOR_SIGNATURE;
use serde_json::Value;

/// True iff the headers carry the anti-echo signature.
///
/// Works for both JSON header maps and plain string maps used by transports.
pub fn is_signed<V>(headers: &HashMap<String, V>) -> bool {
    headers.contains_key(TRANSLATOR_SIGNATURE)
}

/// Mark headers as already processed by `signer`.
///
/// The signer name is stored as the value for diagnostics; only the presence
/// of the header is significant.
pub fn sign<V: From<String>>(headers: &mut HashMap<String, V>, signer: &str) {
    headers.insert(TRANSLATOR_SIGNATURE.to_string(), V::from(signer.to_string()));
}

/// Name of the translator that signed these headers, if any.
pub fn signer(headers: &Headers) -> Option<&str> {
    headers.get(TRANSLATOR_SIGNATURE).and_then(Value::as_str)
}
