use fedbus_types::Message;

use super::BusError;
use super::policy::RoutingPolicy;
use super::router::Router;

/// Every inbound message goes to every translator, the origin included.
/// Translators drop their own echoes via the signature header.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastPolicy;

impl RoutingPolicy for BroadcastPolicy {
    fn kind(&self) -> &'static str {
        "broadcast"
    }

    async fn start(&self, _router: &Router) -> Result<(), BusError> {
        Ok(())
    }

    fn route(&self, message: Message, router: &Router) {
        router.broadcast(&message);
    }
}
