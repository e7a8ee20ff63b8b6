//! Pluggable routing policies.

use std::future::Future;

use fedbus_types::Message;

use super::BusError;
use super::broadcast::BroadcastPolicy;
use super::router::Router;
use super::rule_routed::RuleEnginePolicy;

/// Decides which translators receive an inbound message.
///
/// `start` runs once while the bus starts, before any translator can produce
/// traffic; a failure aborts the bus start. `route` must not block on
/// delivery: it hands work to the router and returns.
pub trait RoutingPolicy: Send + Sync + 'static {
    /// Short name used in logs.
    fn kind(&self) -> &'static str;

    fn start(&self, router: &Router) -> impl Future<Output = Result<(), BusError>> + Send;

    fn route(&self, message: Message, router: &Router);

    fn stop(&self) {}
}

/// Either routing policy, chosen at assembly time from a descriptor.
#[derive(Debug)]
pub enum Routing {
    Broadcast(BroadcastPolicy),
    Rules(RuleEnginePolicy),
}

impl From<BroadcastPolicy> for Routing {
    fn from(policy: BroadcastPolicy) -> Self {
        Routing::Broadcast(policy)
    }
}

impl From<RuleEnginePolicy> for Routing {
    fn from(policy: RuleEnginePolicy) -> Self {
        Routing::Rules(policy)
    }
}

impl RoutingPolicy for Routing {
    fn kind(&self) -> &'static str {
        match self {
            Routing::Broadcast(p) => p.kind(),
            Routing::Rules(p) => p.kind(),
        }
    }

    async fn start(&self, router: &Router) -> Result<(), BusError> {
        match self {
            Routing::Broadcast(p) => p.start(router).await,
            Routing::Rules(p) => p.start(router).await,
        }
    }

    fn route(&self, message: Message, router: &Router) {
        match self {
            Routing::Broadcast(p) => p.route(message, router),
            Routing::Rules(p) => p.route(message, router),
        }
    }

    fn stop(&self) {
        match self {
            Routing::Broadcast(p) => p.stop(),
            Routing::Rules(p) => p.stop(),
        }
    }
}
