//! Contracts with collaborators outside the engine: URL routing and the
//! application's environment (message queues, notifications, timers).

use async_trait::async_trait;
use serde_json::Value;

use tether_core::errors::BridgeError;
use tether_core::ids::{DeviceId, SessionId};

use crate::access::TransitionApplier;

/// Two-way mapping between application state and the browser URL.
#[async_trait]
pub trait StateRouter<S>: Send + Sync {
    /// URL for `state`, or `None` to leave the address bar alone.
    fn to_url(&self, state: &S) -> Option<String>;

    /// State the browser asked for by navigating to `url`.
    async fn from_url(
        &self,
        device_id: &DeviceId,
        url: &str,
        previous: &S,
    ) -> Result<S, BridgeError>;
}

/// Called once when a session starts. The returned subscription lives as
/// long as the session.
#[async_trait]
pub trait EnvironmentConfigurator<S>: Send + Sync {
    async fn configure(
        &self,
        device_id: &DeviceId,
        session_id: &SessionId,
        applier: TransitionApplier<S>,
    ) -> Result<Box<dyn Subscription>, BridgeError>;
}

pub trait Subscription: Send {
    /// A handler called `Access::publish`.
    fn on_message(&mut self, message: Value);

    /// Session terminated or expired.
    fn on_destroy(&mut self);
}
