use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::BridgeError;
use crate::ids::{DeviceId, SessionId};
use crate::tree::Node;

/// What a session needs to resume where it left off.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<S> {
    pub state: S,
    /// Last tree sent to the client, if any render happened.
    pub tree: Option<Node>,
    pub render_num: u64,
}

/// Boundary contract with whatever owns application state between page loads.
#[async_trait]
pub trait StateStorage<S>: Send + Sync
where
    S: Send + Sync + 'static,
{
    /// Initial state for a fresh session on this device. May suspend, e.g.
    /// for an authorization lookup.
    async fn load(&self, device_id: &DeviceId) -> Result<S, BridgeError>;

    /// A previously persisted snapshot for this session. Only a snapshot
    /// persisted by `device_id` may be returned; another device presenting
    /// the same session id starts fresh.
    async fn restore(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
    ) -> Result<Option<Snapshot<S>>, BridgeError> {
        let _ = (session_id, device_id);
        Ok(None)
    }

    async fn persist(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
        snapshot: &Snapshot<S>,
    ) -> Result<(), BridgeError> {
        let _ = (session_id, device_id, snapshot);
        Ok(())
    }

    /// Forget the snapshot `device_id` persisted for this session.
    async fn discard(&self, session_id: &SessionId, device_id: &DeviceId) -> Result<(), BridgeError> {
        let _ = (session_id, device_id);
        Ok(())
    }
}

/// Storage that keeps nothing and starts every session from a factory.
pub struct FactoryStorage<F> {
    factory: F,
}

impl<F> FactoryStorage<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl<S, F> StateStorage<S> for FactoryStorage<F>
where
    S: Send + Sync + 'static,
    F: Fn(&DeviceId) -> S + Send + Sync,
{
    async fn load(&self, device_id: &DeviceId) -> Result<S, BridgeError> {
        Ok((self.factory)(device_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn factory_storage_loads_and_never_restores() {
        let storage = FactoryStorage::new(|_: &DeviceId| 41u32 + 1);
        assert_eq!(storage.load(&DeviceId::new()).await.unwrap(), 42);
        assert!(storage.restore(&SessionId::new(), &DeviceId::new()).await.unwrap().is_none());
    }
}
