use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use tether_core::errors::BridgeError;
use tether_core::ids::{DeviceId, SessionId};
use tether_core::storage::{Snapshot, StateStorage};

use crate::database::Database;
use crate::snapshots::SnapshotRepo;

/// [`StateStorage`] backed by the `snapshots` table. Fresh sessions get their
/// state from `factory`; resumed sessions get the last persisted snapshot.
pub struct SqliteStateStorage<S, F> {
    repo: SnapshotRepo,
    factory: F,
    _state: PhantomData<fn() -> S>,
}

impl<S, F> SqliteStateStorage<S, F>
where
    F: Fn(&DeviceId) -> S + Send + Sync,
{
    pub fn new(db: Database, factory: F) -> Self {
        Self {
            repo: SnapshotRepo::new(db),
            factory,
            _state: PhantomData,
        }
    }

    pub fn repo(&self) -> &SnapshotRepo {
        &self.repo
    }
}

#[async_trait]
impl<S, F> StateStorage<S> for SqliteStateStorage<S, F>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
    F: Fn(&DeviceId) -> S + Send + Sync,
{
    async fn load(&self, device_id: &DeviceId) -> Result<S, BridgeError> {
        Ok((self.factory)(device_id))
    }

    async fn restore(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
    ) -> Result<Option<Snapshot<S>>, BridgeError> {
        let Some(row) = self.repo.find_for_device(session_id, device_id)? else {
            return Ok(None);
        };
        match serde_json::from_value::<S>(row.state) {
            Ok(state) => Ok(Some(Snapshot {
                state,
                tree: row.tree,
                render_num: row.render_num,
            })),
            Err(e) => {
                // Written by an older state shape.
                warn!(session_id = %session_id, error_kind = "storage", error = %e, "discarding unreadable snapshot");
                self.repo.delete_for_device(session_id, device_id)?;
                Ok(None)
            }
        }
    }

    async fn persist(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
        snapshot: &Snapshot<S>,
    ) -> Result<(), BridgeError> {
        let state = serde_json::to_value(&snapshot.state)
            .map_err(|e| BridgeError::Storage(e.to_string()))?;
        self.repo.save(
            session_id,
            device_id,
            &state,
            snapshot.tree.as_ref(),
            snapshot.render_num,
        )?;
        Ok(())
    }

    async fn discard(&self, session_id: &SessionId, device_id: &DeviceId) -> Result<(), BridgeError> {
        self.repo.delete_for_device(session_id, device_id)?;
        Ok(())
    }
}
