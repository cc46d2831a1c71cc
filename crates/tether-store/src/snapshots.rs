use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tether_core::ids::{DeviceId, SessionId};
use tether_core::tree::Node;

use crate::database::Database;
use crate::error::StoreError;

/// A persisted session snapshot. State is kept as raw JSON so the repo does
/// not need to know the application's state type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub session_id: SessionId,
    pub device_id: DeviceId,
    pub state: serde_json::Value,
    pub tree: Option<Node>,
    pub render_num: u64,
    pub created_at: String,
    pub updated_at: String,
}

pub struct SnapshotRepo {
    db: Database,
}

impl SnapshotRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the snapshot for a session. A session id already
    /// owned by another device is left untouched.
    #[instrument(skip(self, state, tree), fields(session_id = %session_id, device_id = %device_id))]
    pub fn save(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
        state: &serde_json::Value,
        tree: Option<&Node>,
        render_num: u64,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let state_json = serde_json::to_string(state)?;
        let tree_json = tree.map(serde_json::to_string).transpose()?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO snapshots (session_id, device_id, state, tree, render_num, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(session_id) DO UPDATE SET
                     state = excluded.state,
                     tree = excluded.tree,
                     render_num = excluded.render_num,
                     updated_at = excluded.updated_at
                 WHERE snapshots.device_id = excluded.device_id",
                rusqlite::params![
                    session_id.as_str(),
                    device_id.as_str(),
                    state_json,
                    tree_json,
                    render_num as i64,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn get(&self, session_id: &SessionId) -> Result<SnapshotRow, StoreError> {
        self.find(session_id)?
            .ok_or_else(|| StoreError::NotFound(format!("snapshot {session_id}")))
    }

    pub fn find(&self, session_id: &SessionId) -> Result<Option<SnapshotRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, device_id, state, tree, render_num, created_at, updated_at
                 FROM snapshots WHERE session_id = ?1",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_snapshot(row).map(Some),
                None => Ok(None),
            }
        })
    }

    /// The snapshot for a session, only if `device_id` owns it.
    pub fn find_for_device(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
    ) -> Result<Option<SnapshotRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, device_id, state, tree, render_num, created_at, updated_at
                 FROM snapshots WHERE session_id = ?1 AND device_id = ?2",
            )?;
            let mut rows = stmt.query([session_id.as_str(), device_id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_snapshot(row).map(Some),
                None => Ok(None),
            }
        })
    }

    /// Session ids with a snapshot for this device, most recently updated first.
    pub fn list_for_device(&self, device_id: &DeviceId) -> Result<Vec<SessionId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id FROM snapshots WHERE device_id = ?1 ORDER BY updated_at DESC",
            )?;
            let ids = stmt
                .query_map([device_id.as_str()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids.into_iter().map(SessionId::from_raw).collect())
        })
    }

    pub fn delete(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM snapshots WHERE session_id = ?1",
                [session_id.as_str()],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn delete_for_device(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM snapshots WHERE session_id = ?1 AND device_id = ?2",
                [session_id.as_str(), device_id.as_str()],
            )?;
            Ok(changed > 0)
        })
    }

    /// Drop snapshots not updated since `cutoff` (RFC3339). Returns how many.
    pub fn prune_before(&self, cutoff: &str) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM snapshots WHERE updated_at < ?1", [cutoff])?)
        })
    }
}

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> Result<SnapshotRow, StoreError> {
    let state_json: String = row.get(2)?;
    let tree_json: Option<String> = row.get(3)?;
    let render_num: i64 = row.get(4)?;
    Ok(SnapshotRow {
        session_id: SessionId::from_raw(row.get::<_, String>(0)?),
        device_id: DeviceId::from_raw(row.get::<_, String>(1)?),
        state: serde_json::from_str(&state_json)?,
        tree: tree_json.as_deref().map(serde_json::from_str).transpose()?,
        render_num: render_num.max(0) as u64,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}
