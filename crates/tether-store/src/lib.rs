pub mod database;
pub mod error;
pub mod schema;
pub mod snapshots;
pub mod storage;

pub use database::Database;
pub use error::StoreError;
pub use snapshots::{SnapshotRepo, SnapshotRow};
pub use storage::SqliteStateStorage;
