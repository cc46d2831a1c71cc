pub mod errors;
pub mod frame;
pub mod ids;
pub mod patch;
pub mod path;
pub mod storage;
pub mod tree;

pub use errors::BridgeError;
pub use frame::{Frame, Scalar};
pub use ids::{DeviceId, ElementId, SessionId};
pub use patch::PatchOp;
pub use path::Path;
pub use storage::{FactoryStorage, Snapshot, StateStorage};
pub use tree::{Element, EventSpec, Node};
