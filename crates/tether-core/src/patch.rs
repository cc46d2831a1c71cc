//! Patch operations: the atomic, ordered instructions that turn the tree a
//! client has applied into the newly rendered one.
//!
//! Invariants:
//! - Operations are applied in order; each path refers to the tree as already
//!   mutated by the operations before it in the same sequence.
//! - `Create*` inserts at the index named by the last path component, shifting
//!   later siblings right. `Remove` shifts them left.
//! - Element names and attribute keys are passed through verbatim.

use serde::{Deserialize, Serialize};

use crate::path::Path;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
    CreateElement {
        path: Path,
        tag: String,
    },
    CreateText {
        path: Path,
        text: String,
    },
    Remove {
        path: Path,
    },
    SetAttribute {
        path: Path,
        key: String,
        value: String,
        is_property: bool,
    },
    RemoveAttribute {
        path: Path,
        key: String,
    },
    SetStyle {
        path: Path,
        key: String,
        value: String,
    },
    RemoveStyle {
        path: Path,
        key: String,
    },
    AddEventListener {
        path: Path,
        event_type: String,
        prevent_default: bool,
    },
    RemoveEventListener {
        path: Path,
        event_type: String,
    },
    /// Imperative property write issued by a handler; never produced by diffing.
    SetProperty {
        path: Path,
        key: String,
        value: String,
    },
}

impl PatchOp {
    pub fn path(&self) -> &Path {
        match self {
            Self::CreateElement { path, .. }
            | Self::CreateText { path, .. }
            | Self::Remove { path }
            | Self::SetAttribute { path, .. }
            | Self::RemoveAttribute { path, .. }
            | Self::SetStyle { path, .. }
            | Self::RemoveStyle { path, .. }
            | Self::AddEventListener { path, .. }
            | Self::RemoveEventListener { path, .. }
            | Self::SetProperty { path, .. } => path,
        }
    }

    /// Whether the operation changes tree shape (as opposed to node content).
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::CreateElement { .. } | Self::CreateText { .. } | Self::Remove { .. }
        )
    }

    /// Same operation re-addressed under `prefix`.
    pub fn prefixed(mut self, prefix: &Path) -> Self {
        let path = match &mut self {
            Self::CreateElement { path, .. }
            | Self::CreateText { path, .. }
            | Self::Remove { path }
            | Self::SetAttribute { path, .. }
            | Self::RemoveAttribute { path, .. }
            | Self::SetStyle { path, .. }
            | Self::RemoveStyle { path, .. }
            | Self::AddEventListener { path, .. }
            | Self::RemoveEventListener { path, .. }
            | Self::SetProperty { path, .. } => path,
        };
        *path = path.prefixed(prefix);
        self
    }
}
