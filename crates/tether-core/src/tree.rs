//! Immutable Tree Model: what one render of the application looks like.
//!
//! The tree is plain data. Event handlers and delayed callbacks live in the
//! engine's handler tables, keyed by where they are attached; the tree only
//! records which listeners the client must install.

use serde::{Deserialize, Serialize};

use crate::ids::ElementId;
use crate::path::Path;

/// Index of the application root inside the document container.
pub const ROOT_INDEX: u32 = 0;

/// Path of the application root node.
pub fn root_path() -> Path {
    Path::root().child(ROOT_INDEX)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Element(Element),
    Text { text: String },
    /// Placeholder that renders nothing but still occupies a child slot.
    Void,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub styles: Vec<(String, String)>,
    pub props: Vec<(String, String)>,
    pub children: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ElementId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventSpec>,
}

/// A listener the client must install on an element.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventSpec {
    pub event_type: String,
    pub prevent_default: bool,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        lookup(&self.attrs, key)
    }

    pub fn style(&self, key: &str) -> Option<&str> {
        lookup(&self.styles, key)
    }

    pub fn prop(&self, key: &str) -> Option<&str> {
        lookup(&self.props, key)
    }

    pub fn event(&self, event_type: &str) -> Option<&EventSpec> {
        self.events.iter().find(|e| e.event_type == event_type)
    }
}

/// First-occurrence lookup in an ordered key/value list.
pub fn lookup<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Self::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn children(&self) -> &[Node] {
        match self {
            Self::Element(el) => &el.children,
            _ => &[],
        }
    }

    pub fn bound_id(&self) -> Option<&ElementId> {
        self.as_element().and_then(|el| el.id.as_ref())
    }

    /// Node at `rel`, relative to `self` (the empty path is `self`).
    pub fn descendant(&self, rel: &Path) -> Option<&Node> {
        let mut node = self;
        for &index in rel.indices() {
            node = node.children().get(index as usize)?;
        }
        Some(node)
    }

    /// Path of the element bound to `id`, relative to `self`.
    pub fn find_bound(&self, id: &ElementId) -> Option<Path> {
        if self.bound_id() == Some(id) {
            return Some(Path::root());
        }
        for (index, child) in self.children().iter().enumerate() {
            if let Some(rel) = child.find_bound(id) {
                return Some(rel.prefixed(&Path::root().child(index as u32)));
            }
        }
        None
    }

    /// Number of nodes in the subtree, `self` included.
    pub fn size(&self) -> usize {
        1 + self.children().iter().map(Node::size).sum::<usize>()
    }
}

/// Resolve a document path (as sent by the client) against the mounted root.
pub fn node_at<'a>(root: &'a Node, path: &Path) -> Option<&'a Node> {
    let (&first, rest) = path.indices().split_first()?;
    if first != ROOT_INDEX {
        return None;
    }
    root.descendant(&Path::from_indices(rest.to_vec()))
}

/// Document path of the element bound to `id`.
pub fn path_of(root: &Node, id: &ElementId) -> Option<Path> {
    root.find_bound(id).map(|rel| rel.prefixed(&root_path()))
}

/// Nearest bound ancestor-or-self of the node at `path`, and the path from it
/// down to the node. With no bound ancestor the anchor is `None` and the
/// relative path is the full document path.
pub fn anchor_of(root: &Node, path: &Path) -> Option<(Option<ElementId>, Path)> {
    node_at(root, path)?;
    let mut anchor: Option<(ElementId, usize)> = None;
    let mut node = root;
    if let Some(id) = node.bound_id() {
        anchor = Some((id.clone(), 1));
    }
    for (depth, &index) in path.indices().iter().enumerate().skip(1) {
        node = node.children().get(index as usize)?;
        if let Some(id) = node.bound_id() {
            anchor = Some((id.clone(), depth + 1));
        }
    }
    Some(match anchor {
        Some((id, depth)) => (
            Some(id),
            Path::from_indices(path.indices()[depth..].to_vec()),
        ),
        None => (None, path.clone()),
    })
}
