//! Handler-free mirror of what the browser holds after applying patches.
//!
//! Applies [`PatchOp`]s with the same semantics as the client bridge, so a
//! patch sequence can be checked against the tree it was diffed towards.
//! Attribute, style and property maps are unordered here (the DOM does not
//! expose declaration order), and an empty property is the same as an unset
//! one.

use std::collections::BTreeMap;

use tether_core::errors::BridgeError;
use tether_core::patch::PatchOp;
use tether_core::path::Path;
use tether_core::tree::{root_path, Node};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LiveNode {
    Element(LiveElement),
    Text(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiveElement {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub styles: BTreeMap<String, String>,
    pub props: BTreeMap<String, String>,
    /// Listener type → prevent_default.
    pub listeners: BTreeMap<String, bool>,
    pub children: Vec<LiveNode>,
}

/// The document container: its children are addressed from the empty path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiveTree {
    children: Vec<LiveNode>,
}

impl LiveTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tree the client would hold after rendering `root` from scratch.
    pub fn from_model(root: &Node) -> Self {
        let mut tree = Self::new();
        tree.insert(&root_path(), convert(root)).ok();
        tree
    }

    pub fn children(&self) -> &[LiveNode] {
        &self.children
    }

    pub fn root(&self) -> Option<&LiveNode> {
        self.node(&root_path())
    }

    pub fn node(&self, path: &Path) -> Option<&LiveNode> {
        let (&first, rest) = path.indices().split_first()?;
        let mut node = self.children.get(first as usize)?;
        for &index in rest {
            match node {
                LiveNode::Element(el) => node = el.children.get(index as usize)?,
                _ => return None,
            }
        }
        Some(node)
    }

    pub fn clear(&mut self) {
        self.children.clear();
    }

    pub fn apply_all(&mut self, ops: &[PatchOp]) -> Result<(), BridgeError> {
        ops.iter().try_for_each(|op| self.apply(op))
    }

    pub fn apply(&mut self, op: &PatchOp) -> Result<(), BridgeError> {
        match op {
            PatchOp::CreateElement { path, tag } => self.insert(
                path,
                LiveNode::Element(LiveElement {
                    tag: tag.clone(),
                    ..Default::default()
                }),
            ),
            PatchOp::CreateText { path, text } => self.insert(path, LiveNode::Text(text.clone())),
            PatchOp::Remove { path } => {
                let (siblings, index) = self.slot(path)?;
                if index >= siblings.len() {
                    return Err(missing(path));
                }
                siblings.remove(index);
                Ok(())
            }
            PatchOp::SetAttribute {
                path,
                key,
                value,
                is_property,
            } => {
                let el = self.element_mut(path)?;
                if *is_property {
                    set_prop(&mut el.props, key, value);
                } else {
                    el.attrs.insert(key.clone(), value.clone());
                }
                Ok(())
            }
            PatchOp::SetProperty { path, key, value } => {
                set_prop(&mut self.element_mut(path)?.props, key, value);
                Ok(())
            }
            PatchOp::RemoveAttribute { path, key } => {
                self.element_mut(path)?.attrs.remove(key);
                Ok(())
            }
            PatchOp::SetStyle { path, key, value } => {
                self.element_mut(path)?
                    .styles
                    .insert(key.clone(), value.clone());
                Ok(())
            }
            PatchOp::RemoveStyle { path, key } => {
                self.element_mut(path)?.styles.remove(key);
                Ok(())
            }
            PatchOp::AddEventListener {
                path,
                event_type,
                prevent_default,
            } => {
                self.element_mut(path)?
                    .listeners
                    .insert(event_type.clone(), *prevent_default);
                Ok(())
            }
            PatchOp::RemoveEventListener { path, event_type } => {
                self.element_mut(path)?.listeners.remove(event_type);
                Ok(())
            }
        }
    }

    fn insert(&mut self, path: &Path, node: LiveNode) -> Result<(), BridgeError> {
        let (siblings, index) = self.slot(path)?;
        if index > siblings.len() {
            return Err(missing(path));
        }
        siblings.insert(index, node);
        Ok(())
    }

    /// Sibling list containing `path`, and the index within it.
    fn slot(&mut self, path: &Path) -> Result<(&mut Vec<LiveNode>, usize), BridgeError> {
        let (&last, ancestors) = path.indices().split_last().ok_or_else(|| missing(path))?;
        let mut siblings = &mut self.children;
        for &index in ancestors {
            match siblings.get_mut(index as usize) {
                Some(LiveNode::Element(el)) => siblings = &mut el.children,
                _ => return Err(missing(path)),
            }
        }
        Ok((siblings, last as usize))
    }

    fn element_mut(&mut self, path: &Path) -> Result<&mut LiveElement, BridgeError> {
        let (siblings, index) = self.slot(path)?;
        match siblings.get_mut(index) {
            Some(LiveNode::Element(el)) => Ok(el),
            _ => Err(missing(path)),
        }
    }
}

fn set_prop(props: &mut BTreeMap<String, String>, key: &str, value: &str) {
    if value.is_empty() {
        props.remove(key);
    } else {
        props.insert(key.to_owned(), value.to_owned());
    }
}

fn missing(path: &Path) -> BridgeError {
    BridgeError::protocol(format!("no node at path {path:?}"))
}

fn convert(node: &Node) -> LiveNode {
    match node {
        Node::Text { text } => LiveNode::Text(text.clone()),
        Node::Void => LiveNode::Text(String::new()),
        Node::Element(el) => {
            let mut live = LiveElement {
                tag: el.tag.clone(),
                ..Default::default()
            };
            for (k, v) in &el.attrs {
                live.attrs.entry(k.clone()).or_insert_with(|| v.clone());
            }
            for (k, v) in &el.styles {
                live.styles.entry(k.clone()).or_insert_with(|| v.clone());
            }
            for (k, v) in &el.props {
                if !v.is_empty() && !live.props.contains_key(k) {
                    live.props.insert(k.clone(), v.clone());
                }
            }
            for spec in &el.events {
                live.listeners
                    .insert(spec.event_type.clone(), spec.prevent_default);
            }
            live.children = el.children.iter().map(convert).collect();
            LiveNode::Element(live)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::tree::Element;

    fn p(indices: &[u32]) -> Path {
        Path::from_indices(indices.to_vec())
    }

    #[test]
    fn creates_insert_and_shift_siblings() {
        let mut live = LiveTree::new();
        live.apply_all(&[
            PatchOp::CreateElement { path: p(&[0]), tag: "ul".into() },
            PatchOp::CreateText { path: p(&[0, 0]), text: "b".into() },
            PatchOp::CreateText { path: p(&[0, 0]), text: "a".into() },
        ])
        .unwrap();
        assert_eq!(live.node(&p(&[0, 0])), Some(&LiveNode::Text("a".into())));
        assert_eq!(live.node(&p(&[0, 1])), Some(&LiveNode::Text("b".into())));
    }

    #[test]
    fn create_past_the_end_is_rejected() {
        let mut live = LiveTree::new();
        let err = live
            .apply(&PatchOp::CreateText { path: p(&[1]), text: "x".into() })
            .unwrap_err();
        assert!(matches!(err, BridgeError::ProtocolViolation(_)));
    }

    #[test]
    fn attribute_ops_need_an_element() {
        let mut live = LiveTree::new();
        live.apply(&PatchOp::CreateText { path: p(&[0]), text: "t".into() })
            .unwrap();
        assert!(live
            .apply(&PatchOp::SetStyle {
                path: p(&[0]),
                key: "color".into(),
                value: "red".into(),
            })
            .is_err());
    }

    #[test]
    fn empty_property_is_unset() {
        let mut live = LiveTree::new();
        live.apply_all(&[
            PatchOp::CreateElement { path: p(&[0]), tag: "input".into() },
            PatchOp::SetProperty {
                path: p(&[0]),
                key: "value".into(),
                value: "typed".into(),
            },
        ])
        .unwrap();
        let Some(LiveNode::Element(el)) = live.root() else {
            panic!("no root element");
        };
        assert_eq!(el.props.get("value").map(String::as_str), Some("typed"));

        live.apply(&PatchOp::SetAttribute {
            path: p(&[0]),
            key: "value".into(),
            value: String::new(),
            is_property: true,
        })
        .unwrap();
        assert_eq!(live, LiveTree::from_model(&Node::Element(Element::new("input"))));
    }

    #[test]
    fn clear_empties_container() {
        let mut live = LiveTree::from_model(&Node::text("x"));
        assert!(live.root().is_some());
        live.clear();
        assert!(live.children().is_empty());
    }
}
