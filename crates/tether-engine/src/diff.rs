//! Diff Engine.
//!
//! Positional, top-down comparison of two trees. No move detection: a
//! reordered tail is removed and recreated. Operation order matters, each path
//! is valid against the tree as mutated by the operations before it:
//!
//! - a node replaced in place is removed first, then recreated at the same path;
//! - surplus new children are created in ascending index order;
//! - surplus old children are removed from the last one backwards.

use std::collections::HashSet;

use tether_core::patch::PatchOp;
use tether_core::path::Path;
use tether_core::tree::{lookup, root_path, Element, EventSpec, Node};

/// Operations that turn `old` (or an empty document, on first render) into
/// `new`, for a tree mounted at the application root.
pub fn diff(old: Option<&Node>, new: &Node) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_at(&root_path(), old, new, &mut ops);
    ops
}

/// Diff a subtree mounted at `path`, appending to `ops`.
///
/// Used for the application root and for embedding separately rendered
/// subtrees into a parent's sequence.
pub fn diff_at(path: &Path, old: Option<&Node>, new: &Node, ops: &mut Vec<PatchOp>) {
    let Some(old) = old else {
        create(path, new, ops);
        return;
    };
    match (old, new) {
        (Node::Element(a), Node::Element(b)) if a.tag == b.tag => diff_element(path, a, b, ops),
        (Node::Text { text: a }, Node::Text { text: b }) if a == b => {}
        (Node::Void, Node::Void) => {}
        _ => {
            ops.push(PatchOp::Remove { path: path.clone() });
            create(path, new, ops);
        }
    }
}

fn create(path: &Path, node: &Node, ops: &mut Vec<PatchOp>) {
    match node {
        Node::Text { text } => ops.push(PatchOp::CreateText {
            path: path.clone(),
            text: text.clone(),
        }),
        Node::Void => ops.push(PatchOp::CreateText {
            path: path.clone(),
            text: String::new(),
        }),
        Node::Element(el) => {
            ops.push(PatchOp::CreateElement {
                path: path.clone(),
                tag: el.tag.clone(),
            });
            for (key, value) in first_occurrences(&el.attrs) {
                ops.push(PatchOp::SetAttribute {
                    path: path.clone(),
                    key: key.clone(),
                    value: value.clone(),
                    is_property: false,
                });
            }
            for (key, value) in first_occurrences(&el.styles) {
                ops.push(PatchOp::SetStyle {
                    path: path.clone(),
                    key: key.clone(),
                    value: value.clone(),
                });
            }
            for (key, value) in first_occurrences(&el.props) {
                ops.push(PatchOp::SetAttribute {
                    path: path.clone(),
                    key: key.clone(),
                    value: value.clone(),
                    is_property: true,
                });
            }
            for spec in first_listeners(&el.events) {
                ops.push(PatchOp::AddEventListener {
                    path: path.clone(),
                    event_type: spec.event_type.clone(),
                    prevent_default: spec.prevent_default,
                });
            }
            for (index, child) in el.children.iter().enumerate() {
                create(&path.child(index as u32), child, ops);
            }
        }
    }
}

fn diff_element(path: &Path, old: &Element, new: &Element, ops: &mut Vec<PatchOp>) {
    diff_pairs(&old.attrs, &new.attrs, ops, |key, value| match value {
        Some(value) => PatchOp::SetAttribute {
            path: path.clone(),
            key,
            value,
            is_property: false,
        },
        None => PatchOp::RemoveAttribute {
            path: path.clone(),
            key,
        },
    });
    diff_pairs(&old.styles, &new.styles, ops, |key, value| match value {
        Some(value) => PatchOp::SetStyle {
            path: path.clone(),
            key,
            value,
        },
        None => PatchOp::RemoveStyle {
            path: path.clone(),
            key,
        },
    });
    // DOM properties can't be deleted, only reset.
    diff_pairs(&old.props, &new.props, ops, |key, value| PatchOp::SetAttribute {
        path: path.clone(),
        key,
        value: value.unwrap_or_default(),
        is_property: true,
    });

    for spec in first_listeners(&new.events) {
        if old.event(&spec.event_type) != Some(spec) {
            ops.push(PatchOp::AddEventListener {
                path: path.clone(),
                event_type: spec.event_type.clone(),
                prevent_default: spec.prevent_default,
            });
        }
    }
    for spec in first_listeners(&old.events) {
        if new.event(&spec.event_type).is_none() {
            ops.push(PatchOp::RemoveEventListener {
                path: path.clone(),
                event_type: spec.event_type.clone(),
            });
        }
    }

    let shared = old.children.len().min(new.children.len());
    for index in 0..shared {
        diff_at(
            &path.child(index as u32),
            Some(&old.children[index]),
            &new.children[index],
            ops,
        );
    }
    for (index, child) in new.children.iter().enumerate().skip(shared) {
        create(&path.child(index as u32), child, ops);
    }
    for index in (shared..old.children.len()).rev() {
        ops.push(PatchOp::Remove {
            path: path.child(index as u32),
        });
    }
}

/// Key-by-key comparison of two ordered maps. `make(key, Some(v))` is a set,
/// `make(key, None)` a removal.
fn diff_pairs<F>(old: &[(String, String)], new: &[(String, String)], ops: &mut Vec<PatchOp>, make: F)
where
    F: Fn(String, Option<String>) -> PatchOp,
{
    for (key, value) in first_occurrences(new) {
        if lookup(old, key) != Some(value.as_str()) {
            ops.push(make(key.clone(), Some(value.clone())));
        }
    }
    for (key, _) in first_occurrences(old) {
        if lookup(new, key).is_none() {
            ops.push(make(key.clone(), None));
        }
    }
}

fn first_occurrences(pairs: &[(String, String)]) -> impl Iterator<Item = &(String, String)> {
    let mut seen = HashSet::new();
    pairs.iter().filter(move |(k, _)| seen.insert(k.as_str()))
}

/// One listener per event type, the first declared wins.
fn first_listeners(events: &[EventSpec]) -> impl Iterator<Item = &EventSpec> {
    let mut seen = HashSet::new();
    events.iter().filter(move |e| seen.insert(e.event_type.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::LiveTree;

    fn p(indices: &[u32]) -> Path {
        Path::from_indices(indices.to_vec())
    }

    fn elem(tag: &str, children: Vec<Node>) -> Node {
        Node::Element(Element {
            children,
            ..Element::new(tag)
        })
    }

    fn with(node: Node, f: impl FnOnce(&mut Element)) -> Node {
        match node {
            Node::Element(mut el) => {
                f(&mut el);
                Node::Element(el)
            }
            other => other,
        }
    }

    fn assert_round_trip(a: &Node, b: &Node) {
        let mut live = LiveTree::from_model(a);
        live.apply_all(&diff(Some(a), b)).unwrap();
        assert_eq!(live, LiveTree::from_model(b), "diff({a:?}, {b:?})");
    }

    fn sample_trees() -> Vec<Node> {
        vec![
            elem("body", vec![]),
            elem("body", vec![Node::text("0")]),
            elem("body", vec![Node::text("1"), Node::Void]),
            elem("div", vec![Node::text("x")]),
            elem(
                "body",
                vec![
                    with(elem("ul", vec![elem("li", vec![Node::text("a")])]), |el| {
                        el.attrs.push(("class".into(), "list".into()));
                    }),
                    Node::text("tail"),
                ],
            ),
            elem(
                "body",
                vec![
                    elem("p", vec![]),
                    with(elem("ul", vec![]), |el| {
                        el.attrs.push(("class".into(), "todo".into()));
                        el.styles.push(("color".into(), "red".into()));
                    }),
                    Node::Void,
                ],
            ),
            with(elem("body", vec![elem("input", vec![])]), |el| {
                el.props.push(("value".into(), "typed".into()));
                el.events.push(EventSpec {
                    event_type: "click".into(),
                    prevent_default: false,
                });
            }),
            with(elem("body", vec![Node::Void, Node::text("z")]), |el| {
                el.events.push(EventSpec {
                    event_type: "click".into(),
                    prevent_default: true,
                });
                el.events.push(EventSpec {
                    event_type: "submit".into(),
                    prevent_default: true,
                });
            }),
        ]
    }

    #[test]
    fn first_render_is_pure_creation() {
        let tree = with(elem("body", vec![Node::text("hi"), Node::Void]), |el| {
            el.attrs.push(("class".into(), "app".into()));
            el.props.push(("value".into(), "v".into()));
            el.events.push(EventSpec {
                event_type: "click".into(),
                prevent_default: false,
            });
        });
        assert_eq!(
            diff(None, &tree),
            vec![
                PatchOp::CreateElement { path: p(&[0]), tag: "body".into() },
                PatchOp::SetAttribute {
                    path: p(&[0]),
                    key: "class".into(),
                    value: "app".into(),
                    is_property: false,
                },
                PatchOp::SetAttribute {
                    path: p(&[0]),
                    key: "value".into(),
                    value: "v".into(),
                    is_property: true,
                },
                PatchOp::AddEventListener {
                    path: p(&[0]),
                    event_type: "click".into(),
                    prevent_default: false,
                },
                PatchOp::CreateText { path: p(&[0, 0]), text: "hi".into() },
                PatchOp::CreateText { path: p(&[0, 1]), text: String::new() },
            ]
        );
    }

    #[test]
    fn identical_trees_produce_nothing() {
        for tree in sample_trees() {
            assert!(diff(Some(&tree), &tree).is_empty(), "{tree:?}");
        }
    }

    #[test]
    fn round_trip_between_every_pair() {
        let trees = sample_trees();
        for a in &trees {
            for b in &trees {
                assert_round_trip(a, b);
            }
        }
    }

    #[test]
    fn counter_text_change_is_remove_then_create() {
        let before = elem("body", vec![Node::text("0")]);
        let after = elem("body", vec![Node::text("1")]);
        assert_eq!(
            diff(Some(&before), &after),
            vec![
                PatchOp::Remove { path: p(&[0, 0]) },
                PatchOp::CreateText { path: p(&[0, 0]), text: "1".into() },
            ]
        );
    }

    #[test]
    fn appending_list_items_creates_only_the_new_one() {
        let mut tree = elem("ul", vec![]);
        for k in 0..3u32 {
            let next = match &tree {
                Node::Element(el) => {
                    let mut el = el.clone();
                    el.children.push(elem("li", vec![]));
                    Node::Element(el)
                }
                _ => unreachable!(),
            };
            assert_eq!(
                diff(Some(&tree), &next),
                vec![PatchOp::CreateElement { path: p(&[0, k]), tag: "li".into() }]
            );
            tree = next;
        }
    }

    #[test]
    fn tag_change_replaces_subtree() {
        let before = elem("body", vec![elem("p", vec![Node::text("a")])]);
        let after = elem("body", vec![elem("div", vec![Node::text("a")])]);
        assert_eq!(
            diff(Some(&before), &after),
            vec![
                PatchOp::Remove { path: p(&[0, 0]) },
                PatchOp::CreateElement { path: p(&[0, 0]), tag: "div".into() },
                PatchOp::CreateText { path: p(&[0, 0, 0]), text: "a".into() },
            ]
        );
    }

    #[test]
    fn surplus_children_are_removed_back_to_front() {
        let before = elem(
            "ul",
            vec![elem("li", vec![]), elem("li", vec![]), elem("li", vec![])],
        );
        let after = elem("ul", vec![elem("li", vec![])]);
        let ops = diff(Some(&before), &after);
        assert_eq!(
            ops,
            vec![
                PatchOp::Remove { path: p(&[0, 2]) },
                PatchOp::Remove { path: p(&[0, 1]) },
            ]
        );

        // Front to back would remove [0,1] and then find nothing at [0,2].
        let mut reversed = ops.clone();
        reversed.reverse();
        let mut live = LiveTree::from_model(&before);
        assert!(live.apply_all(&reversed).is_err());
    }

    #[test]
    fn replace_order_is_remove_before_create() {
        let before = elem("body", vec![Node::text("a"), Node::text("b")]);
        let after = elem("body", vec![Node::text("x"), Node::text("b")]);
        let ops = diff(Some(&before), &after);
        let mut reversed = ops.clone();
        reversed.reverse();

        let mut live = LiveTree::from_model(&before);
        live.apply_all(&reversed).unwrap();
        assert_ne!(live, LiveTree::from_model(&after));
        assert_round_trip(&before, &after);
    }

    #[test]
    fn insert_at_front_addresses_shifted_children() {
        let before = elem("ul", vec![Node::text("p0"), Node::text("p1")]);
        let after = elem(
            "ul",
            vec![Node::text("new"), Node::text("p0"), Node::text("p1")],
        );
        let ops = diff(Some(&before), &after);
        // Positional: every slot is rewritten and the tail lands at index 2.
        assert_eq!(
            ops,
            vec![
                PatchOp::Remove { path: p(&[0, 0]) },
                PatchOp::CreateText { path: p(&[0, 0]), text: "new".into() },
                PatchOp::Remove { path: p(&[0, 1]) },
                PatchOp::CreateText { path: p(&[0, 1]), text: "p0".into() },
                PatchOp::CreateText { path: p(&[0, 2]), text: "p1".into() },
            ]
        );
        assert_round_trip(&before, &after);
    }

    #[test]
    fn attribute_and_style_changes() {
        let before = with(elem("div", vec![]), |el| {
            el.attrs.push(("class".into(), "a".into()));
            el.attrs.push(("title".into(), "t".into()));
            el.styles.push(("color".into(), "red".into()));
        });
        let after = with(elem("div", vec![]), |el| {
            el.attrs.push(("class".into(), "b".into()));
            el.styles.push(("margin".into(), "0".into()));
        });
        assert_eq!(
            diff(Some(&before), &after),
            vec![
                PatchOp::SetAttribute {
                    path: p(&[0]),
                    key: "class".into(),
                    value: "b".into(),
                    is_property: false,
                },
                PatchOp::RemoveAttribute { path: p(&[0]), key: "title".into() },
                PatchOp::SetStyle { path: p(&[0]), key: "margin".into(), value: "0".into() },
                PatchOp::RemoveStyle { path: p(&[0]), key: "color".into() },
            ]
        );
    }

    #[test]
    fn removed_property_is_reset_to_empty() {
        let before = with(elem("input", vec![]), |el| {
            el.props.push(("value".into(), "typed".into()));
        });
        let after = elem("input", vec![]);
        assert_eq!(
            diff(Some(&before), &after),
            vec![PatchOp::SetAttribute {
                path: p(&[0]),
                key: "value".into(),
                value: String::new(),
                is_property: true,
            }]
        );
    }

    #[test]
    fn duplicate_keys_use_first_occurrence() {
        let tree = with(elem("div", vec![]), |el| {
            el.attrs.push(("class".into(), "first".into()));
            el.attrs.push(("class".into(), "second".into()));
        });
        let ops = diff(None, &tree);
        assert_eq!(ops.len(), 2);
        assert_eq!(
            ops[1],
            PatchOp::SetAttribute {
                path: p(&[0]),
                key: "class".into(),
                value: "first".into(),
                is_property: false,
            }
        );
        assert!(diff(Some(&tree), &tree).is_empty());
    }

    #[test]
    fn listener_changes() {
        let click = |prevent_default| EventSpec {
            event_type: "click".into(),
            prevent_default,
        };
        let before = with(elem("a", vec![]), |el| el.events.push(click(false)));
        let prevented = with(elem("a", vec![]), |el| el.events.push(click(true)));
        let none = elem("a", vec![]);

        assert_eq!(
            diff(Some(&before), &prevented),
            vec![PatchOp::AddEventListener {
                path: p(&[0]),
                event_type: "click".into(),
                prevent_default: true,
            }]
        );
        assert_eq!(
            diff(Some(&before), &none),
            vec![PatchOp::RemoveEventListener { path: p(&[0]), event_type: "click".into() }]
        );
    }

    #[test]
    fn repeated_listener_type_keeps_first() {
        let tree = with(elem("form", vec![]), |el| {
            el.events.push(EventSpec {
                event_type: "submit".into(),
                prevent_default: true,
            });
            el.events.push(EventSpec {
                event_type: "submit".into(),
                prevent_default: false,
            });
        });
        assert!(diff(Some(&tree), &tree).is_empty());
        assert_eq!(
            &diff(None, &tree)[1..],
            &[PatchOp::AddEventListener {
                path: p(&[0]),
                event_type: "submit".into(),
                prevent_default: true,
            }]
        );
    }

    #[test]
    fn void_and_text_swap_slots() {
        let before = elem("body", vec![Node::Void]);
        let after = elem("body", vec![Node::text("shown")]);
        assert_eq!(
            diff(Some(&before), &after),
            vec![
                PatchOp::Remove { path: p(&[0, 0]) },
                PatchOp::CreateText { path: p(&[0, 0]), text: "shown".into() },
            ]
        );
    }

    #[test]
    fn subtree_diff_is_prefixed() {
        let before = elem("span", vec![Node::text("1")]);
        let after = elem("span", vec![Node::text("2")]);
        let mut ops = vec![PatchOp::SetStyle {
            path: p(&[0]),
            key: "color".into(),
            value: "red".into(),
        }];
        diff_at(&p(&[0, 3]), Some(&before), &after, &mut ops);
        assert_eq!(
            &ops[1..],
            &[
                PatchOp::Remove { path: p(&[0, 3, 0]) },
                PatchOp::CreateText { path: p(&[0, 3, 0]), text: "2".into() },
            ]
        );
    }
}
