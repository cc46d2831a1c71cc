//! Event Router: resolve a client event to the handler captured by the last
//! render.

use std::collections::HashMap;

use tether_core::ids::ElementId;
use tether_core::path::Path;
use tether_core::tree::{anchor_of, Node};

use crate::view::Handler;

/// Where a handler is attached: the nearest bound ancestor-or-self (if any),
/// the path from it down to the element, and the event type. With no bound
/// ancestor `relative` is the full document path.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct HandlerKey {
    pub anchor: Option<ElementId>,
    pub relative: Path,
    pub event_type: String,
}

pub struct HandlerTable<S> {
    entries: HashMap<HandlerKey, Handler<S>>,
}

impl<S> Default for HandlerTable<S> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<S> HandlerTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: HandlerKey, handler: Handler<S>) {
        self.entries.insert(key, handler);
    }

    pub fn get(&self, key: &HandlerKey) -> Option<&Handler<S>> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub enum Route<S> {
    Dispatch(HandlerKey, Handler<S>),
    /// Event was produced against an older render.
    Stale { current: u64 },
    NoNode,
    NoHandler(HandlerKey),
}

/// Resolve an event the client raised on the node at `path` while it
/// displayed render `render_num`.
pub fn route<S>(
    tree: Option<&Node>,
    handlers: &HandlerTable<S>,
    current_render: u64,
    render_num: u64,
    path: &Path,
    event_type: &str,
) -> Route<S> {
    if render_num != current_render {
        return Route::Stale {
            current: current_render,
        };
    }
    let Some((anchor, relative)) = tree.and_then(|t| anchor_of(t, path)) else {
        return Route::NoNode;
    };
    let key = HandlerKey {
        anchor,
        relative,
        event_type: event_type.to_owned(),
    };
    match handlers.get(&key) {
        Some(handler) => Route::Dispatch(key, handler.clone()),
        None => Route::NoHandler(key),
    }
}
