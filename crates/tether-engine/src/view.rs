//! View DSL and render.
//!
//! A `View<S>` is what application code returns for a state: the tree shape
//! plus the closures attached to it. [`render`] splits it into the plain
//! [`Node`] tree that gets diffed and the handler/delay tables the router
//! consults until the next render.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::warn;

use tether_core::errors::BridgeError;
use tether_core::ids::ElementId;
use tether_core::path::Path;
use tether_core::tree::{root_path, Element, EventSpec, Node};

use crate::access::Access;
use crate::delay::{DelayEntry, DelayKey};
use crate::router::{HandlerKey, HandlerTable};

/// Event handler or delayed callback body.
pub type Handler<S> =
    Arc<dyn Fn(Access<S>) -> BoxFuture<'static, Result<(), BridgeError>> + Send + Sync>;

/// Box an async closure as a [`Handler`].
pub fn handler<S, F, Fut>(f: F) -> Handler<S>
where
    F: Fn(Access<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BridgeError>> + Send + 'static,
{
    Arc::new(move |access| f(access).boxed())
}

pub enum View<S> {
    Element(ElementView<S>),
    Text(String),
    Void,
}

pub struct ElementView<S> {
    element: Element,
    children: Vec<View<S>>,
    handlers: Vec<(String, Handler<S>)>,
    delays: Vec<(Duration, Handler<S>)>,
}

pub fn el<S>(tag: impl Into<String>) -> ElementView<S> {
    ElementView {
        element: Element::new(tag),
        children: Vec::new(),
        handlers: Vec::new(),
        delays: Vec::new(),
    }
}

pub fn text<S>(content: impl Into<String>) -> View<S> {
    View::Text(content.into())
}

pub fn void<S>() -> View<S> {
    View::Void
}

impl<S> ElementView<S> {
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.element.attrs.push((key.into(), value.into()));
        self
    }

    pub fn style(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.element.styles.push((key.into(), value.into()));
        self
    }

    /// DOM property (e.g. `value`, `checked`) rather than an HTML attribute.
    pub fn prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.element.props.push((key.into(), value.into()));
        self
    }

    pub fn id(mut self, id: impl Into<ElementId>) -> Self {
        self.element.id = Some(id.into());
        self
    }

    pub fn child(mut self, child: impl Into<View<S>>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children<I, V>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<View<S>>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    pub fn on<F, Fut>(self, event_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(Access<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BridgeError>> + Send + 'static,
    {
        self.listen(event_type.into(), false, handler(f))
    }

    /// Like [`ElementView::on`], and the client calls `preventDefault()`.
    pub fn on_prevent<F, Fut>(self, event_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(Access<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BridgeError>> + Send + 'static,
    {
        self.listen(event_type.into(), true, handler(f))
    }

    fn listen(mut self, event_type: String, prevent_default: bool, h: Handler<S>) -> Self {
        if let Some(spec) = self
            .element
            .events
            .iter_mut()
            .find(|e| e.event_type == event_type)
        {
            spec.prevent_default = prevent_default;
            if let Some(slot) = self.handlers.iter_mut().find(|(t, _)| *t == event_type) {
                slot.1 = h;
            }
            return self;
        }
        self.element.events.push(EventSpec {
            event_type: event_type.clone(),
            prevent_default,
        });
        self.handlers.push((event_type, h));
        self
    }

    /// Run `f` once, `after` the element first appears. Re-renders that keep
    /// the element keep the timer; removing the element cancels it.
    pub fn delay<F, Fut>(mut self, after: Duration, f: F) -> Self
    where
        F: Fn(Access<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BridgeError>> + Send + 'static,
    {
        self.delays.push((after, handler(f)));
        self
    }
}

impl<S> From<ElementView<S>> for View<S> {
    fn from(el: ElementView<S>) -> Self {
        View::Element(el)
    }
}

impl<S> From<&str> for View<S> {
    fn from(s: &str) -> Self {
        View::Text(s.to_owned())
    }
}

impl<S> From<String> for View<S> {
    fn from(s: String) -> Self {
        View::Text(s)
    }
}

/// Output of one render.
pub struct Rendered<S> {
    pub tree: Node,
    pub handlers: HandlerTable<S>,
    pub delays: Vec<DelayEntry<S>>,
}

struct RenderCtx<S> {
    handlers: HandlerTable<S>,
    delays: Vec<DelayEntry<S>>,
    seen_ids: HashSet<ElementId>,
}

/// Render a view mounted at the application root.
pub fn render<S>(view: View<S>) -> Rendered<S> {
    let mut ctx = RenderCtx {
        handlers: HandlerTable::new(),
        delays: Vec::new(),
        seen_ids: HashSet::new(),
    };
    let tree = render_node(view, &root_path(), None, &mut ctx);
    Rendered {
        tree,
        handlers: ctx.handlers,
        delays: ctx.delays,
    }
}

fn render_node<S>(
    view: View<S>,
    path: &Path,
    anchor: Option<(&ElementId, &Path)>,
    ctx: &mut RenderCtx<S>,
) -> Node {
    let ev = match view {
        View::Text(text) => return Node::Text { text },
        View::Void => return Node::Void,
        View::Element(ev) => ev,
    };
    let ElementView {
        mut element,
        children,
        handlers,
        delays,
    } = ev;

    // A bound id must name at most one node per render.
    if let Some(id) = element.id.take() {
        if ctx.seen_ids.insert(id.clone()) {
            element.id = Some(id);
        } else {
            warn!(element_id = %id, path = %path, "duplicate element id, binding ignored");
        }
    }

    let own_anchor = element.id.clone();
    let (anchor_id, relative) = match (&own_anchor, anchor) {
        (Some(id), _) => (Some(id.clone()), Path::root()),
        (None, Some((id, anchor_path))) => (
            Some(id.clone()),
            path.relative_to(anchor_path).unwrap_or_default(),
        ),
        (None, None) => (None, path.clone()),
    };

    for (event_type, h) in handlers {
        ctx.handlers.insert(
            HandlerKey {
                anchor: anchor_id.clone(),
                relative: relative.clone(),
                event_type,
            },
            h,
        );
    }
    for (index, (after, h)) in delays.into_iter().enumerate() {
        ctx.delays.push(DelayEntry {
            key: DelayKey {
                anchor: anchor_id.clone(),
                relative: relative.clone(),
                index: index as u32,
            },
            after,
            handler: h,
        });
    }

    let child_anchor = match &own_anchor {
        Some(id) => Some((id, path)),
        None => anchor,
    };
    element.children = children
        .into_iter()
        .enumerate()
        .map(|(i, child)| render_node(child, &path.child(i as u32), child_anchor, ctx))
        .collect();
    Node::Element(element)
}
