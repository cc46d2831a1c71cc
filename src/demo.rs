//! Counter + todo list application served by the demo binary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tether_core::errors::BridgeError;
use tether_core::ids::{DeviceId, SessionId};
use tether_core::storage::StateStorage;
use tether_engine::{
    el, text, Access, App, ElementView, EnvironmentConfigurator, StateRouter, Subscription,
    TransitionApplier, View,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Page {
    #[default]
    Counter,
    Todos,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub id: u64,
    pub text: String,
    pub done: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Demo {
    pub page: Page,
    pub count: i64,
    pub todos: Vec<Todo>,
    pub next_id: u64,
}

impl Demo {
    fn add(&self, text: String) -> Self {
        let mut next = self.clone();
        next.todos.push(Todo {
            id: self.next_id,
            text,
            done: false,
        });
        next.next_id += 1;
        next
    }

    fn toggle(&self, id: u64) -> Self {
        let mut next = self.clone();
        if let Some(todo) = next.todos.iter_mut().find(|t| t.id == id) {
            todo.done = !todo.done;
        }
        next
    }

    fn remove(&self, id: u64) -> Self {
        let mut next = self.clone();
        next.todos.retain(|t| t.id != id);
        next
    }

    fn remaining(&self) -> usize {
        self.todos.iter().filter(|t| !t.done).count()
    }
}

pub fn app(storage: Arc<dyn StateStorage<Demo>>) -> App<Demo> {
    App::new(storage, view)
        .with_router(Arc::new(PageRouter))
        .with_environment(Arc::new(LogEnvironment))
}

pub fn view(state: &Demo) -> View<Demo> {
    let page = match state.page {
        Page::Counter => counter(state),
        Page::Todos => todos(state),
    };
    el("body")
        .child(
            el("nav")
                .child(nav_link("Counter", Page::Counter))
                .child(nav_link("Todos", Page::Todos)),
        )
        .child(el("main").child(page))
        .into()
}

fn nav_link(label: &str, page: Page) -> ElementView<Demo> {
    let href = match page {
        Page::Counter => "/",
        Page::Todos => "/todos",
    };
    el("a")
        .attr("href", href)
        .child(text(label))
        .on_prevent("click", move |a: Access<Demo>| async move {
            a.transition(move |s: &Demo| Demo {
                page,
                ..s.clone()
            })
            .await
        })
}

fn counter(state: &Demo) -> ElementView<Demo> {
    el("section")
        .attr("class", "counter")
        .child(el("h1").child(text(state.count.to_string())))
        .child(el("button").child(text("-")).on("click", |a: Access<Demo>| async move {
            a.transition(|s: &Demo| Demo {
                count: s.count - 1,
                ..s.clone()
            })
            .await
        }))
        .child(el("button").child(text("+")).on("click", |a: Access<Demo>| async move {
            a.transition(|s: &Demo| Demo {
                count: s.count + 1,
                ..s.clone()
            })
            .await
        }))
        .child(
            el("button")
                .child(text("+1 later"))
                .on("click", |a: Access<Demo>| async move {
                    a.after(Duration::from_secs(1), |s: &Demo| Demo {
                        count: s.count + 1,
                        ..s.clone()
                    });
                    Ok(())
                }),
        )
}

fn todos(state: &Demo) -> ElementView<Demo> {
    let items = state.todos.iter().map(|todo| {
        let id = todo.id;
        let label = el("span")
            .style(
                "text-decoration",
                if todo.done { "line-through" } else { "none" },
            )
            .child(text(todo.text.clone()));
        el("li")
            .child(label)
            .child(el("button").child(text("done")).on("click", move |a: Access<Demo>| async move {
                a.transition(move |s: &Demo| s.toggle(id)).await
            }))
            .child(el("button").child(text("x")).on("click", move |a: Access<Demo>| async move {
                a.transition(move |s: &Demo| s.remove(id)).await
            }))
    });

    el("section")
        .attr("class", "todos")
        .child(el("input").id("draft").attr("placeholder", "What needs doing?"))
        .child(el("button").child(text("Add")).on("click", add_todo))
        .child(el("ul").children(items))
        .child(el("p").child(text(format!("{} left", state.remaining()))))
}

async fn add_todo(a: Access<Demo>) -> Result<(), BridgeError> {
    let draft = a.value("draft").await?;
    let draft = draft.trim().to_owned();
    if draft.is_empty() {
        return Ok(());
    }
    a.set_property("draft", "value", "").await?;
    a.publish(json!({ "event": "todo_added", "text": draft })).await?;
    a.transition(move |s: &Demo| s.add(draft)).await
}

/// `/` is the counter, `/todos` the list.
pub struct PageRouter;

#[async_trait]
impl StateRouter<Demo> for PageRouter {
    fn to_url(&self, state: &Demo) -> Option<String> {
        Some(
            match state.page {
                Page::Counter => "/",
                Page::Todos => "/todos",
            }
            .to_owned(),
        )
    }

    async fn from_url(&self, _: &DeviceId, url: &str, previous: &Demo) -> Result<Demo, BridgeError> {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        let page = match path.trim_end_matches('/') {
            "" => Page::Counter,
            "/todos" => Page::Todos,
            other => return Err(BridgeError::TransitionFailure(format!("no page at {other}"))),
        };
        Ok(Demo {
            page,
            ..previous.clone()
        })
    }
}

/// Logs published messages in place of a real message bus.
pub struct LogEnvironment;

#[async_trait]
impl EnvironmentConfigurator<Demo> for LogEnvironment {
    async fn configure(
        &self,
        device_id: &DeviceId,
        session_id: &SessionId,
        _: TransitionApplier<Demo>,
    ) -> Result<Box<dyn Subscription>, BridgeError> {
        Ok(Box::new(LogSubscription {
            device_id: device_id.clone(),
            session_id: session_id.clone(),
        }))
    }
}

struct LogSubscription {
    device_id: DeviceId,
    session_id: SessionId,
}

impl Subscription for LogSubscription {
    fn on_message(&mut self, message: Value) {
        tracing::info!(device_id = %self.device_id, session_id = %self.session_id, %message, "Published");
    }

    fn on_destroy(&mut self) {
        tracing::debug!(device_id = %self.device_id, session_id = %self.session_id, "Subscription closed");
    }
}
