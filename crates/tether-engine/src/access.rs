//! The capability object handed to event handlers and delayed callbacks,
//! and the external transition entry point.
//!
//! Neither touches session data directly: every operation is a command
//! queued onto the session task, so it runs at the session's serialization
//! point.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use tether_core::errors::BridgeError;
use tether_core::ids::{DeviceId, ElementId, SessionId};

use crate::codec::ServerMessage;
use crate::report::{report, SessionScope};
use crate::session::{ClientRequest, Command};

/// A pure state update. Returning an error leaves the state untouched.
pub type Transition<S> = Box<dyn FnOnce(&S) -> Result<S, BridgeError> + Send>;

/// Turn an infallible update into a [`Transition`].
pub fn transition<S, F>(f: F) -> Transition<S>
where
    F: FnOnce(&S) -> S + Send + 'static,
{
    Box::new(move |s| Ok(f(s)))
}

/// Clonable handle for applying transitions from outside the session:
/// environments, timers, the connection manager.
pub struct TransitionApplier<S> {
    scope: SessionScope,
    tx: mpsc::Sender<Command<S>>,
}

impl<S> Clone for TransitionApplier<S> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<S: Send + 'static> TransitionApplier<S> {
    pub(crate) fn new(scope: SessionScope, tx: mpsc::Sender<Command<S>>) -> Self {
        Self { scope, tx }
    }

    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    /// Apply `t` and wait until it has been rendered (or rejected).
    pub async fn apply(&self, t: Transition<S>) -> Result<(), BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Transition {
                transition: t,
                reply: Some(reply),
            })
            .await
            .map_err(|_| BridgeError::SessionTerminated)?;
        rx.await.map_err(|_| BridgeError::SessionTerminated)?
    }

    /// Queue `t` without waiting. Failures are reported, not returned.
    pub fn enqueue(&self, t: Transition<S>) {
        let cmd = Command::Transition {
            transition: t,
            reply: None,
        };
        match self.tx.try_send(cmd) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(cmd)) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(cmd).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                report(&self.scope, &BridgeError::SessionTerminated, "enqueue transition");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// What a running handler may do.
pub struct Access<S> {
    scope: SessionScope,
    tx: mpsc::Sender<Command<S>>,
    property_timeout: Duration,
    event_data: String,
    cancel: CancellationToken,
}

impl<S> Clone for Access<S> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            tx: self.tx.clone(),
            property_timeout: self.property_timeout,
            event_data: self.event_data.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: Clone + Send + Sync + 'static> Access<S> {
    pub(crate) fn new(
        scope: SessionScope,
        tx: mpsc::Sender<Command<S>>,
        property_timeout: Duration,
        event_data: String,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scope,
            tx,
            property_timeout,
            event_data,
            cancel,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.scope.device_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.scope.session_id
    }

    /// Raw payload the client attached to the event (JSON text, possibly
    /// empty).
    pub fn event_data(&self) -> &str {
        &self.event_data
    }

    /// Event payload parsed as JSON, `Null` if absent or unparseable.
    pub fn event_json(&self) -> Value {
        serde_json::from_str(&self.event_data).unwrap_or(Value::Null)
    }

    async fn send(&self, cmd: Command<S>) -> Result<(), BridgeError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| BridgeError::SessionTerminated)
    }

    /// Current state, as of this point in the session's command order.
    pub async fn state(&self) -> Result<S, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ReadState { reply }).await?;
        rx.await.map_err(|_| BridgeError::SessionTerminated)
    }

    pub async fn transition<F>(&self, f: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&S) -> S + Send + 'static,
    {
        self.try_transition(move |s| Ok(f(s))).await
    }

    pub async fn try_transition<F>(&self, f: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&S) -> Result<S, BridgeError> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Transition {
            transition: Box::new(f),
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| BridgeError::SessionTerminated)?
    }

    /// Apply `f` once `after` has elapsed, unless the session ends first.
    pub fn after<F>(&self, after: Duration, f: F)
    where
        F: FnOnce(&S) -> S + Send + 'static,
    {
        let applier = TransitionApplier::new(self.scope.clone(), self.tx.clone());
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(after) => applier.enqueue(transition(f)),
            }
        });
    }

    async fn request(&self, request: ClientRequest) -> Result<String, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Request { request, reply }).await?;
        match tokio::time::timeout(self.property_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::SessionTerminated),
            Err(_) => Err(BridgeError::PropertyReadTimeout(self.property_timeout)),
        }
    }

    /// Read a DOM property of the element bound to `id`. Suspends until the
    /// client answers or the property timeout elapses.
    pub async fn property(
        &self,
        id: impl Into<ElementId>,
        name: impl Into<String>,
    ) -> Result<String, BridgeError> {
        self.request(ClientRequest::Property {
            id: id.into(),
            name: name.into(),
        })
        .await
    }

    pub async fn value(&self, id: impl Into<ElementId>) -> Result<String, BridgeError> {
        self.property(id, "value").await
    }

    pub async fn set_property(
        &self,
        id: impl Into<ElementId>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetProperty {
            id: id.into(),
            name: name.into(),
            value: value.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| BridgeError::SessionTerminated)?
    }

    /// Run `code` in the page and return its result as text.
    pub async fn evaluate(&self, code: impl Into<String>) -> Result<String, BridgeError> {
        self.request(ClientRequest::Evaluate { code: code.into() })
            .await
    }

    /// Hand `message` to the session's environment subscription.
    pub async fn publish(&self, message: Value) -> Result<(), BridgeError> {
        self.send(Command::Publish(message)).await
    }

    pub async fn redirect(&self, url: impl Into<String>) -> Result<(), BridgeError> {
        self.send(Command::Deliver(vec![ServerMessage::Redirect(url.into())]))
            .await
    }

    pub async fn set_title(&self, title: impl Into<String>) -> Result<(), BridgeError> {
        self.send(Command::Deliver(vec![ServerMessage::SetTitle(title.into())]))
            .await
    }
}
