//! Session State Machine.
//!
//! One tokio task per session owns its state, last-sent tree, handler table,
//! outbound buffers and correlation table. Everything else talks to it
//! through [`SessionHandle`] commands, so all transitions, renders and diffs
//! for one session happen in order without locks. Only the status cell is
//! shared, for the connection manager's sweeps.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use tether_core::errors::BridgeError;
use tether_core::frame::Frame;
use tether_core::ids::ElementId;
use tether_core::patch::PatchOp;
use tether_core::storage::Snapshot;
use tether_core::tree::{path_of, Node};

use crate::access::{Access, Transition, TransitionApplier};
use crate::app::App;
use crate::boundary::Subscription;
use crate::codec::{decode_client, ClientMessage, ServerMessage};
use crate::config::EngineConfig;
use crate::delay::{DelayKey, DelayScheduler};
use crate::diff::diff;
use crate::outbox::{AttachPlan, Outbox, SendOutcome, Transport, TransportKind};
use crate::report::{panic_message, report, SessionScope};
use crate::router::{route, HandlerTable, Route};
use crate::view::{render, Handler, Rendered};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Task started, state not yet attached to a transport.
    Connecting,
    Active,
    /// No transport; state retained until the idle timeout.
    Detached,
    Expired,
    Terminated,
}

impl Phase {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Expired | Self::Terminated)
    }
}

#[derive(Clone, Debug)]
pub struct SessionStatus {
    pub phase: Phase,
    pub render_num: u64,
    pub transport: Option<TransportKind>,
    pub detached_at: Option<Instant>,
    pub last_activity: Instant,
}

pub(crate) enum ClientRequest {
    Property { id: ElementId, name: String },
    Evaluate { code: String },
}

pub(crate) enum Command<S> {
    Attach {
        transport: Transport,
        has_tree: bool,
    },
    Detach {
        transport_id: u64,
        reason: String,
    },
    Inbound(Frame),
    InboundText(String),
    Deliver(Vec<ServerMessage>),
    Transition {
        transition: Transition<S>,
        reply: Option<oneshot::Sender<Result<(), BridgeError>>>,
    },
    ReadState {
        reply: oneshot::Sender<S>,
    },
    Request {
        request: ClientRequest,
        reply: oneshot::Sender<Result<String, BridgeError>>,
    },
    SetProperty {
        id: ElementId,
        name: String,
        value: String,
        reply: oneshot::Sender<Result<(), BridgeError>>,
    },
    Publish(Value),
    Subscribed(Result<Box<dyn Subscription>, BridgeError>),
    Expire,
    Terminate {
        reason: String,
    },
}

/// Handle on a running session. Cheap to clone.
#[derive(Debug)]
pub struct SessionHandle<S> {
    scope: SessionScope,
    tx: mpsc::Sender<Command<S>>,
    status: Arc<RwLock<SessionStatus>>,
    cancel: CancellationToken,
}

impl<S> Clone for SessionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            tx: self.tx.clone(),
            status: self.status.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: Clone + Send + Sync + 'static> SessionHandle<S> {
    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    pub fn phase(&self) -> Phase {
        self.status.read().phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase().is_finished() || self.tx.is_closed()
    }

    pub fn applier(&self) -> TransitionApplier<S> {
        TransitionApplier::new(self.scope.clone(), self.tx.clone())
    }

    fn gone(&self) -> BridgeError {
        match self.phase() {
            Phase::Expired => BridgeError::SessionExpired,
            _ => BridgeError::SessionTerminated,
        }
    }

    async fn send(&self, cmd: Command<S>) -> Result<(), BridgeError> {
        self.tx.send(cmd).await.map_err(|_| self.gone())
    }

    /// Bind `transport`. `has_tree` is the client's claim that it still
    /// displays what this session last sent.
    pub async fn attach(&self, transport: Transport, has_tree: bool) -> Result<(), BridgeError> {
        self.send(Command::Attach {
            transport,
            has_tree,
        })
        .await
    }

    /// Unbind the transport with this id, if it is still the current one.
    pub async fn detach(&self, transport_id: u64, reason: impl Into<String>) -> Result<(), BridgeError> {
        self.send(Command::Detach {
            transport_id,
            reason: reason.into(),
        })
        .await
    }

    /// Feed a frame received from the client.
    pub async fn dispatch(&self, frame: Frame) -> Result<(), BridgeError> {
        self.send(Command::Inbound(frame)).await
    }

    /// Feed a frame as the client's JSON text. Unparseable text counts as a
    /// protocol violation, like an undecodable frame.
    pub async fn dispatch_text(&self, raw: impl Into<String>) -> Result<(), BridgeError> {
        self.send(Command::InboundText(raw.into())).await
    }

    /// Push server messages to the client, queued while detached.
    pub async fn deliver(&self, messages: Vec<ServerMessage>) -> Result<(), BridgeError> {
        self.send(Command::Deliver(messages)).await
    }

    pub async fn apply(&self, transition: Transition<S>) -> Result<(), BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Transition {
            transition,
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| self.gone())?
    }

    pub async fn state(&self) -> Result<S, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ReadState { reply }).await?;
        rx.await.map_err(|_| self.gone())
    }

    pub async fn expire(&self) -> Result<(), BridgeError> {
        self.send(Command::Expire).await
    }

    pub async fn terminate(&self, reason: impl Into<String>) -> Result<(), BridgeError> {
        self.send(Command::Terminate {
            reason: reason.into(),
        })
        .await
    }

    /// Stop the task without discarding persisted state (process shutdown).
    pub fn halt(&self) {
        self.cancel.cancel();
    }
}

/// Start a session task. The session loads (or restores) its state before
/// processing any command, so an `attach` can be sent right away.
pub fn spawn_session<S>(app: App<S>, config: EngineConfig, scope: SessionScope) -> SessionHandle<S>
where
    S: Clone + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel(config.inbox_capacity.max(1));
    let now = Instant::now();
    let status = Arc::new(RwLock::new(SessionStatus {
        phase: Phase::Connecting,
        render_num: 0,
        transport: None,
        detached_at: None,
        last_activity: now,
    }));
    let cancel = CancellationToken::new();
    let handle = SessionHandle {
        scope: scope.clone(),
        tx: tx.clone(),
        status: status.clone(),
        cancel: cancel.clone(),
    };

    let span = info_span!(
        "session",
        device_id = %scope.device_id,
        session_id = %scope.session_id
    );
    let weak = tx.downgrade();
    drop(tx);
    tokio::spawn(
        async move {
            if let Some(session) = Session::init(app, config, scope, weak, status, cancel).await {
                session.run(rx).await;
            }
        }
        .instrument(span),
    );
    handle
}

enum Flow {
    Continue,
    Stop(Phase, String),
}

struct Session<S: Clone + Send + Sync + 'static> {
    scope: SessionScope,
    app: App<S>,
    config: EngineConfig,
    state: S,
    tree: Option<Node>,
    render_num: u64,
    handlers: HandlerTable<S>,
    delays: DelayScheduler<S>,
    fired_rx: mpsc::UnboundedReceiver<DelayKey>,
    outbox: Outbox,
    correlations: HashMap<u64, oneshot::Sender<Result<String, BridgeError>>>,
    next_descriptor: u64,
    last_url: Option<String>,
    subscription: Option<Box<dyn Subscription>>,
    /// Messages published while the environment is still configuring.
    early_messages: Option<Vec<Value>>,
    violations: u32,
    idle_deadline: Option<Instant>,
    tx: mpsc::WeakSender<Command<S>>,
    status: Arc<RwLock<SessionStatus>>,
    cancel: CancellationToken,
}

impl<S: Clone + Send + Sync + 'static> Session<S> {
    async fn init(
        app: App<S>,
        config: EngineConfig,
        scope: SessionScope,
        tx: mpsc::WeakSender<Command<S>>,
        status: Arc<RwLock<SessionStatus>>,
        cancel: CancellationToken,
    ) -> Option<Self> {
        let restored = match app.storage.restore(&scope.session_id, &scope.device_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                report(&scope, &e, "restore snapshot");
                None
            }
        };
        let resumed = restored.is_some();
        let (state, tree, render_num) = match restored {
            Some(snapshot) => (snapshot.state, snapshot.tree, snapshot.render_num),
            None => match app.storage.load(&scope.device_id).await {
                Ok(state) => (state, None, 0),
                Err(e) => {
                    report(&scope, &e, "load initial state");
                    status.write().phase = Phase::Terminated;
                    cancel.cancel();
                    return None;
                }
            },
        };

        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let mut session = Self {
            delays: DelayScheduler::new(fired_tx, cancel.clone()),
            fired_rx,
            outbox: Outbox::new(config.max_pending_frames, !resumed),
            scope,
            app,
            config,
            state,
            tree,
            render_num,
            handlers: HandlerTable::new(),
            correlations: HashMap::new(),
            next_descriptor: 1,
            last_url: None,
            subscription: None,
            early_messages: None,
            violations: 0,
            idle_deadline: None,
            tx,
            status,
            cancel,
        };
        info!(resumed, render_num, "session started");

        // Runs beside the command loop; `configure` may await `apply`.
        if let (Some(env), Some(tx)) = (session.app.environment.clone(), session.tx.upgrade()) {
            let applier = TransitionApplier::new(session.scope.clone(), tx.clone());
            let scope = session.scope.clone();
            session.early_messages = Some(Vec::new());
            tokio::spawn(
                async move {
                    let result = env
                        .configure(&scope.device_id, &scope.session_id, applier)
                        .await;
                    if let Err(mpsc::error::SendError(Command::Subscribed(Ok(mut subscription)))) =
                        tx.send(Command::Subscribed(result)).await
                    {
                        subscription.on_destroy();
                    }
                }
                .in_current_span(),
            );
        }

        // Rebuild handlers and delays, and bring a restored tree up to date
        // with the current view code.
        match session.render_state(&session.state) {
            Ok(rendered) => session.commit(rendered),
            Err(e) => report(&session.scope, &e, "initial render"),
        }
        session.persist().await;
        Some(session)
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Command<S>>) {
        loop {
            let deadline = self.idle_deadline;
            let flow = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Flow::Stop(Phase::Terminated, "halted".into()),
                cmd = inbox.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => Flow::Stop(Phase::Terminated, "all handles dropped".into()),
                },
                Some(key) = self.fired_rx.recv() => {
                    self.fire_delay(&key);
                    Flow::Continue
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    Flow::Stop(Phase::Expired, "idle timeout".into())
                }
            };
            if let Flow::Stop(phase, reason) = flow {
                let discard = !self.cancel.is_cancelled();
                self.shutdown(phase, &reason, discard).await;
                return;
            }
        }
    }

    async fn handle(&mut self, cmd: Command<S>) -> Flow {
        match cmd {
            Command::Attach {
                transport,
                has_tree,
            } => self.attach(transport, has_tree),
            Command::Detach {
                transport_id,
                reason,
            } => {
                if self.outbox.detach(transport_id) {
                    debug!(transport_id, reason = %reason, "transport detached");
                    self.mark_detached();
                }
            }
            Command::Inbound(frame) => return self.inbound(Ok(frame)),
            Command::InboundText(raw) => return self.inbound(Frame::from_json(&raw)),
            Command::Deliver(messages) => self.send(messages),
            Command::Transition { transition, reply } => {
                let result = self.apply(transition).await;
                if let Err(e) = &result {
                    report(&self.scope, e, "apply transition");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Command::ReadState { reply } => {
                let _ = reply.send(self.state.clone());
            }
            Command::Request { request, reply } => self.request(request, reply),
            Command::SetProperty {
                id,
                name,
                value,
                reply,
            } => {
                let result = match self.bound_path(&id) {
                    Ok(path) => {
                        self.send(vec![ServerMessage::Patch(PatchOp::SetProperty {
                            path,
                            key: name,
                            value,
                        })]);
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Publish(message) => match (&mut self.subscription, &mut self.early_messages) {
                (Some(subscription), _) => subscription.on_message(message),
                (None, Some(early)) => early.push(message),
                (None, None) => debug!("publish without environment subscription"),
            },
            Command::Subscribed(result) => {
                let early = self.early_messages.take().unwrap_or_default();
                match result {
                    Ok(mut subscription) => {
                        for message in early {
                            subscription.on_message(message);
                        }
                        self.subscription = Some(subscription);
                    }
                    Err(e) => report(&self.scope, &e, "configure environment"),
                }
            }
            Command::Expire => return Flow::Stop(Phase::Expired, "expired".into()),
            Command::Terminate { reason } => return Flow::Stop(Phase::Terminated, reason),
        }
        Flow::Continue
    }

    fn attach(&mut self, transport: Transport, has_tree: bool) {
        let kind = transport.kind();
        let transport_id = transport.id();
        match self.outbox.attach(transport, has_tree) {
            AttachPlan::Replayed => debug!(transport_id, ?kind, "attached, replayed in-flight frames"),
            AttachPlan::NeedsResync => {
                debug!(transport_id, ?kind, has_tree, "attached, sending full render");
                self.full_resync();
            }
        }
        self.touch();
        if self.outbox.transport().is_some() {
            self.idle_deadline = None;
            let mut status = self.status.write();
            status.phase = Phase::Active;
            status.transport = Some(kind);
            status.detached_at = None;
        } else {
            self.mark_detached();
        }
    }

    fn mark_detached(&mut self) {
        let now = Instant::now();
        self.idle_deadline = Some(now + self.config.idle_timeout);
        let mut status = self.status.write();
        if !status.phase.is_finished() {
            status.phase = Phase::Detached;
        }
        status.transport = None;
        status.detached_at = Some(now);
    }

    fn touch(&self) {
        self.status.write().last_activity = Instant::now();
    }

    fn inbound(&mut self, frame: Result<Frame, BridgeError>) -> Flow {
        self.touch();
        let messages = match frame.and_then(|frame| decode_client(&frame)) {
            Ok(messages) => {
                self.violations = 0;
                messages
            }
            Err(e) => {
                self.violations += 1;
                report(&self.scope, &e, "decode client frame");
                if self.violations > self.config.max_protocol_violations {
                    return Flow::Stop(Phase::Terminated, "too many protocol violations".into());
                }
                return Flow::Continue;
            }
        };
        for message in messages {
            match message {
                ClientMessage::CallbackAck { seq } => {
                    self.outbox.ack(seq);
                    self.drain_outbox();
                }
                ClientMessage::DomEvent {
                    render_num,
                    path,
                    event_type,
                    data,
                } => match route(
                    self.tree.as_ref(),
                    &self.handlers,
                    self.render_num,
                    render_num,
                    &path,
                    &event_type,
                ) {
                    Route::Dispatch(_, handler) => self.spawn_handler(handler, data, &event_type),
                    Route::Stale { current } => {
                        debug!(render_num, current, path = %path, event_type, "stale event dropped")
                    }
                    Route::NoNode => debug!(path = %path, event_type, "event for missing node"),
                    Route::NoHandler(key) => debug!(?key, "no handler for event"),
                },
                ClientMessage::ResolveProperty {
                    descriptor,
                    ok,
                    value,
                }
                | ClientMessage::EvaluateResult {
                    descriptor,
                    ok,
                    value,
                } => match self.correlations.remove(&descriptor) {
                    Some(reply) => {
                        let result = if ok {
                            Ok(value)
                        } else {
                            Err(BridgeError::ClientRejected(value))
                        };
                        let _ = reply.send(result);
                    }
                    None => debug!(descriptor, "reply for unknown or abandoned request"),
                },
                ClientMessage::HistoryChange { url } => self.history_change(url),
                ClientMessage::Resync => self.full_resync(),
            }
        }
        Flow::Continue
    }

    fn render_state(&self, state: &S) -> Result<Rendered<S>, BridgeError> {
        let render_fn = self.app.render.clone();
        catch_unwind(AssertUnwindSafe(|| render(render_fn(state)))).map_err(|payload| {
            BridgeError::TransitionFailure(format!(
                "render panicked: {}",
                panic_message(payload.as_ref())
            ))
        })
    }

    /// Apply, render, and only then commit. A failure at either step leaves
    /// state and tree as they were.
    async fn apply(&mut self, transition: Transition<S>) -> Result<(), BridgeError> {
        let state = &self.state;
        let next = match catch_unwind(AssertUnwindSafe(move || transition(state))) {
            Ok(Ok(next)) => next,
            Ok(Err(BridgeError::TransitionFailure(msg))) => {
                return Err(BridgeError::TransitionFailure(msg))
            }
            Ok(Err(e)) => return Err(BridgeError::TransitionFailure(e.to_string())),
            Err(payload) => {
                return Err(BridgeError::TransitionFailure(format!(
                    "transition panicked: {}",
                    panic_message(payload.as_ref())
                )))
            }
        };
        let rendered = self.render_state(&next)?;
        self.state = next;
        self.commit(rendered);
        self.persist().await;
        Ok(())
    }

    fn commit(&mut self, rendered: Rendered<S>) {
        let Rendered {
            tree,
            handlers,
            delays,
        } = rendered;
        let ops = diff(self.tree.as_ref(), &tree);
        let mut body = Vec::with_capacity(ops.len() + 2);
        if !ops.is_empty() {
            self.render_num += 1;
            body.push(ServerMessage::SetRenderNum(self.render_num));
            body.extend(ops.into_iter().map(ServerMessage::Patch));
        }
        if let Some(router) = &self.app.router {
            let url = router.to_url(&self.state);
            if url.is_some() && url != self.last_url {
                body.extend(url.clone().map(ServerMessage::ChangePageUrl));
                self.last_url = url;
            }
        }

        self.tree = Some(tree);
        self.handlers = handlers;
        self.delays.sync(delays);
        self.status.write().render_num = self.render_num;
        if !body.is_empty() {
            self.send(body);
        }
    }

    async fn persist(&mut self) {
        if !self.config.persist_snapshots {
            return;
        }
        let snapshot = Snapshot {
            state: self.state.clone(),
            tree: self.tree.clone(),
            render_num: self.render_num,
        };
        if let Err(e) = self
            .app
            .storage
            .persist(&self.scope.session_id, &self.scope.device_id, &snapshot)
            .await
        {
            report(&self.scope, &e, "persist snapshot");
        }
    }

    /// Reset the client to the current tree from scratch.
    fn full_resync(&mut self) {
        self.outbox.reset();
        let mut body = vec![
            ServerMessage::SetRenderNum(self.render_num),
            ServerMessage::Clear,
        ];
        if let Some(tree) = &self.tree {
            body.extend(diff(None, tree).into_iter().map(ServerMessage::Patch));
        }
        if let Some(url) = &self.last_url {
            body.push(ServerMessage::ChangePageUrl(url.clone()));
        }
        self.send(body);
    }

    /// Push frames held back by a full transport once the client catches up.
    fn drain_outbox(&mut self) {
        if self.outbox.transport().is_some() && !self.outbox.flush() {
            report(
                &self.scope,
                &BridgeError::TransportError("transport closed while flushing".into()),
                "flush frames",
            );
            self.mark_detached();
        }
    }

    fn send(&mut self, body: Vec<ServerMessage>) {
        match self.outbox.push(&body) {
            SendOutcome::Sent | SendOutcome::Queued | SendOutcome::Deferred => {}
            SendOutcome::TransportClosed => {
                report(
                    &self.scope,
                    &BridgeError::TransportError("transport closed while sending".into()),
                    "send frame",
                );
                self.mark_detached();
            }
            SendOutcome::Overflow => {
                warn!(
                    device_id = %self.scope.device_id,
                    session_id = %self.scope.session_id,
                    max_pending = self.config.max_pending_frames,
                    "outbound queue overflowed, next attach gets a full render"
                );
                if self.outbox.transport().is_none() && self.status.read().phase == Phase::Active {
                    self.mark_detached();
                }
            }
        }
    }

    fn bound_path(&self, id: &ElementId) -> Result<tether_core::path::Path, BridgeError> {
        self.tree
            .as_ref()
            .and_then(|tree| path_of(tree, id))
            .ok_or_else(|| BridgeError::UnknownElement(id.to_string()))
    }

    fn request(
        &mut self,
        request: ClientRequest,
        reply: oneshot::Sender<Result<String, BridgeError>>,
    ) {
        // Drop entries whose handler gave up waiting.
        self.correlations.retain(|_, pending| !pending.is_closed());

        let descriptor = self.next_descriptor;
        let message = match request {
            ClientRequest::Property { id, name } => match self.bound_path(&id) {
                Ok(path) => ServerMessage::ExtractProperty {
                    descriptor,
                    path,
                    name,
                },
                Err(e) => {
                    let _ = reply.send(Err(e));
                    return;
                }
            },
            ClientRequest::Evaluate { code } => ServerMessage::Evaluate { descriptor, code },
        };
        self.next_descriptor += 1;
        self.correlations.insert(descriptor, reply);
        self.send(vec![message]);
    }

    fn history_change(&mut self, url: String) {
        let Some(router) = self.app.router.clone() else {
            debug!(url, "history change without router");
            return;
        };
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        self.last_url = Some(url.clone());
        let applier = TransitionApplier::new(self.scope.clone(), tx);
        let scope = self.scope.clone();
        let previous = self.state.clone();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = router.from_url(&scope.device_id, &url, &previous) => result,
            };
            match result {
                Ok(next) => applier.enqueue(Box::new(move |_| Ok(next))),
                Err(e) => report(&scope, &e, "route history change"),
            }
        });
    }

    fn fire_delay(&mut self, key: &DelayKey) {
        if let Some(handler) = self.delays.fire(key) {
            self.spawn_handler(handler, String::new(), "delay");
        }
    }

    fn spawn_handler(&self, handler: Handler<S>, event_data: String, what: &str) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let cancel = self.cancel.child_token();
        let access = Access::new(
            self.scope.clone(),
            tx,
            self.config.property_timeout,
            event_data,
            cancel.clone(),
        );
        let scope = self.scope.clone();
        let what = what.to_owned();
        tokio::spawn(async move {
            let run = AssertUnwindSafe(handler(access)).catch_unwind();
            let outcome = tokio::select! {
                biased;
                outcome = run => outcome,
                _ = cancel.cancelled() => return,
            };
            let err = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) if e.is_session_fatal() => {
                    debug!(handler = %what, error = %e, "handler ended with session");
                    return;
                }
                Ok(Err(e)) if e.is_local() => e,
                Ok(Err(e)) => BridgeError::HandlerFailed(e.to_string()),
                Err(payload) => BridgeError::HandlerFailed(format!(
                    "handler panicked: {}",
                    panic_message(payload.as_ref())
                )),
            };
            report(&scope, &err, &what);
        });
    }

    async fn shutdown(&mut self, phase: Phase, reason: &str, discard: bool) {
        let err = match phase {
            Phase::Expired => BridgeError::SessionExpired,
            _ => BridgeError::SessionTerminated,
        };
        for (_, reply) in self.correlations.drain() {
            let _ = reply.send(Err(err.clone()));
        }
        self.delays.cancel_all();
        self.cancel.cancel();
        if let Some(mut subscription) = self.subscription.take() {
            subscription.on_destroy();
        }
        self.outbox.drop_transport();
        {
            let mut status = self.status.write();
            status.phase = phase;
            status.transport = None;
        }
        if discard {
            if let Err(e) = self
                .app
                .storage
                .discard(&self.scope.session_id, &self.scope.device_id)
                .await
            {
                report(&self.scope, &e, "discard snapshot");
            }
        }
        report(&self.scope, &err, reason);
    }
}
