use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tether_core::errors::BridgeError;
use tether_core::ids::{DeviceId, SessionId};
use tether_engine::{
    spawn_session, App, EngineConfig, Phase, ServerMessage, SessionHandle, SessionScope,
    Transition, Transport,
};
use tokio::time::Instant;

/// Connection Manager: every live session, keyed by session id.
///
/// A session is spawned on first contact and outlives its transports; it
/// leaves the table only once it is Expired or Terminated.
pub struct SessionRegistry<S: Send + Sync + 'static> {
    sessions: DashMap<SessionId, SessionHandle<S>>,
    app: App<S>,
    config: EngineConfig,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub expired: usize,
    pub removed: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    pub total: usize,
    pub active: usize,
    pub detached: usize,
}

impl<S: Clone + Send + Sync + 'static> SessionRegistry<S> {
    pub fn new(app: App<S>, config: EngineConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            app,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn get(&self, session_id: &SessionId) -> Option<SessionHandle<S>> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn counts(&self) -> SessionCounts {
        let mut counts = SessionCounts::default();
        for entry in self.sessions.iter() {
            counts.total += 1;
            match entry.value().phase() {
                Phase::Active => counts.active += 1,
                Phase::Detached => counts.detached += 1,
                _ => {}
            }
        }
        counts
    }

    /// The session for `session_id`, spawning it if it is new or finished.
    fn open(&self, device_id: &DeviceId, session_id: &SessionId) -> Result<SessionHandle<S>, BridgeError> {
        let spawn = || {
            spawn_session(
                self.app.clone(),
                self.config.clone(),
                SessionScope::new(device_id.clone(), session_id.clone()),
            )
        };
        match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().scope().device_id != *device_id {
                    return Err(BridgeError::protocol("session belongs to another device"));
                }
                if entry.get().is_finished() {
                    tracing::info!(%device_id, %session_id, "Replacing finished session");
                    entry.insert(spawn());
                }
                Ok(entry.get().clone())
            }
            Entry::Vacant(entry) => {
                tracing::info!(%device_id, %session_id, "Session created");
                Ok(entry.insert(spawn()).value().clone())
            }
        }
    }

    /// A session that must already exist and belong to `device_id`.
    fn existing(&self, device_id: &DeviceId, session_id: &SessionId) -> Result<SessionHandle<S>, BridgeError> {
        let handle = self.get(session_id).ok_or(BridgeError::SessionExpired)?;
        if handle.scope().device_id != *device_id {
            return Err(BridgeError::protocol("session belongs to another device"));
        }
        Ok(handle)
    }

    /// Bind `transport` to the session, creating or resuming it as needed.
    pub async fn attach(
        &self,
        device_id: &DeviceId,
        session_id: &SessionId,
        transport: Transport,
        has_tree: bool,
    ) -> Result<SessionHandle<S>, BridgeError> {
        let handle = self.open(device_id, session_id)?;
        handle.attach(transport, has_tree).await?;
        Ok(handle)
    }

    /// Unbind a transport. A stale transport id is ignored by the session.
    pub async fn detach(&self, session_id: &SessionId, transport_id: u64, reason: &str) {
        if let Some(handle) = self.get(session_id) {
            if let Err(e) = handle.detach(transport_id, reason).await {
                tracing::debug!(%session_id, error = %e, "Detach after session end");
            }
        }
    }

    /// Feed a client frame, given as its JSON text.
    pub async fn dispatch(
        &self,
        device_id: &DeviceId,
        session_id: &SessionId,
        raw: String,
    ) -> Result<(), BridgeError> {
        self.existing(device_id, session_id)?.dispatch_text(raw).await
    }

    /// Push messages to the session's client; queued while it is detached.
    pub async fn deliver(&self, session_id: &SessionId, messages: Vec<ServerMessage>) -> Result<(), BridgeError> {
        self.get(session_id)
            .ok_or(BridgeError::SessionExpired)?
            .deliver(messages)
            .await
    }

    /// Apply a transition from outside any handler, e.g. an external publish.
    pub async fn apply_transition(&self, session_id: &SessionId, transition: Transition<S>) -> Result<(), BridgeError> {
        self.get(session_id)
            .ok_or(BridgeError::SessionExpired)?
            .apply(transition)
            .await
    }

    pub async fn terminate(&self, session_id: &SessionId, reason: &str) -> Result<(), BridgeError> {
        let (_, handle) = self
            .sessions
            .remove(session_id)
            .ok_or(BridgeError::SessionExpired)?;
        handle.terminate(reason).await
    }

    /// Drop finished sessions and expire those detached past the idle timeout.
    pub async fn sweep(&self) -> SweepStats {
        let now = Instant::now();
        let idle = self.config.idle_timeout;
        let mut stats = SweepStats::default();
        let mut stale = Vec::new();

        self.sessions.retain(|_, handle| {
            if handle.is_finished() {
                stats.removed += 1;
                return false;
            }
            let status = handle.status();
            if status.phase == Phase::Detached
                && status
                    .detached_at
                    .is_some_and(|at| now.saturating_duration_since(at) >= idle)
            {
                stale.push(handle.clone());
            }
            true
        });

        for handle in stale {
            if handle.expire().await.is_ok() {
                stats.expired += 1;
            }
        }
        stats
    }

    /// Stop every session task, keeping persisted snapshots for the next run.
    pub fn shutdown(&self) {
        for entry in self.sessions.iter() {
            entry.value().halt();
        }
        self.sessions.clear();
    }
}

/// Start a background task that periodically sweeps the registry.
pub fn start_sweeper<S>(registry: Arc<SessionRegistry<S>>, interval: Duration) -> tokio::task::JoinHandle<()>
where
    S: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let stats = registry.sweep().await;
            if stats.expired > 0 || stats.removed > 0 {
                tracing::info!(expired = stats.expired, removed = stats.removed, "Session sweep");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::storage::FactoryStorage;
    use tether_engine::{el, text, transition, Access, TransportKind, View};

    fn counter(count: &u32) -> View<u32> {
        el("body")
            .child(text(count.to_string()))
            .child(el("button").on("click", |a: Access<u32>| async move {
                a.transition(|n: &u32| n + 1).await
            }))
            .into()
    }

    fn registry(idle: Duration) -> SessionRegistry<u32> {
        let app = App::new(Arc::new(FactoryStorage::new(|_: &DeviceId| 0u32)), counter);
        SessionRegistry::new(
            app,
            EngineConfig {
                idle_timeout: idle,
                ..Default::default()
            },
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn attach_spawns_once_per_session() {
        let registry = registry(Duration::from_secs(60));
        let device = DeviceId::new();
        let session = SessionId::new();

        let (first, _rx1) = Transport::channel(TransportKind::Stream, 8);
        let a = registry.attach(&device, &session, first, false).await.unwrap();
        let (second, _rx2) = Transport::channel(TransportKind::Polling, 8);
        let b = registry.attach(&device, &session, second, true).await.unwrap();
        settle().await;

        assert_eq!(registry.count(), 1);
        a.apply(transition(|n: &u32| n + 2)).await.unwrap();
        assert_eq!(b.state().await.unwrap(), 2);
        assert_eq!(registry.counts().active, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attach_rejects_foreign_device() {
        let registry = registry(Duration::from_secs(60));
        let session = SessionId::new();
        let (transport, _rx) = Transport::channel(TransportKind::Stream, 8);
        registry
            .attach(&DeviceId::new(), &session, transport, false)
            .await
            .unwrap();

        let (other, _rx2) = Transport::channel(TransportKind::Stream, 8);
        let err = registry
            .attach(&DeviceId::new(), &session, other, false)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ProtocolViolation(_)));

        let err = registry
            .dispatch(&DeviceId::new(), &session, "[]".into())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ProtocolViolation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_session_reports_expired() {
        let registry = registry(Duration::from_secs(60));
        let err = registry
            .dispatch(&DeviceId::new(), &SessionId::new(), "[]".into())
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::SessionExpired);
        let err = registry.deliver(&SessionId::new(), vec![]).await.unwrap_err();
        assert_eq!(err, BridgeError::SessionExpired);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_is_replaced_with_fresh_state() {
        let registry = registry(Duration::from_secs(60));
        let device = DeviceId::new();
        let session = SessionId::new();

        let (transport, _rx) = Transport::channel(TransportKind::Stream, 8);
        let old = registry.attach(&device, &session, transport, false).await.unwrap();
        old.apply(transition(|n: &u32| n + 5)).await.unwrap();
        old.expire().await.unwrap();
        settle().await;
        assert!(old.is_finished());

        let (transport, _rx) = Transport::channel(TransportKind::Stream, 8);
        let fresh = registry.attach(&device, &session, transport, true).await.unwrap();
        assert_eq!(fresh.state().await.unwrap(), 0);
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_finished_sessions() {
        let registry = registry(Duration::from_secs(60));
        let device = DeviceId::new();
        let keep = SessionId::new();
        let gone = SessionId::new();

        let (t1, _rx1) = Transport::channel(TransportKind::Stream, 8);
        registry.attach(&device, &keep, t1, false).await.unwrap();
        let (t2, _rx2) = Transport::channel(TransportKind::Stream, 8);
        let handle = registry.attach(&device, &gone, t2, false).await.unwrap();
        handle.terminate("test").await.unwrap();
        settle().await;

        let stats = registry.sweep().await;
        assert_eq!(stats, SweepStats { expired: 0, removed: 1 });
        assert!(registry.get(&keep).is_some());
        assert!(registry.get(&gone).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn detached_session_expires_after_idle_timeout() {
        let registry = registry(Duration::from_secs(30));
        let device = DeviceId::new();
        let session = SessionId::new();

        let (transport, _rx) = Transport::channel(TransportKind::Stream, 8);
        let id = transport.id();
        let handle = registry.attach(&device, &session, transport, false).await.unwrap();
        registry.detach(&session, id, "socket closed").await;
        settle().await;
        assert_eq!(handle.phase(), Phase::Detached);
        assert_eq!(registry.counts().detached, 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        settle().await;
        assert_eq!(handle.phase(), Phase::Expired);

        let stats = registry.sweep().await;
        assert_eq!(stats.removed, 1);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_removes_and_ends_session() {
        let registry = registry(Duration::from_secs(60));
        let device = DeviceId::new();
        let session = SessionId::new();
        let (transport, _rx) = Transport::channel(TransportKind::Stream, 8);
        let handle = registry.attach(&device, &session, transport, false).await.unwrap();

        registry.terminate(&session, "logout").await.unwrap();
        settle().await;
        assert_eq!(handle.phase(), Phase::Terminated);
        assert!(registry.get(&session).is_none());
        assert_eq!(
            registry.terminate(&session, "again").await.unwrap_err(),
            BridgeError::SessionExpired
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_halts_sessions() {
        let registry = registry(Duration::from_secs(60));
        let (transport, _rx) = Transport::channel(TransportKind::Stream, 8);
        let handle = registry
            .attach(&DeviceId::new(), &SessionId::new(), transport, false)
            .await
            .unwrap();
        registry.shutdown();
        settle().await;
        assert_eq!(registry.count(), 0);
        assert!(handle.is_finished());
    }
}
