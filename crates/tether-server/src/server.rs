use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tether_core::ids::{DeviceId, SessionId};
use tether_engine::{App, EngineConfig};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::poll::{poll_handler, publish_handler};
use crate::registry::{self, SessionRegistry};
use crate::ws;

const DEVICE_COOKIE: &str = "device";
const DEVICE_COOKIE_MAX_AGE: u64 = 60 * 60 * 24 * 365;

/// Shared application state passed to Axum handlers.
pub struct AppState<S: Send + Sync + 'static> {
    pub registry: Arc<SessionRegistry<S>>,
    pub config: Arc<ServerConfig>,
}

impl<S: Send + Sync + 'static> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            config: Arc::clone(&self.config),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router<S>(state: AppState<S>) -> Router
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(bootstrap_handler::<S>))
        .route("/bridge/ws", get(ws_handler::<S>))
        .route("/bridge/poll/{device}/{session}", get(poll_handler::<S>))
        .route("/bridge/publish/{device}/{session}", post(publish_handler::<S>))
        .route("/health", get(health_handler::<S>))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start<S>(
    config: ServerConfig,
    engine: EngineConfig,
    app: App<S>,
) -> Result<ServerHandle<S>, std::io::Error>
where
    S: Clone + Send + Sync + 'static,
{
    let registry = Arc::new(SessionRegistry::new(app, engine));
    let sweeper = registry::start_sweeper(Arc::clone(&registry), config.sweep_interval);

    let addr = format!("0.0.0.0:{}", config.port);
    let state = AppState {
        registry: Arc::clone(&registry),
        config: Arc::new(config),
    };
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "Tether server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        _server: server,
        _sweeper: sweeper,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle<S: Send + Sync + 'static> {
    pub port: u16,
    registry: Arc<SessionRegistry<S>>,
    _server: tokio::task::JoinHandle<()>,
    _sweeper: tokio::task::JoinHandle<()>,
}

impl<S: Clone + Send + Sync + 'static> ServerHandle<S> {
    pub fn registry(&self) -> &Arc<SessionRegistry<S>> {
        &self.registry
    }

    /// Stop accepting connections and halt every session.
    pub fn shutdown(self) {
        self._server.abort();
        self._sweeper.abort();
        self.registry.shutdown();
        tracing::info!(port = self.port, "Tether server stopped");
    }
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub device: String,
    pub session: String,
    #[serde(default)]
    pub has_tree: bool,
}

/// WebSocket upgrade handler.
async fn ws_handler<S>(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState<S>>,
) -> impl IntoResponse
where
    S: Clone + Send + Sync + 'static,
{
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

async fn handle_socket<S>(socket: WebSocket, state: AppState<S>, params: WsParams)
where
    S: Clone + Send + Sync + 'static,
{
    ws::handle_ws_connection(
        socket,
        state.registry,
        DeviceId::from_raw(params.device),
        SessionId::from_raw(params.session),
        params.has_tree,
        state.config.transport_queue,
        state.config.heartbeat_interval,
    )
    .await;
}

/// Page shell for a fresh session: a document container the app mounts
/// into, plus the ids the client script connects with.
async fn bootstrap_handler<S>(State(state): State<AppState<S>>, headers: HeaderMap) -> impl IntoResponse
where
    S: Clone + Send + Sync + 'static,
{
    let device_id = device_from_cookie(&headers).unwrap_or_default();
    let session_id = SessionId::new();
    tracing::debug!(%device_id, %session_id, "Bootstrap page issued");

    let body = format!(
        concat!(
            "<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n",
            "<title>{title}</title>\n</head>\n<body>\n",
            "<div id=\"tether-root\" data-device=\"{device}\" data-session=\"{session}\" ",
            "data-ws=\"/bridge/ws\" data-poll=\"/bridge/poll\" data-publish=\"/bridge/publish\"></div>\n",
            "<script src=\"{script}\"></script>\n</body>\n</html>\n"
        ),
        title = escape_html(&state.config.title),
        device = escape_html(device_id.as_str()),
        session = escape_html(session_id.as_str()),
        script = escape_html(&state.config.client_script),
    );
    let cookie = format!(
        "{DEVICE_COOKIE}={device_id}; Path=/; Max-Age={DEVICE_COOKIE_MAX_AGE}; HttpOnly; SameSite=Lax"
    );
    ([(header::SET_COOKIE, cookie)], Html(body))
}

/// Health check HTTP endpoint.
async fn health_handler<S>(State(state): State<AppState<S>>) -> impl IntoResponse
where
    S: Clone + Send + Sync + 'static,
{
    let counts = state.registry.counts();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "sessions": counts,
        })),
    )
}

fn device_from_cookie(headers: &HeaderMap) -> Option<DeviceId> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == DEVICE_COOKIE && !value.is_empty())
        .map(|(_, value)| DeviceId::from_raw(value))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use tether_core::storage::FactoryStorage;
    use tether_engine::{el, text, View};

    fn app() -> App<u32> {
        App::new(
            Arc::new(FactoryStorage::new(|_: &DeviceId| 0u32)),
            |n: &u32| -> View<u32> { el("body").child(text(n.to_string())).into() },
        )
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };

        let handle = start(config, EngineConfig::default(), app()).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["sessions"]["total"], 0);
    }

    #[test]
    fn build_router_creates_routes() {
        let state = AppState {
            registry: Arc::new(SessionRegistry::new(app(), EngineConfig::default())),
            config: Arc::new(ServerConfig::default()),
        };
        let _router = build_router(state);
    }

    #[test]
    fn device_cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; device=dev_abc; lang=en"),
        );
        assert_eq!(device_from_cookie(&headers), Some(DeviceId::from_raw("dev_abc")));

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("device="));
        assert_eq!(device_from_cookie(&headers), None);
        assert_eq!(device_from_cookie(&HeaderMap::new()), None);
    }

    #[test]
    fn escape_html_quotes_markup() {
        assert_eq!(escape_html(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
