//! Long-poll fallback transport.
//!
//! Each poll attaches a fresh polling transport, waits for the first frame,
//! drains whatever else is ready and detaches again. Frames the request could
//! not carry stay unacked in the session and are replayed on the next poll;
//! the client drops duplicates by sequence number.

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tether_core::frame::Frame;
use tether_core::ids::{DeviceId, SessionId};
use tether_engine::{Transport, TransportKind};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PollParams {
    #[serde(default)]
    pub has_tree: bool,
}

pub async fn poll_handler<S>(
    UrlPath((device, session)): UrlPath<(String, String)>,
    Query(params): Query<PollParams>,
    State(state): State<AppState<S>>,
) -> Result<Response, ApiError>
where
    S: Clone + Send + Sync + 'static,
{
    let device_id = DeviceId::from_raw(device);
    let session_id = SessionId::from_raw(session);
    let (transport, mut rx) = Transport::channel(TransportKind::Polling, state.config.transport_queue);
    let transport_id = transport.id();
    state
        .registry
        .attach(&device_id, &session_id, transport, params.has_tree)
        .await?;

    let mut frames: Vec<Frame> = Vec::new();
    if let Ok(Some(first)) = tokio::time::timeout(state.config.poll_timeout, rx.recv()).await {
        frames.push(first);
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
    }
    state
        .registry
        .detach(&session_id, transport_id, "poll complete")
        .await;

    if frames.is_empty() {
        tracing::trace!(%session_id, "Poll timed out");
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok(Json(frames).into_response())
}

/// Client-to-server frames for sessions on the polling transport.
pub async fn publish_handler<S>(
    UrlPath((device, session)): UrlPath<(String, String)>,
    State(state): State<AppState<S>>,
    body: String,
) -> Result<StatusCode, ApiError>
where
    S: Clone + Send + Sync + 'static,
{
    state
        .registry
        .dispatch(&DeviceId::from_raw(device), &SessionId::from_raw(session), body)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
