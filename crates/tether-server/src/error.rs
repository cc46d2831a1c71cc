use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tether_core::errors::BridgeError;

/// HTTP face of a [`BridgeError`].
#[derive(Debug)]
pub struct ApiError(pub BridgeError);

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            // The page must reload to get a new session.
            BridgeError::SessionExpired | BridgeError::SessionTerminated => StatusCode::GONE,
            BridgeError::ProtocolViolation(_) => StatusCode::BAD_REQUEST,
            BridgeError::TransportError(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.0.error_kind(),
            "message": self.0.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}
