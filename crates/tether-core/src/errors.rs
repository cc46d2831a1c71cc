use std::time::Duration;

/// Error taxonomy for the bridge between a session and its browser.
///
/// Protocol-level and single-request failures are recovered where they
/// happen; only `SessionExpired` and `SessionTerminated` mean the session's
/// state is gone.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    // Recovered locally: the frame or handler is dropped, the session lives on.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("property read timed out after {0:?}")]
    PropertyReadTimeout(Duration),
    #[error("transition failed: {0}")]
    TransitionFailure(String),
    #[error("handler failed: {0}")]
    HandlerFailed(String),
    #[error("element not found in current render: {0}")]
    UnknownElement(String),
    #[error("client rejected request: {0}")]
    ClientRejected(String),

    // Transport: moves the session to Detached.
    #[error("transport error: {0}")]
    TransportError(String),

    // Session-fatal.
    #[error("session expired")]
    SessionExpired,
    #[error("session terminated")]
    SessionTerminated,

    // Collaborators.
    #[error("storage error: {0}")]
    Storage(String),
    #[error("{0}")]
    Internal(String),
}

impl BridgeError {
    /// Whether the error ends the session and releases its state.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::SessionTerminated)
    }

    /// Whether the error is confined to one frame or one handler invocation.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::ProtocolViolation(_)
                | Self::PropertyReadTimeout(_)
                | Self::TransitionFailure(_)
                | Self::HandlerFailed(_)
                | Self::UnknownElement(_)
                | Self::ClientRejected(_)
        )
    }

    /// Short classification string for reports.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::PropertyReadTimeout(_) => "property_read_timeout",
            Self::TransitionFailure(_) => "transition_failure",
            Self::HandlerFailed(_) => "handler_failed",
            Self::UnknownElement(_) => "unknown_element",
            Self::ClientRejected(_) => "client_rejected",
            Self::TransportError(_) => "transport_error",
            Self::SessionExpired => "session_expired",
            Self::SessionTerminated => "session_terminated",
            Self::Storage(_) => "storage",
            Self::Internal(_) => "internal",
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::ProtocolViolation(e.to_string())
    }
}
