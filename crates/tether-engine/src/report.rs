//! Error reporting for the rest of the system.
//!
//! Every report is a `tracing` event carrying `device_id`, `session_id` and
//! `error_kind`, which is what the telemetry report sink indexes on.

use std::fmt;

use tracing::{error, info, warn};

use tether_core::errors::BridgeError;
use tether_core::ids::{DeviceId, SessionId};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionScope {
    pub device_id: DeviceId,
    pub session_id: SessionId,
}

impl SessionScope {
    pub fn new(device_id: DeviceId, session_id: SessionId) -> Self {
        Self {
            device_id,
            session_id,
        }
    }
}

impl fmt::Display for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.session_id)
    }
}

pub fn report(scope: &SessionScope, err: &BridgeError, context: &str) {
    let device_id = scope.device_id.as_str();
    let session_id = scope.session_id.as_str();
    let error_kind = err.error_kind();
    match err {
        BridgeError::SessionExpired
        | BridgeError::SessionTerminated
        | BridgeError::TransportError(_) => {
            info!(device_id, session_id, error_kind, context, "{err}");
        }
        BridgeError::ProtocolViolation(_)
        | BridgeError::PropertyReadTimeout(_)
        | BridgeError::UnknownElement(_)
        | BridgeError::ClientRejected(_) => {
            warn!(device_id, session_id, error_kind, context, "{err}");
        }
        BridgeError::TransitionFailure(_)
        | BridgeError::HandlerFailed(_)
        | BridgeError::Storage(_)
        | BridgeError::Internal(_) => {
            error!(device_id, session_id, error_kind, context, "{err}");
        }
    }
}

/// Message carried by a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads() {
        let caught = std::panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom 1");
        let caught = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "static");
    }

    #[test]
    fn scope_display() {
        let scope = SessionScope::new(DeviceId::from_raw("dev_a"), SessionId::from_raw("sess_b"));
        assert_eq!(scope.to_string(), "dev_a/sess_b");
    }
}
