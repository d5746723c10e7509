//! Transport-level errors. Manual `Display`/`Error` impls, matching the
//! convention used throughout `meshpower-core` rather than pulling in an
//! error-derive crate for a handful of variants.

use std::fmt;

/// Failures that can occur while driving the bridge radio session.
#[derive(Debug)]
pub enum TransportError {
    /// No BLE adapter is present on the host.
    NoAdapter,
    /// `connect` was given a device id not present among the last scan's
    /// results.
    BridgeNotFound,
    /// The bridge's GATT service/characteristics don't match what the
    /// radio session expects.
    ServiceMismatch(String),
    /// Not connected to a bridge when a connected-only operation was
    /// attempted.
    NotConnected,
    /// The underlying BLE stack returned an error.
    Radio(btleplug::Error),
    /// The session's actor task has gone away (channel send/recv failed).
    SessionClosed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAdapter => write!(f, "no BLE adapter available on this host"),
            Self::BridgeNotFound => write!(f, "no device with that id was found during the last scan"),
            Self::ServiceMismatch(detail) => write!(f, "bridge GATT mismatch: {detail}"),
            Self::NotConnected => write!(f, "not connected to a bridge"),
            Self::Radio(e) => write!(f, "radio error: {e}"),
            Self::SessionClosed => write!(f, "bridge session task is no longer running"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Radio(e) => Some(e),
            _ => None,
        }
    }
}

impl From<btleplug::Error> for TransportError {
    fn from(e: btleplug::Error) -> Self {
        Self::Radio(e)
    }
}
