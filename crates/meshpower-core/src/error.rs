//! Policy-level errors raised at the controller facade boundary.
//!
//! Transport failures live in `meshpower-ble`; this crate only knows about
//! validation failures that never touch the radio.

use core::fmt;

use crate::types::NodeIdError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The named node id is not 1-9.
    InvalidNode(NodeIdError),
    /// A requested duty value could not be parsed or was clamped; the
    /// original, unclamped value is retained for the operator-facing message.
    InvalidDuty(i32),
    /// `set_priority` was called before any threshold had ever been set.
    PriorityBeforeThreshold,
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNode(e) => write!(f, "invalid node: {e}"),
            Self::InvalidDuty(v) => write!(f, "invalid duty cycle: {v} (expected 0-100)"),
            Self::PriorityBeforeThreshold => {
                write!(f, "cannot set a priority node before a power threshold is active")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

impl From<NodeIdError> for PolicyError {
    fn from(e: NodeIdError) -> Self {
        Self::InvalidNode(e)
    }
}
