//! Facade-boundary errors: the union of what the transport and the policy
//! layer can reject, in one manual enum.

use std::fmt;

use meshpower_ble::TransportError;
use meshpower_core::PolicyError;

#[derive(Debug)]
pub enum ControllerError {
    Policy(PolicyError),
    Transport(TransportError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy(e) => write!(f, "{e}"),
            Self::Transport(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ControllerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Policy(e) => Some(e),
            Self::Transport(e) => Some(e),
        }
    }
}

impl From<PolicyError> for ControllerError {
    fn from(e: PolicyError) -> Self {
        Self::Policy(e)
    }
}

impl From<TransportError> for ControllerError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}
