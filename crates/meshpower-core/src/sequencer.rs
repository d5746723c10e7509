//! Wire command grammar: verbs and targets as sent over the notify/write characteristics.
//!
//! Formatting and clamping are pure and synchronous; the async half that
//! enforces `read_stagger` and expands `ALL` against a live registry lives
//! in `meshpower-controller::sequencer`, which calls into this module for
//! the actual byte formatting.

use core::fmt;

use crate::types::{clamp_pct, NodeId};

/// The verbs the wire grammar accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Read,
    Duty(u8),
    Ramp,
    Stop,
    Status,
    Monitor,
    On,
    Off,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "READ"),
            Self::Duty(_) => write!(f, "DUTY"),
            Self::Ramp => write!(f, "RAMP"),
            Self::Stop => write!(f, "STOP"),
            Self::Status => write!(f, "STATUS"),
            Self::Monitor => write!(f, "MONITOR"),
            Self::On => write!(f, "ON"),
            Self::Off => write!(f, "OFF"),
        }
    }
}

impl Verb {
    /// A `DUTY` verb with the percentage clamped to `[0, 100]`.
    ///
    /// Returns the clamped verb and whether clamping actually changed the
    /// value, so callers can report it once to the operator.
    pub fn duty_clamped(requested: i32) -> (Self, bool) {
        let clamped = clamp_pct(requested);
        (Self::Duty(clamped), i32::from(clamped) != requested)
    }
}

/// Formats the wire bytes for a command to a single node. `ALL` is never
/// representable here — it is a `Target` resolved to individual `NodeId`s
/// before this function is called.
pub fn format_command(node: NodeId, verb: Verb) -> String {
    match verb {
        Verb::Duty(pct) => format!("{node}:DUTY:{pct}"),
        other => format!("{node}:{other}"),
    }
}
