//! Platform-agnostic core of the mesh power controller: the frame codec,
//! node registry, wire command grammar, and power-policy math. No radio
//! I/O and no async runtime dependency live here — see `meshpower-ble`
//! and `meshpower-controller`.

pub mod codec;
pub mod error;
pub mod policy;
pub mod registry;
pub mod sequencer;
pub mod types;

pub use codec::{classify, ContinuationBuffer, Event, Telemetry};
pub use error::PolicyError;
pub use policy::{mw_per_pct, nudge, priority_plan, proportional_plan, should_skip_adjustment, Adjustment, PowerPolicy};
pub use registry::{NodeRegistry, NodeState};
pub use sequencer::{format_command, Verb};
pub use types::{clamp_pct, NodeId, NodeIdError, Target};
