//! Command sequencer, power-manager control loop, and controller facade
//! built over `meshpower-core` and `meshpower-ble`.

pub mod diag;
pub mod error;
pub mod facade;
pub mod power;
pub mod sequencer;

pub use error::ControllerError;
pub use facade::Controller;
pub use power::{PowerManager, PowerState};
pub use sequencer::Sequencer;
