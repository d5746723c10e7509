//! BLE bridge transport: scan/connect/write against a
//! real bridge over `btleplug`, behind the [`Transport`] seam so
//! `meshpower-controller` and its tests never touch the radio directly.

pub mod error;
pub mod session;
pub mod transport;
pub mod uuids;

pub use error::TransportError;
pub use session::BtleBridge;
pub use transport::{DiscoveredDevice, Transport};
