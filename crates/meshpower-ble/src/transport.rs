//! The `Transport` seam: the radio session is reached
//! only through this trait, so `meshpower-controller` can be exercised in
//! tests against a fake bridge instead of real hardware, the same way the
//! rest of this workspace keeps hardware behind an interface.

use async_trait::async_trait;
use tokio::sync::broadcast;

use meshpower_core::Event;

use crate::error::TransportError;

/// A bridge device seen during a scan.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub id: String,
    pub address: String,
    pub name: String,
    pub rssi: Option<i16>,
}

/// Drives one bridge radio session: scan, connect, write, and a fan-out
/// feed of reassembled, classified events.
///
/// Implementations own exactly one connection at a time; `connect` on an
/// already-connected session replaces the prior connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Scans for bridge-shaped advertisements for up to `timeout`.
    ///
    /// If `target_address` is given, a device whose address matches it is
    /// always included, address comparison short-circuiting the other
    /// checks for that device; every device (matching the target address
    /// or not) is also matched by advertised-name prefix, then by
    /// advertised service UUID. An empty result is a normal outcome, not
    /// an error.
    async fn scan(
        &self,
        timeout: std::time::Duration,
        target_address: Option<&str>,
    ) -> Result<Vec<DiscoveredDevice>, TransportError>;

    /// Connects to the device with the given id, discovers its GATT
    /// service, and subscribes to notifications.
    async fn connect(&self, device_id: &str) -> Result<(), TransportError>;

    /// Writes one already-formatted wire command to the
    /// bridge. Writes are serialized by the implementation; callers never
    /// need their own mutex.
    async fn write(&self, command: &str) -> Result<(), TransportError>;

    /// Disconnects, if connected. Idempotent.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Whether the session currently believes it holds a live connection.
    async fn is_connected(&self) -> bool;

    /// Subscribes to the event feed. Every call yields an independent
    /// receiver over the same broadcast; a slow subscriber only ever loses
    /// its own backlog.
    fn subscribe_events(&self) -> broadcast::Receiver<Event>;
}
