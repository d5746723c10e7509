//! Fixed radio service/characteristic identifiers.

use uuid::{uuid, Uuid};

/// `0000dc01-0000-1000-8000-00805f9b34fb`
pub const SERVICE: Uuid = uuid!("0000dc01-0000-1000-8000-00805f9b34fb");
/// Sensor + status notifications, chunked per the frame codec.
pub const NOTIFY_CHAR: Uuid = uuid!("0000dc02-0000-1000-8000-00805f9b34fb");
/// Outbound node commands, UTF-8, up to the negotiated MTU.
pub const WRITE_CHAR: Uuid = uuid!("0000dc03-0000-1000-8000-00805f9b34fb");

/// Advertised-name prefixes recognized during scan.
pub const NAME_PREFIXES: &[&str] = &["Mesh-Gateway", "ESP-BLE-MESH"];
