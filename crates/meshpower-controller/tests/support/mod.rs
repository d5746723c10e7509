//! A fake bridge implementing `meshpower_ble::Transport`, standing in for
//! a real bridge: fed canned telemetry
//! instead of real radio bytes, and recording every write for assertions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use meshpower_ble::{DiscoveredDevice, Transport, TransportError};
use meshpower_core::{Event, NodeId, Telemetry};

#[derive(Clone, Copy)]
struct CannedTelemetry {
    duty_pct: u8,
    voltage_v: f64,
    current_ma: f64,
    power_mw: f64,
}

pub struct MockTransport {
    writes: Mutex<Vec<String>>,
    telemetry: Mutex<HashMap<NodeId, CannedTelemetry>>,
    events_tx: broadcast::Sender<Event>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            writes: Mutex::new(Vec::new()),
            telemetry: Mutex::new(HashMap::new()),
            events_tx,
        })
    }

    /// Installs the reading a node "reports" the next time it is `READ`.
    pub fn set_telemetry(&self, node: NodeId, duty_pct: u8, voltage_v: f64, current_ma: f64, power_mw: f64) {
        self.telemetry.lock().unwrap().insert(node, CannedTelemetry { duty_pct, voltage_v, current_ma, power_mw });
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    /// Pushes an arbitrary event onto the feed (e.g. `Event::Error`) without
    /// it having been triggered by a write.
    pub fn emit(&self, event: Event) {
        let _ = self.events_tx.send(event);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn scan(
        &self,
        _timeout: Duration,
        _target_address: Option<&str>,
    ) -> Result<Vec<DiscoveredDevice>, TransportError> {
        Ok(Vec::new())
    }

    async fn connect(&self, _device_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    /// Records the write, then — if it is a `READ` for a node with canned
    /// telemetry installed — immediately replies with that node's reading,
    /// the way the real bridge would a few milliseconds later.
    async fn write(&self, command: &str) -> Result<(), TransportError> {
        self.writes.lock().unwrap().push(command.to_string());

        if let Some((node_str, "READ")) = command.split_once(':') {
            if let Ok(node) = node_str.parse::<NodeId>() {
                if let Some(reading) = self.telemetry.lock().unwrap().get(&node).copied() {
                    let _ = self.events_tx.send(Event::Telemetry(Telemetry {
                        node,
                        duty_pct: reading.duty_pct,
                        voltage_v: reading.voltage_v,
                        current_ma: reading.current_ma,
                        power_mw: reading.power_mw,
                    }));
                }
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        true
    }

    fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }
}
