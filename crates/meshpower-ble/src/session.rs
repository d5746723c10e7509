//! The real bridge session: a single pinned task owns the `btleplug`
//! peripheral handle, and every other caller reaches it through a command
//! channel. This keeps exactly one task touching the radio at a time
//! without forcing every public method to take `&mut self` (design
//! note: "radio I/O is serialized behind one owning task").

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc, oneshot};

use meshpower_core::{ContinuationBuffer, Event};

use crate::error::TransportError;
use crate::transport::{DiscoveredDevice, Transport};
use crate::uuids;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const COMMAND_CHANNEL_CAPACITY: usize = 32;

enum Command {
    Scan {
        timeout: Duration,
        target_address: Option<String>,
        reply: oneshot::Sender<Result<Vec<DiscoveredDevice>, TransportError>>,
    },
    Connect {
        device_id: String,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Write {
        command: String,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Disconnect {
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    IsConnected {
        reply: oneshot::Sender<bool>,
    },
}

/// A live bridge radio session, backed by a real BLE adapter.
pub struct BtleBridge {
    commands: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<Event>,
}

impl BtleBridge {
    /// Spawns the owning actor task against the host's first BLE adapter.
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(run(adapter, commands_rx, events_tx.clone()));

        Ok(Self { commands: commands_tx, events_tx })
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .await
            .map_err(|_| TransportError::SessionClosed)?;
        reply_rx.await.map_err(|_| TransportError::SessionClosed)
    }
}

#[async_trait]
impl Transport for BtleBridge {
    async fn scan(
        &self,
        timeout: Duration,
        target_address: Option<&str>,
    ) -> Result<Vec<DiscoveredDevice>, TransportError> {
        let target_address = target_address.map(str::to_owned);
        self.call(|reply| Command::Scan { timeout, target_address, reply }).await?
    }

    async fn connect(&self, device_id: &str) -> Result<(), TransportError> {
        self.call(|reply| Command::Connect { device_id: device_id.to_owned(), reply }).await?
    }

    async fn write(&self, command: &str) -> Result<(), TransportError> {
        self.call(|reply| Command::Write { command: command.to_owned(), reply }).await?
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.call(|reply| Command::Disconnect { reply }).await?
    }

    async fn is_connected(&self) -> bool {
        self.call(|reply| Command::IsConnected { reply }).await.unwrap_or(false)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }
}

struct ConnectedState {
    peripheral: Peripheral,
    write_char: Characteristic,
    notify_task: tokio::task::JoinHandle<()>,
}

async fn run(adapter: Adapter, mut commands: mpsc::Receiver<Command>, events_tx: broadcast::Sender<Event>) {
    let mut connected: Option<ConnectedState> = None;

    while let Some(cmd) = commands.recv().await {
        match cmd {
            Command::Scan { timeout, target_address, reply } => {
                let result = do_scan(&adapter, timeout, target_address.as_deref()).await;
                let _ = reply.send(result);
            }
            Command::Connect { device_id, reply } => {
                if let Some(state) = connected.take() {
                    state.notify_task.abort();
                    let _ = state.peripheral.disconnect().await;
                }
                let result = do_connect(&adapter, &device_id, events_tx.clone()).await;
                match result {
                    Ok(state) => {
                        connected = Some(state);
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::Write { command, reply } => {
                let result = match &connected {
                    Some(state) => state
                        .peripheral
                        .write(&state.write_char, command.as_bytes(), WriteType::WithoutResponse)
                        .await
                        .map_err(TransportError::from),
                    None => Err(TransportError::NotConnected),
                };
                let _ = reply.send(result);
            }
            Command::Disconnect { reply } => {
                let result = if let Some(state) = connected.take() {
                    state.notify_task.abort();
                    match state.peripheral.disconnect().await {
                        Ok(()) => Ok(()),
                        Err(btleplug::Error::NotConnected) => Ok(()),
                        Err(e) if e.to_string().contains("already dropped") => Ok(()),
                        Err(e) => Err(TransportError::from(e)),
                    }
                } else {
                    Ok(())
                };
                let _ = reply.send(result);
            }
            Command::IsConnected { reply } => {
                let is_connected = match &connected {
                    Some(state) => state.peripheral.is_connected().await.unwrap_or(false),
                    None => false,
                };
                let _ = reply.send(is_connected);
            }
        }
    }
}

/// Matches by `target_address` first (if given), then by advertised-name
/// prefix, then by advertised service UUID. An empty result is a normal
/// outcome, not an error — the caller decides what "no bridge found"
/// means to the operator.
async fn do_scan(
    adapter: &Adapter,
    timeout: Duration,
    target_address: Option<&str>,
) -> Result<Vec<DiscoveredDevice>, TransportError> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(timeout).await;
    let peripherals = adapter.peripherals().await?;
    let _ = adapter.stop_scan().await;

    let mut found = Vec::new();
    for peripheral in peripherals {
        let Some(props) = peripheral.properties().await? else { continue };
        let address = props.address.to_string();
        let name = props.local_name.unwrap_or_default();

        let matched = match target_address {
            Some(target) if address.eq_ignore_ascii_case(target) => true,
            _ => {
                uuids::NAME_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
                    || props.services.iter().any(|uuid| *uuid == uuids::SERVICE)
            }
        };

        if matched {
            found.push(DiscoveredDevice {
                id: peripheral.id().to_string(),
                address,
                name,
                rssi: props.rssi,
            });
        }
    }
    Ok(found)
}

async fn do_connect(
    adapter: &Adapter,
    device_id: &str,
    events_tx: broadcast::Sender<Event>,
) -> Result<ConnectedState, TransportError> {
    let peripheral = adapter
        .peripherals()
        .await?
        .into_iter()
        .find(|p| p.id().to_string() == device_id)
        .ok_or(TransportError::BridgeNotFound)?;

    peripheral.connect().await?;
    peripheral.discover_services().await?;

    let characteristics = peripheral.characteristics();
    let notify_char = characteristics
        .iter()
        .find(|c| c.uuid == uuids::NOTIFY_CHAR)
        .cloned()
        .ok_or_else(|| TransportError::ServiceMismatch("notify characteristic not found".into()))?;
    let write_char = characteristics
        .iter()
        .find(|c| c.uuid == uuids::WRITE_CHAR)
        .cloned()
        .ok_or_else(|| TransportError::ServiceMismatch("write characteristic not found".into()))?;

    peripheral.subscribe(&notify_char).await?;

    let mut notifications = peripheral.notifications().await?;
    let notify_task = tokio::spawn(async move {
        let mut buffer = ContinuationBuffer::new();
        while let Some(notification) = notifications.next().await {
            let Ok(chunk) = std::str::from_utf8(&notification.value) else { continue };
            if let Some(event) = buffer.feed(chunk) {
                let _ = events_tx.send(event);
            }
        }
    });

    Ok(ConnectedState { peripheral, write_char, notify_task })
}
