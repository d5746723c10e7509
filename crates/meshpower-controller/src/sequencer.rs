//! Async half of the command sequencer: enforces `read_stagger`
//! between writes and expands `Target::All` against a live registry
//! snapshot. Byte formatting and clamping stay in
//! `meshpower_core::sequencer`; this module only adds the things that need
//! I/O and a clock.

use std::sync::Arc;
use std::time::Duration;

use meshpower_ble::{Transport, TransportError};
use meshpower_core::{format_command, NodeId, NodeRegistry, Target, Verb};

/// Serializes writes to one bridge session. Cheap to clone-by-`Arc`; shared
/// between the power-manager loop and the facade's one-shot methods so
/// both paths observe the same spacing.
pub struct Sequencer {
    transport: Arc<dyn Transport>,
    registry: Arc<NodeRegistry>,
}

impl Sequencer {
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<NodeRegistry>) -> Self {
        Self { transport, registry }
    }

    /// Sends `verb` to `target`. `Target::All` expands to every digit-
    /// identified node currently in the registry, ascending by id; if the
    /// registry is empty it falls back to `1..=expected_nodes`.
    /// The literal `ALL` is never written to the wire. Each expanded send
    /// observes the full `read_stagger` gap, including a lone send.
    pub async fn send(
        &self,
        target: Target,
        verb: Verb,
        read_stagger: Duration,
        expected_nodes: u8,
    ) -> Result<(), TransportError> {
        for node in self.expand(target, expected_nodes) {
            self.write_one(node, verb).await?;
            tokio::time::sleep(read_stagger).await;
        }
        Ok(())
    }

    async fn write_one(&self, node: NodeId, verb: Verb) -> Result<(), TransportError> {
        let bytes = format_command(node, verb);
        self.transport.write(&bytes).await
    }

    /// Resolves `target` to the concrete node ids a send would reach,
    /// without performing any I/O. Exposed so the facade can apply the
    /// same `ALL` expansion when snapshotting operator intent into the
    /// registry (e.g. `set_target_duty`).
    pub(crate) fn expand(&self, target: Target, expected_nodes: u8) -> Vec<NodeId> {
        match target {
            Target::Node(id) => vec![id],
            Target::All => {
                let known = self.registry.known_ids();
                if !known.is_empty() {
                    known
                } else {
                    (1..=expected_nodes).filter_map(|n| NodeId::new(n).ok()).collect()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    struct RecordingTransport {
        writes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn scan(
            &self,
            _timeout: Duration,
            _target_address: Option<&str>,
        ) -> Result<Vec<meshpower_ble::DiscoveredDevice>, TransportError> {
            Ok(Vec::new())
        }
        async fn connect(&self, _device_id: &str) -> Result<(), TransportError> {
            Ok(())
        }
        async fn write(&self, command: &str) -> Result<(), TransportError> {
            self.writes.lock().unwrap().push(command.to_string());
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn is_connected(&self) -> bool {
            true
        }
        fn subscribe_events(&self) -> broadcast::Receiver<meshpower_core::Event> {
            broadcast::channel(1).1
        }
    }

    fn nid(n: u8) -> NodeId {
        NodeId::new(n).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn s6_broadcast_expands_in_ascending_order_without_all_on_wire() {
        let registry = Arc::new(NodeRegistry::new());
        registry.set_target(nid(1), 40, std::time::Instant::now());
        registry.set_target(nid(2), 40, std::time::Instant::now());
        let transport = Arc::new(RecordingTransport { writes: Mutex::new(Vec::new()) });
        let seq = Sequencer::new(transport.clone(), registry);

        seq.send(Target::All, Verb::Duty(40), Duration::from_millis(2_500), 2).await.unwrap();

        let writes = transport.writes.lock().unwrap().clone();
        assert_eq!(writes, vec!["1:DUTY:40", "2:DUTY:40"]);
        assert!(writes.iter().all(|w| !w.contains("ALL")));
    }

    #[tokio::test]
    async fn falls_back_to_expected_node_range_when_registry_empty() {
        let registry = Arc::new(NodeRegistry::new());
        let transport = Arc::new(RecordingTransport { writes: Mutex::new(Vec::new()) });
        let seq = Sequencer::new(transport.clone(), registry);

        seq.send(Target::All, Verb::Read, Duration::from_millis(1), 2).await.unwrap();

        let writes = transport.writes.lock().unwrap().clone();
        assert_eq!(writes, vec!["1:READ", "2:READ"]);
    }
}
