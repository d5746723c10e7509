//! Controller facade: the one surface operator-facing code talks
//! to. Accepts intents synchronously (aside from the radio round-trip
//! itself), dispatches through the sequencer, and owns the power manager's
//! lifecycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use meshpower_ble::Transport;
use meshpower_core::{Event, NodeId, NodeRegistry, PolicyError, PowerPolicy, Target, Verb};

use crate::diag::{my_debug, NodeContext};
use crate::error::ControllerError;
use crate::power::{PowerManager, PowerState};
use crate::sequencer::Sequencer;

/// Top-level handle a caller holds for the life of one bridge session.
pub struct Controller {
    transport: Arc<dyn Transport>,
    registry: Arc<NodeRegistry>,
    sequencer: Arc<Sequencer>,
    policy: Arc<Mutex<PowerPolicy>>,
    power: Arc<PowerManager>,
    monitoring: Mutex<bool>,
    event_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Controller {
    /// Wraps an already-connected transport. Spawns the event-dispatch
    /// task that feeds notifications into the registry; the power-manager
    /// loop itself is started only by `set_threshold`.
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        let registry = Arc::new(NodeRegistry::new());
        let sequencer = Arc::new(Sequencer::new(Arc::clone(&transport), Arc::clone(&registry)));
        let policy = Arc::new(Mutex::new(PowerPolicy::default()));
        let poll_context = Arc::new(AtomicBool::new(false));
        let poll_gen = Arc::new(AtomicU64::new(0));
        let power = PowerManager::new(
            Arc::clone(&registry),
            Arc::clone(&sequencer),
            Arc::clone(&policy),
            Arc::clone(&poll_gen),
            Arc::clone(&poll_context),
        );

        let controller = Arc::new(Self {
            transport: Arc::clone(&transport),
            registry: Arc::clone(&registry),
            sequencer,
            policy,
            power,
            monitoring: Mutex::new(false),
            event_task: Mutex::new(None),
        });

        let events = transport.subscribe_events();
        let dispatch_registry = Arc::clone(&registry);
        let dispatch_policy = Arc::clone(&controller.policy);
        let handle = tokio::spawn(dispatch_events(events, dispatch_registry, dispatch_policy, poll_gen, poll_context));
        *controller.event_task.lock().unwrap() = Some(handle);

        controller
    }

    /// `set_target_duty`: clamps, updates the registry's
    /// `target_duty`, and sends `DUTY:<pct>` (expanding `ALL`).
    pub async fn set_target_duty(&self, target: Target, requested: i32) -> Result<(), ControllerError> {
        let (verb, clamped) = Verb::duty_clamped(requested);
        let Verb::Duty(pct) = verb else { unreachable!("duty_clamped always returns Verb::Duty") };
        if clamped {
            log::info!("duty {requested} clamped to {pct}");
        }

        let now = Instant::now();
        let expected_nodes = self.policy.lock().unwrap().expected_nodes;
        for id in self.sequencer.expand(target, expected_nodes) {
            self.registry.set_target(id, pct, now);
        }

        self.one_shot(target, verb).await
    }

    pub async fn ramp(&self, target: Target) -> Result<(), ControllerError> {
        self.one_shot(target, Verb::Ramp).await
    }

    /// Also clears the internal "monitoring" flag set by `monitor()`.
    pub async fn stop(&self, target: Target) -> Result<(), ControllerError> {
        *self.monitoring.lock().unwrap() = false;
        self.one_shot(target, Verb::Stop).await
    }

    pub async fn read(&self, target: Target) -> Result<(), ControllerError> {
        self.one_shot(target, Verb::Read).await
    }

    /// One-shot `STATUS` request to the node(s). For the facade's own
    /// human-readable snapshot, see [`Controller::status`].
    pub async fn node_status(&self, target: Target) -> Result<(), ControllerError> {
        self.one_shot(target, Verb::Status).await
    }

    pub async fn monitor(&self, target: Target) -> Result<(), ControllerError> {
        *self.monitoring.lock().unwrap() = true;
        self.one_shot(target, Verb::Monitor).await
    }

    pub async fn turn_on(&self, target: Target) -> Result<(), ControllerError> {
        self.one_shot(target, Verb::On).await
    }

    pub async fn turn_off(&self, target: Target) -> Result<(), ControllerError> {
        self.one_shot(target, Verb::Off).await
    }

    async fn one_shot(&self, target: Target, verb: Verb) -> Result<(), ControllerError> {
        let (read_stagger, expected_nodes) = {
            let policy = self.policy.lock().unwrap();
            (policy.read_stagger, policy.expected_nodes)
        };
        self.sequencer.send(target, verb, read_stagger, expected_nodes).await?;
        Ok(())
    }

    /// `set_threshold`: creates the power manager's active state if
    /// absent, snapshots nonzero `duty` into `target_duty` for nodes with
    /// no explicit target yet, clears the cooldown, and starts the loop.
    pub fn set_threshold(self: &Arc<Self>, threshold_mw: f64) {
        let now = Instant::now();
        let was_inactive = {
            let mut policy = self.policy.lock().unwrap();
            let was_inactive = policy.threshold_mw.is_none();
            policy.threshold_mw = Some(threshold_mw);
            was_inactive
        };

        if was_inactive {
            for node in self.registry.all() {
                if node.target_duty == 0 && node.duty > 0 {
                    self.registry.set_target(node.node_id, node.duty, now);
                }
            }
        }

        self.power.clear_cooldown();
        self.power.start();
    }

    /// `clear_threshold`: `disable()` then cancel the loop.
    pub async fn clear_threshold(&self) {
        self.power.disable().await;
        self.power.cancel_loop().await;
    }

    /// Fails with `PriorityBeforeThreshold` if no threshold has ever been
    /// set. Naming a node the registry has never seen telemetry from is
    /// still accepted; only "before any threshold" is rejected.
    pub fn set_priority(&self, node: NodeId) -> Result<(), ControllerError> {
        let mut policy = self.policy.lock().unwrap();
        if policy.threshold_mw.is_none() {
            return Err(ControllerError::Policy(PolicyError::PriorityBeforeThreshold));
        }
        policy.priority_node = Some(node);
        drop(policy);
        self.power.clear_cooldown();
        Ok(())
    }

    pub fn clear_priority(&self) {
        self.policy.lock().unwrap().priority_node = None;
        self.power.clear_cooldown();
    }

    pub fn power_state(&self) -> PowerState {
        self.power.state()
    }

    /// Aggregate operator-facing snapshot: threshold/budget/priority, then
    /// one line per known node (see DESIGN.md for the line format).
    pub fn status(&self) -> String {
        let mut lines = Vec::new();
        {
            let policy = self.policy.lock().unwrap();
            match policy.threshold_mw {
                Some(t) => lines.push(format!(
                    "threshold={t:.0}mW budget={:.0}mW",
                    policy.budget().unwrap_or(0.0)
                )),
                None => lines.push("power management disabled".to_string()),
            }
            match policy.priority_node {
                Some(p) => lines.push(format!("priority=node {p} (weight {:.1})", policy.priority_weight)),
                None => lines.push("priority=none".to_string()),
            }
        }

        for node in self.registry.all() {
            let target = if node.target_duty > 0 {
                format!("/{}", node.target_duty)
            } else {
                String::new()
            };
            let liveness = if node.responsive { "ok" } else { "stale" };
            lines.push(format!(
                "Node {}: D:{}%{target} V:{:.3}V I:{:.1}mA P:{:.1}mW [{liveness}]",
                node.node_id, node.duty, node.voltage_v, node.current_ma, node.power_mw
            ));
        }

        lines.join("\n")
    }

    pub async fn disconnect(&self) {
        self.power.cancel_loop().await;
        if let Some(handle) = self.event_task.lock().unwrap().take() {
            handle.abort();
        }
        let _ = self.transport.disconnect().await;
    }
}

/// Feeds classified events into the registry. Telemetry always updates
/// state; `ERROR:`/`TIMEOUT:` events are logged at `warn` when no
/// automated poll is outstanding, and at `debug` otherwise, to reduce
/// noise during ordinary cycling.
async fn dispatch_events(
    mut events: tokio::sync::broadcast::Receiver<Event>,
    registry: Arc<NodeRegistry>,
    policy: Arc<Mutex<PowerPolicy>>,
    poll_gen: Arc<AtomicU64>,
    poll_context: Arc<AtomicBool>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("event dispatch lagged, dropped {skipped} notifications");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };

        match event {
            Event::Telemetry(t) => {
                let active = policy.lock().unwrap().threshold_mw.is_some();
                let gen = poll_gen.load(Ordering::Acquire);
                let ctx = NodeContext { node: t.node, poll_gen: gen };
                my_debug!(ctx, "telemetry: duty={}% {:.3}V {:.1}mA {:.1}mW", t.duty_pct, t.voltage_v, t.current_ma, t.power_mw);
                registry.upsert_telemetry(t.node, t.duty_pct, t.voltage_v, t.current_ma, t.power_mw, gen, Instant::now(), active);
            }
            Event::Error(detail) => log_protocol_exception(&poll_context, "ERROR", &detail),
            Event::Timeout(detail) => log_protocol_exception(&poll_context, "TIMEOUT", &detail),
            Event::Ack(detail) => log::debug!("bridge ack: {detail}"),
            Event::Ready => log::info!("bridge reports mesh ready"),
            Event::Unclassified(line) => log::debug!("unclassified notification: {line}"),
        }
    }
}

fn log_protocol_exception(poll_context: &Arc<AtomicBool>, kind: &str, detail: &str) {
    if poll_context.load(Ordering::Acquire) {
        log::debug!("{kind}: {detail} (suppressed during automated poll)");
    } else {
        log::warn!("{kind}: {detail}");
    }
}
