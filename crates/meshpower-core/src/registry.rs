//! Node registry: per-node last-observed telemetry and commanded
//! state, behind a single exclusive gate so the power manager's math always
//! sees a stable snapshot for the duration of one evaluation.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::{clamp_pct, NodeId};

/// Last-observed state for one mesh node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeState {
    pub node_id: NodeId,
    /// Last duty percent reported *by the node*.
    pub duty: u8,
    /// Last duty percent the power manager *commanded*. Distinct from
    /// `duty` to avoid feeding stale telemetry back into the control loop.
    pub commanded_duty: u8,
    /// Operator-declared ceiling; the power manager never commands above it.
    pub target_duty: u8,
    pub voltage_v: f64,
    pub current_ma: f64,
    pub power_mw: f64,
    pub last_seen: Instant,
    pub responsive: bool,
    pub poll_gen: u64,
}

impl NodeState {
    fn new(node_id: NodeId, now: Instant) -> Self {
        Self {
            node_id,
            duty: 0,
            commanded_duty: 0,
            target_duty: 0,
            voltage_v: 0.0,
            current_ma: 0.0,
            power_mw: 0.0,
            last_seen: now,
            responsive: true,
            poll_gen: 0,
        }
    }
}

/// The node registry. All mutating operations are O(1) and go through a
/// single `Mutex`; readers either lock briefly or work from a snapshot
/// returned by `all()`/`responsive_nodes()`.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: Mutex<BTreeMap<NodeId, NodeState>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates telemetry for `node_id`, creating the entry if this is the
    /// first time it has been seen. When `power_management_active` is
    /// false, `commanded_duty` tracks `duty` directly so a
    /// subsequent `set_threshold` has a sane baseline to snapshot from.
    pub fn upsert_telemetry(
        &self,
        node_id: NodeId,
        duty: u8,
        voltage_v: f64,
        current_ma: f64,
        power_mw: f64,
        poll_gen: u64,
        now: Instant,
        power_management_active: bool,
    ) {
        let mut nodes = self.nodes.lock().unwrap();
        let entry = nodes.entry(node_id).or_insert_with(|| NodeState::new(node_id, now));
        entry.duty = duty;
        entry.voltage_v = voltage_v;
        entry.current_ma = current_ma;
        entry.power_mw = power_mw;
        entry.last_seen = now;
        entry.responsive = true;
        entry.poll_gen = poll_gen;
        if !power_management_active {
            entry.commanded_duty = duty;
        }
    }

    /// Explicit operator intent: the node's ceiling. Never set from
    /// telemetry.
    pub fn set_target(&self, node_id: NodeId, duty: u8, now: Instant) {
        let mut nodes = self.nodes.lock().unwrap();
        let entry = nodes.entry(node_id).or_insert_with(|| NodeState::new(node_id, now));
        entry.target_duty = clamp_pct(duty as i32);
    }

    /// Used only by the power manager after a successful send.
    pub fn set_commanded(&self, node_id: NodeId, duty: u8, now: Instant) {
        let mut nodes = self.nodes.lock().unwrap();
        let entry = nodes.entry(node_id).or_insert_with(|| NodeState::new(node_id, now));
        entry.commanded_duty = clamp_pct(duty as i32);
    }

    /// Marks every entry whose `last_seen` predates `now - stale_timeout` as
    /// unresponsive. Returns the node ids that *just* transitioned to stale,
    /// so the caller logs the transition exactly once.
    pub fn mark_stale_if_older_than(&self, stale_timeout: Duration, now: Instant) -> Vec<NodeId> {
        let mut nodes = self.nodes.lock().unwrap();
        let mut newly_stale = Vec::new();
        for state in nodes.values_mut() {
            if state.responsive && now.saturating_duration_since(state.last_seen) > stale_timeout {
                state.responsive = false;
                newly_stale.push(state.node_id);
            }
        }
        newly_stale
    }

    /// A consistent snapshot of every responsive node, ascending by id.
    pub fn responsive_nodes(&self) -> Vec<NodeState> {
        self.nodes
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.responsive)
            .copied()
            .collect()
    }

    /// A consistent snapshot of every known node, ascending by id.
    pub fn all(&self) -> Vec<NodeState> {
        self.nodes.lock().unwrap().values().copied().collect()
    }

    /// Every node id currently in the registry, ascending.
    pub fn known_ids(&self) -> Vec<NodeId> {
        self.nodes.lock().unwrap().keys().copied().collect()
    }

    pub fn get(&self, node_id: NodeId) -> Option<NodeState> {
        self.nodes.lock().unwrap().get(&node_id).copied()
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.lock().unwrap().contains_key(&node_id)
    }
}
