//! Power-policy math: mW-per-percent estimation,
//! deadband/no-op detection, and the proportional and priority budget
//! policies. No I/O, no clock reads — everything here is a total function
//! of a registry snapshot, so it is directly unit-testable against the
//! scenarios without a runtime.

use std::time::Duration;

use crate::registry::NodeState;
use crate::types::{clamp_pct, NodeId};

/// Process-wide power-management tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerPolicy {
    pub threshold_mw: Option<f64>,
    pub headroom_mw: f64,
    pub priority_node: Option<NodeId>,
    pub priority_weight: f64,
    pub poll_interval: Duration,
    pub read_stagger: Duration,
    pub stale_timeout: Duration,
    pub cooldown: Duration,
    pub deadband_fraction: f64,
    pub expected_nodes: u8,
    pub bootstrap_retries: u8,
}

impl Default for PowerPolicy {
    fn default() -> Self {
        Self {
            threshold_mw: None,
            headroom_mw: 500.0,
            priority_node: None,
            priority_weight: 2.0,
            poll_interval: Duration::from_millis(3_000),
            read_stagger: Duration::from_millis(2_500),
            stale_timeout: Duration::from_millis(45_000),
            cooldown: Duration::from_millis(5_000),
            deadband_fraction: 0.05,
            expected_nodes: 2,
            bootstrap_retries: 3,
        }
    }
}

impl PowerPolicy {
    /// `threshold - headroom`, or `None` while power management is disabled
    /// or the budget would be non-positive ("return without
    /// acting" when `budget <= 0`).
    pub fn budget(&self) -> Option<f64> {
        self.threshold_mw.map(|t| t - self.headroom_mw).filter(|b| *b > 0.0)
    }
}

/// A single-node, single-cycle duty adjustment to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjustment {
    pub node: NodeId,
    pub new_duty: u8,
}

/// Effective duty used as the basis for power-per-percent estimation and
/// for "current value" comparisons: the commanded duty if the power
/// manager has ever sent one, else the node's last-reported duty.
fn effective_duty(node: &NodeState) -> u8 {
    if node.commanded_duty > 0 {
        node.commanded_duty
    } else {
        node.duty
    }
}

/// mW consumed per percent of commanded duty for one node.
///
/// Falls back to the mean ratio across `context` when `n`'s own ratio is
/// undefined (duty or power is zero), and to a constant 50 mW/% when no
/// node in `context` has a well-defined ratio either.
pub fn mw_per_pct(node: &NodeState, context: &[NodeState]) -> f64 {
    let d = effective_duty(node);
    if d > 0 && node.power_mw > 0.0 {
        return node.power_mw / f64::from(d);
    }

    let ratios: Vec<f64> = context
        .iter()
        .filter_map(|m| {
            let dm = effective_duty(m);
            (dm > 0 && m.power_mw > 0.0).then(|| m.power_mw / f64::from(dm))
        })
        .collect();

    if ratios.is_empty() {
        50.0
    } else {
        ratios.iter().sum::<f64>() / ratios.len() as f64
    }
}

/// The duty ceiling a nudge may not cross: `target_duty` if the operator
/// has set one, else 100 ("nudge a single node").
fn duty_ceiling(node: &NodeState) -> u8 {
    if node.target_duty > 0 {
        node.target_duty
    } else {
        100
    }
}

/// Computes the new commanded duty for `node` given a target share in mW,
/// or `None` if the computed value equals the current one ("no change").
pub fn nudge(node: &NodeState, share_mw: f64, context: &[NodeState]) -> Option<Adjustment> {
    let per_pct = mw_per_pct(node, context);
    let ideal_pct = if per_pct > 0.0 { share_mw / per_pct } else { 0.0 };
    let ceiling = duty_ceiling(node);
    let bounded = ideal_pct.clamp(0.0, f64::from(ceiling));
    let new_duty = clamp_pct(bounded.round() as i32);

    let current = effective_duty(node);
    if new_duty == current {
        None
    } else {
        Some(Adjustment { node: node.node_id, new_duty })
    }
}

/// Whether the maximum power `node` could draw, at its ceiling, covers
/// (or exceeds) `share_mw` — used by the priority policy to decide whether
/// surplus budget should flow to the other nodes.
fn max_power(node: &NodeState, context: &[NodeState]) -> f64 {
    f64::from(duty_ceiling(node)) * mw_per_pct(node, context)
}

/// "Evaluate and adjust" skip conditions, minus the cooldown check
/// (which needs a clock and belongs to the caller): the deadband, and
/// "nothing left to raise".
pub fn should_skip_adjustment(responsive: &[NodeState], budget: f64, deadband_fraction: f64) -> bool {
    if responsive.is_empty() {
        return true;
    }

    let total: f64 = responsive.iter().map(|n| n.power_mw).sum();

    if (total - budget).abs() < budget * deadband_fraction {
        return true;
    }

    let nothing_to_raise = responsive
        .iter()
        .all(|n| n.commanded_duty >= n.target_duty || n.target_duty == 0)
        && total <= budget;

    nothing_to_raise
}

/// Equal shares of the budget across every responsive node, nudged in
/// ascending node-id order ("proportional policy").
pub fn proportional_plan(responsive: &[NodeState], budget: f64) -> Vec<Adjustment> {
    if responsive.is_empty() {
        return Vec::new();
    }
    let share = budget / responsive.len() as f64;
    responsive.iter().filter_map(|n| nudge(n, share, responsive)).collect()
}

/// Priority-weighted shares: the priority node is nudged first, then the
/// remaining nodes in ascending id order ("priority policy").
///
/// When the priority node's ceiling cannot absorb its tentative share, the
/// surplus is handed to the others (scenario S3).
pub fn priority_plan(
    responsive: &[NodeState],
    budget: f64,
    priority_weight: f64,
    priority_node: NodeId,
) -> Vec<Adjustment> {
    let n = responsive.len();
    if n == 0 {
        return Vec::new();
    }
    let Some(priority_idx) = responsive.iter().position(|node| node.node_id == priority_node)
    else {
        return proportional_plan(responsive, budget);
    };
    let priority = &responsive[priority_idx];

    let others_count = n.saturating_sub(1);
    let mut priority_budget = if others_count == 0 {
        budget
    } else {
        budget * (priority_weight / (priority_weight + others_count as f64))
    };

    let p_max = max_power(priority, responsive);
    if p_max < priority_budget {
        priority_budget = p_max;
    }

    let others_share = if others_count == 0 {
        0.0
    } else {
        (budget - priority_budget) / others_count as f64
    };

    let mut plan = Vec::new();
    if let Some(adj) = nudge(priority, priority_budget, responsive) {
        plan.push(adj);
    }
    for node in responsive {
        if node.node_id == priority.node_id {
            continue;
        }
        if let Some(adj) = nudge(node, others_share, responsive) {
            plan.push(adj);
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn node(id: u8, duty: u8, commanded: u8, target: u8, power_mw: f64) -> NodeState {
        NodeState {
            node_id: NodeId::new(id).unwrap(),
            duty,
            commanded_duty: commanded,
            target_duty: target,
            voltage_v: 0.0,
            current_ma: 0.0,
            power_mw,
            last_seen: Instant::now(),
            responsive: true,
            poll_gen: 0,
        }
    }

    #[test]
    fn mw_per_pct_uses_commanded_duty_when_set() {
        let n = node(1, 100, 35, 100, 1750.0);
        assert_eq!(mw_per_pct(&n, &[n]), 50.0);
    }

    #[test]
    fn mw_per_pct_falls_back_to_mean_then_constant() {
        let a = node(1, 0, 0, 100, 0.0);
        let b = node(2, 100, 50, 100, 2500.0);
        assert_eq!(mw_per_pct(&a, &[a, b]), 50.0);

        let only_undefined = node(3, 0, 0, 100, 0.0);
        assert_eq!(mw_per_pct(&only_undefined, &[only_undefined]), 50.0);
    }

    #[test]
    fn s1_proportional_reduction() {
        let n1 = node(1, 100, 0, 100, 5000.0);
        let n2 = node(2, 100, 0, 100, 5000.0);
        let responsive = vec![n1, n2];
        let budget = 3500.0;
        assert!(!should_skip_adjustment(&responsive, budget, 0.05));
        let plan = proportional_plan(&responsive, budget);
        assert_eq!(plan, vec![
            Adjustment { node: n1.node_id, new_duty: 35 },
            Adjustment { node: n2.node_id, new_duty: 35 },
        ]);
    }

    #[test]
    fn s4_deadband_skips() {
        let n1 = node(1, 69, 0, 100, 1725.0);
        let n2 = node(2, 69, 0, 100, 1725.0);
        let responsive = vec![n1, n2];
        // total = 3450, budget = 3500, band = 175mW -> within band.
        assert!(should_skip_adjustment(&responsive, 3500.0, 0.05));
    }

    #[test]
    fn s2_priority_preservation() {
        let n1 = node(1, 100, 0, 100, 5000.0);
        let n2 = node(2, 100, 0, 100, 5000.0);
        let responsive = vec![n1, n2];
        let plan = priority_plan(&responsive, 3500.0, 2.0, n1.node_id);
        // n1 share ~2333mW @ 50mW/% -> 47%, n2 share ~1167mW -> 23%
        assert_eq!(plan, vec![
            Adjustment { node: n1.node_id, new_duty: 47 },
            Adjustment { node: n2.node_id, new_duty: 23 },
        ]);
    }

    #[test]
    fn s3_priority_cannot_absorb_share_surplus_flows_to_others() {
        // Tentative priority share at weight 2 vs 1 other is budget*2/3 ≈ 2333mW.
        // Give the priority node a ceiling (20% @ 50mW/%) that sits below that,
        // so the cap ("if p_max < priority_budget, cap") actually
        // engages — see DESIGN.md for why these numbers differ from the
        // other worked example, whose own numbers never cross it.
        let n1 = node(1, 20, 0, 20, 1000.0);
        let n2 = node(2, 100, 0, 100, 5000.0);
        let responsive = vec![n1, n2];
        let plan = priority_plan(&responsive, 3500.0, 2.0, n1.node_id);
        assert_eq!(plan, vec![
            Adjustment { node: n1.node_id, new_duty: 20 },
            Adjustment { node: n2.node_id, new_duty: 50 },
        ]);
    }

    #[test]
    fn priority_preservation_never_drops_below_prior_value_when_budget_holds() {
        let n1 = node(1, 40, 40, 100, 2000.0);
        let n2 = node(2, 60, 60, 100, 3000.0);
        let responsive = vec![n1, n2];
        let plan = priority_plan(&responsive, 3500.0, 2.0, n1.node_id);
        let n1_after = plan.iter().find(|a| a.node == n1.node_id);
        if let Some(adj) = n1_after {
            assert!(adj.new_duty >= n1.commanded_duty);
        }
    }

    #[test]
    fn no_adjustment_ever_exceeds_target_duty() {
        let n = node(1, 100, 0, 40, 5000.0);
        let adj = nudge(&n, 100_000.0, &[n]).unwrap();
        assert!(adj.new_duty <= 40);
    }
}
