//! Power manager: the equilibrium controller's cycle, state
//! machine, and `disable()`. Policy math itself lives in
//! `meshpower_core::policy`; this module supplies the clock, the radio,
//! and the cooldown/guard machinery around it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use meshpower_core::{
    proportional_plan, should_skip_adjustment, priority_plan, NodeId, NodeRegistry, PowerPolicy,
    Target, Verb,
};

use crate::diag::{my_debug, my_warn, CycleContext, NodeContext};
use crate::sequencer::Sequencer;

const WAIT_FOR_RESPONSES_TIMEOUT: Duration = Duration::from_secs(4);
const WAIT_FOR_RESPONSES_INTERVAL: Duration = Duration::from_millis(100);
const BREATHING_GAP: Duration = Duration::from_secs(1);
const DISABLE_DRAIN: Duration = Duration::from_secs(2);

/// The power-manager state machine. Transitions are driven by cycle progress; any
/// state returns to `Off` once `threshold_mw` is cleared or the loop task
/// is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Off,
    Bootstrapping,
    Polling,
    Waiting,
    Adjusting,
    Cooling,
}

/// RAII guard for the `adjusting` flag ("an implementer should
/// route both success and failure through a single guarded scope so the
/// flag is never leaked"). `try_acquire` fails if a guard is already held,
/// making the flag exclusive with itself; `Drop` always clears it,
/// including on an early `return` out of `evaluate_and_adjust`.
struct AdjustGuard {
    flag: Arc<AtomicBool>,
}

impl AdjustGuard {
    fn try_acquire(flag: Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for AdjustGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Owns the policy cycle for one bridge session. Shared by `Arc` between
/// the facade (which starts/stops it and mutates policy) and its own
/// spawned loop task.
pub struct PowerManager {
    registry: Arc<NodeRegistry>,
    sequencer: Arc<Sequencer>,
    policy: Arc<Mutex<PowerPolicy>>,
    state: Mutex<PowerState>,
    last_adjustment: Mutex<Option<Instant>>,
    adjusting: Arc<AtomicBool>,
    /// Shared with the event dispatcher: telemetry arriving while a poll is
    /// outstanding is tagged with this generation.
    poll_gen: Arc<AtomicU64>,
    loop_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Shared with the event dispatcher so protocol exceptions (`ERROR:`/
    /// `TIMEOUT:`) arriving while an automated poll is outstanding can be
    /// suppressed rather than surfaced to the operator. Set around
    /// the send-then-wait window, cleared everywhere else.
    poll_context: Arc<AtomicBool>,
}

impl PowerManager {
    pub fn new(
        registry: Arc<NodeRegistry>,
        sequencer: Arc<Sequencer>,
        policy: Arc<Mutex<PowerPolicy>>,
        poll_gen: Arc<AtomicU64>,
        poll_context: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            sequencer,
            policy,
            state: Mutex::new(PowerState::Off),
            last_adjustment: Mutex::new(None),
            adjusting: Arc::new(AtomicBool::new(false)),
            poll_gen,
            loop_handle: Mutex::new(None),
            poll_context,
        })
    }

    pub fn state(&self) -> PowerState {
        *self.state.lock().unwrap()
    }

    /// Starts the cycle loop, unless one is already running (the "polling"
    /// flag: re-entry is a no-op).
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.loop_handle.lock().unwrap();
        if handle.is_some() {
            return;
        }
        *self.last_adjustment.lock().unwrap() = None;
        let mgr = Arc::clone(self);
        *handle = Some(tokio::spawn(async move { mgr.run().await }));
    }

    /// Clears the cooldown so the next running cycle evaluates immediately
    /// (via `set_threshold`/`set_priority`).
    pub fn clear_cooldown(&self) {
        *self.last_adjustment.lock().unwrap() = None;
    }

    /// `disable()`: clears the threshold, waits for in-flight
    /// traffic to settle, restores every node with a nonzero target to
    /// that target, then zeroes every `commanded_duty`. Does not itself
    /// cancel the loop task — see `cancel_loop`.
    pub async fn disable(&self) {
        {
            self.policy.lock().unwrap().threshold_mw = None;
        }
        tokio::time::sleep(DISABLE_DRAIN).await;

        let (read_stagger, expected_nodes) = {
            let policy = self.policy.lock().unwrap();
            (policy.read_stagger, policy.expected_nodes)
        };
        for node in self.registry.all() {
            if node.commanded_duty != node.target_duty && node.target_duty > 0 {
                if let Err(e) = self
                    .sequencer
                    .send(Target::Node(node.node_id), Verb::Duty(node.target_duty), read_stagger, expected_nodes)
                    .await
                {
                    let ctx = NodeContext { node: node.node_id, poll_gen: self.poll_gen.load(Ordering::Acquire) };
                    my_warn!(ctx, "disable(): failed restoring to target duty: {e}");
                }
            }
        }

        let now = Instant::now();
        for node in self.registry.all() {
            self.registry.set_commanded(node.node_id, 0, now);
        }
        *self.state.lock().unwrap() = PowerState::Off;
    }

    /// Cancels the running loop task, if any, and best-effort awaits it.
    pub async fn cancel_loop(&self) {
        let handle = self.loop_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    fn is_active(&self) -> bool {
        self.policy.lock().unwrap().threshold_mw.is_some()
    }

    async fn run(self: Arc<Self>) {
        let mut bootstrapped = false;

        'cycles: loop {
            if !self.is_active() {
                break;
            }

            if !bootstrapped {
                *self.state.lock().unwrap() = PowerState::Bootstrapping;
                self.bootstrap().await;
                bootstrapped = true;
                if !self.is_active() {
                    break;
                }
            }

            let poll_gen = self.poll_gen.fetch_add(1, Ordering::AcqRel) + 1;

            self.poll_context.store(true, Ordering::Release);

            *self.state.lock().unwrap() = PowerState::Polling;
            self.poll().await;
            if !self.is_active() {
                self.poll_context.store(false, Ordering::Release);
                break;
            }

            *self.state.lock().unwrap() = PowerState::Waiting;
            self.wait_for_responses(poll_gen).await;
            self.poll_context.store(false, Ordering::Release);
            if !self.is_active() {
                break;
            }

            let stale_timeout = self.policy.lock().unwrap().stale_timeout;
            for stale in self.registry.mark_stale_if_older_than(stale_timeout, Instant::now()) {
                let ctx = NodeContext { node: stale, poll_gen };
                my_warn!(ctx, "went stale");
            }
            if !self.is_active() {
                break;
            }

            tokio::time::sleep(BREATHING_GAP).await;
            if !self.is_active() {
                break 'cycles;
            }

            *self.state.lock().unwrap() = PowerState::Adjusting;
            self.evaluate_and_adjust().await;

            let poll_interval = self.policy.lock().unwrap().poll_interval;
            *self.state.lock().unwrap() = PowerState::Cooling;
            tokio::time::sleep(poll_interval).await;
        }

        *self.state.lock().unwrap() = PowerState::Off;
    }

    /// Probe each not-yet-known id up to `bootstrap_retries`
    /// times, moving on once the node appears in the registry.
    async fn bootstrap(&self) {
        let (expected_nodes, bootstrap_retries, read_stagger) = {
            let policy = self.policy.lock().unwrap();
            (policy.expected_nodes, policy.bootstrap_retries, policy.read_stagger)
        };
        for n in 1..=expected_nodes {
            let Ok(id) = NodeId::new(n) else { continue };
            if self.registry.contains(id) {
                continue;
            }
            for _ in 0..bootstrap_retries {
                if !self.is_active() {
                    return;
                }
                if self.registry.contains(id) {
                    break;
                }
                if let Err(e) = self.sequencer.send(Target::Node(id), Verb::Read, read_stagger, expected_nodes).await {
                    let ctx = NodeContext { node: id, poll_gen: self.poll_gen.load(Ordering::Acquire) };
                    my_debug!(ctx, "bootstrap probe failed: {e}");
                }
            }
        }
    }

    /// A `READ` to every known node, oldest-first.
    async fn poll(&self) {
        let (read_stagger, expected_nodes) = {
            let policy = self.policy.lock().unwrap();
            (policy.read_stagger, policy.expected_nodes)
        };
        if let Err(e) = self.sequencer.send(Target::All, Verb::Read, read_stagger, expected_nodes).await {
            let ctx = CycleContext { poll_gen: self.poll_gen.load(Ordering::Acquire) };
            my_warn!(ctx, "poll broadcast failed: {e}");
        }
    }

    /// Poll every 100ms, up to 4s, for "every currently
    /// responsive node's poll_gen equals the new generation".
    async fn wait_for_responses(&self, poll_gen: u64) {
        let deadline = Instant::now() + WAIT_FOR_RESPONSES_TIMEOUT;
        loop {
            let responsive = self.registry.responsive_nodes();
            if responsive.iter().all(|n| n.poll_gen == poll_gen) {
                return;
            }
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(WAIT_FOR_RESPONSES_INTERVAL).await;
        }
    }

    /// Evaluate and adjust.
    async fn evaluate_and_adjust(&self) {
        let responsive = self.registry.responsive_nodes();

        let (budget, deadband_fraction, priority_node, priority_weight, cooldown, read_stagger, expected_nodes) = {
            let policy = self.policy.lock().unwrap();
            (
                policy.budget(),
                policy.deadband_fraction,
                policy.priority_node,
                policy.priority_weight,
                policy.cooldown,
                policy.read_stagger,
                policy.expected_nodes,
            )
        };

        let Some(budget) = budget else { return };

        if let Some(last) = *self.last_adjustment.lock().unwrap() {
            if last.elapsed() < cooldown {
                return;
            }
        }

        if should_skip_adjustment(&responsive, budget, deadband_fraction) {
            return;
        }

        let Some(_guard) = AdjustGuard::try_acquire(Arc::clone(&self.adjusting)) else { return };

        let plan = match priority_node {
            Some(p) if responsive.iter().any(|n| n.node_id == p) => {
                priority_plan(&responsive, budget, priority_weight, p)
            }
            _ => proportional_plan(&responsive, budget),
        };

        for adjustment in plan {
            let result = self
                .sequencer
                .send(Target::Node(adjustment.node), Verb::Duty(adjustment.new_duty), read_stagger, expected_nodes)
                .await;
            match result {
                Ok(()) => self.registry.set_commanded(adjustment.node, adjustment.new_duty, Instant::now()),
                Err(e) => {
                    let ctx = NodeContext { node: adjustment.node, poll_gen: self.poll_gen.load(Ordering::Acquire) };
                    my_warn!(ctx, "adjustment failed: {e}");
                }
            }
        }

        *self.last_adjustment.lock().unwrap() = Some(Instant::now());
    }
}
