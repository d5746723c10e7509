//! End-to-end scenarios, driven through the public
//! `Controller` facade against the mock bridge in `tests/support`, with
//! paused tokio time standing in for the real radio's wall-clock pacing.

mod support;

use std::time::Duration;

use meshpower_core::{NodeId, Target};
use meshpower_controller::Controller;
use support::MockTransport;

fn nid(n: u8) -> NodeId {
    NodeId::new(n).unwrap()
}

#[tokio::test(start_paused = true)]
async fn s1_proportional_reduction_end_to_end() {
    let transport = MockTransport::new();
    transport.set_telemetry(nid(1), 100, 12.0, 400.0, 5000.0);
    transport.set_telemetry(nid(2), 100, 12.0, 400.0, 5000.0);

    let controller = Controller::new(transport.clone());
    controller.set_threshold(4000.0); // budget = 4000 - 500 headroom = 3500

    tokio::time::sleep(Duration::from_secs(17)).await;
    controller.clear_threshold().await;

    let writes = transport.writes();
    assert!(writes.contains(&"1:DUTY:35".to_string()), "writes: {writes:?}");
    assert!(writes.contains(&"2:DUTY:35".to_string()), "writes: {writes:?}");
    assert!(writes.iter().all(|w| !w.contains("ALL")));
}

#[tokio::test(start_paused = true)]
async fn s2_priority_preservation_end_to_end() {
    let transport = MockTransport::new();
    transport.set_telemetry(nid(1), 100, 12.0, 400.0, 5000.0);
    transport.set_telemetry(nid(2), 100, 12.0, 400.0, 5000.0);

    let controller = Controller::new(transport.clone());
    controller.set_threshold(4000.0);
    controller.set_priority(nid(1)).expect("threshold is already set");

    tokio::time::sleep(Duration::from_secs(17)).await;
    controller.clear_threshold().await;

    let writes = transport.writes();
    assert!(writes.contains(&"1:DUTY:47".to_string()), "writes: {writes:?}");
    assert!(writes.contains(&"2:DUTY:23".to_string()), "writes: {writes:?}");
}

#[tokio::test(start_paused = true)]
async fn s4_deadband_emits_no_duty_writes() {
    let transport = MockTransport::new();
    // total = 3450, budget = 3500, band = 175mW -> within band.
    transport.set_telemetry(nid(1), 69, 12.0, 143.75, 1725.0);
    transport.set_telemetry(nid(2), 69, 12.0, 143.75, 1725.0);

    let controller = Controller::new(transport.clone());
    controller.set_threshold(4000.0);

    tokio::time::sleep(Duration::from_secs(17)).await;
    controller.clear_threshold().await;

    let writes = transport.writes();
    assert!(writes.iter().all(|w| !w.contains("DUTY")), "writes: {writes:?}");
}

#[tokio::test(start_paused = true)]
async fn set_priority_before_any_threshold_is_rejected() {
    let transport = MockTransport::new();
    let controller = Controller::new(transport.clone());
    assert!(controller.set_priority(nid(1)).is_err());
}

#[tokio::test(start_paused = true)]
async fn set_target_duty_clamps_and_never_writes_all() {
    let transport = MockTransport::new();
    let controller = Controller::new(transport.clone());

    controller.set_target_duty(Target::Node(nid(3)), 150).await.unwrap();

    let writes = transport.writes();
    assert_eq!(writes, vec!["3:DUTY:100"]);
}
