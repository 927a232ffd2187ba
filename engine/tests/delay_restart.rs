//! End-to-end scenario 5: 11 consecutive over-budget cycles. Each of the
//! first 10 stops the driver, broadcasts an `XRun`, and restarts it,
//! returning `true` (keep the cycle thread alive); the 11th gives up and
//! returns `false`.

mod common;

use std::sync::atomic::Ordering;

use engine::event::EventPlane;
use engine::inprocess::InProcessTable;

#[test]
fn eleventh_consecutive_delay_exits_the_cycle_thread() {
    let cfg = common::test_config();
    assert!(cfg.realtime);
    let engine = common::new_engine(&cfg);
    let events = EventPlane::new();
    let inprocess = InProcessTable::new();
    let mut adapter = common::new_adapter(&cfg);

    let period_usecs = adapter.period_usecs();
    let delayed_usecs = 2 * period_usecs;

    for n in 1..=10 {
        adapter.driver_mut().set_next_delayed_usecs(delayed_usecs);
        let keep_going = engine::executor::run_cycle(&engine, &events, &inprocess, &mut adapter);
        assert!(keep_going, "cycle {n} should restart the driver and continue");
        assert_eq!(engine.consecutive_delay.load(Ordering::SeqCst), n);
        assert_eq!(adapter.driver_mut().stop_count.load(Ordering::SeqCst), n as u64);
        assert_eq!(adapter.driver_mut().start_count.load(Ordering::SeqCst), n as u64);
    }

    adapter.driver_mut().set_next_delayed_usecs(delayed_usecs);
    let keep_going = engine::executor::run_cycle(&engine, &events, &inprocess, &mut adapter);
    assert!(!keep_going, "the 11th consecutive delay should exit the cycle thread");
    assert_eq!(engine.consecutive_delay.load(Ordering::SeqCst), 11);
    // The 11th delay is fatal before the stop/restart dance runs again.
    assert_eq!(adapter.driver_mut().stop_count.load(Ordering::SeqCst), 10);
    assert_eq!(adapter.driver_mut().start_count.load(Ordering::SeqCst), 10);
}
