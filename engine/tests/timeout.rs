//! End-to-end scenario 4: a client that blocks past its subgraph
//! timeout is marked `timed_out`; a second consecutive timeout escalates
//! to an error and the client is zombified in that cycle's post-process.
//!
//! The test primes `awake_at` before each cycle to stand in for a real
//! external client's own "I've started processing" signal (which this
//! harness, lacking an actual second process to drive the subgraph fd,
//! cannot produce); without it every timeout would read as a forgiven
//! scheduler fault rather than a stuck client.

mod common;

use engine::client::ClientKind;
use engine::event::EventPlane;
use engine::inprocess::InProcessTable;

#[test]
fn second_consecutive_timeout_zombifies_the_client() {
    let mut cfg = common::test_config();
    cfg.realtime = false;
    cfg.client_timeout_msecs = 20;
    let engine = common::new_engine(&cfg);
    let events = EventPlane::new();
    let inprocess = InProcessTable::new();

    let e = common::register_client(&engine, "slow", ClientKind::External);
    common::activate(&engine, &events, e.slot);

    let mut adapter = common::new_adapter(&cfg);

    engine.graph.lock().clients.get_mut(e).unwrap().awake_at = Some(1);
    assert!(engine::executor::run_cycle(&engine, &events, &inprocess, &mut adapter));
    {
        let graph = engine.graph.lock();
        let client = graph.clients.get(e).unwrap();
        assert_eq!(client.timed_out, 1);
        assert!(!client.dead);
    }

    engine.graph.lock().clients.get_mut(e).unwrap().awake_at = Some(1);
    assert!(engine::executor::run_cycle(&engine, &events, &inprocess, &mut adapter));
    {
        let graph = engine.graph.lock();
        let client = graph.clients.get(e).unwrap();
        assert_eq!(client.timed_out, 2);
        assert_eq!(client.error_count, 1);
        assert!(client.dead);
        assert!(!client.active);
    }
}
