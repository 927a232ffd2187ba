//! End-to-end scenario 3: a feedback loop between the driver client and
//! an in-process client. The sort must break the cycle by placing the
//! driver first, and `fed_by` must show the mutual relationship without
//! recursing forever.

mod common;

use engine::client::ClientKind;
use engine::event::EventPlane;
use engine_proto::PortFlags;

#[test]
fn feedback_loop_places_driver_before_client_it_feeds() {
    let cfg = common::test_config();
    let engine = common::new_engine(&cfg);
    let events = EventPlane::new();

    let d = common::register_client(&engine, "driver", ClientKind::Driver);
    let e = common::register_client(&engine, "e", ClientKind::InProcess);

    let d_out = common::register_port(&engine, &events, d.slot, "d:out", PortFlags::OUTPUT);
    let e_in = common::register_port(&engine, &events, e.slot, "e:in", PortFlags::INPUT);
    let e_out = common::register_port(&engine, &events, e.slot, "e:out", PortFlags::OUTPUT);
    let d_in = common::register_port(&engine, &events, d.slot, "d:in", PortFlags::INPUT);

    common::activate(&engine, &events, d.slot);
    common::activate(&engine, &events, e.slot);

    assert_eq!(common::connect(&engine, &events, d_out, e_in), 0);
    assert_eq!(common::connect(&engine, &events, e_out, d_in), 0);

    let graph = engine.graph.lock();
    assert!(graph.clients.get(d).unwrap().fed_by.contains(&e));
    assert!(graph.clients.get(e).unwrap().fed_by.contains(&d));
    assert_eq!(graph.order, vec![d, e]);
}
