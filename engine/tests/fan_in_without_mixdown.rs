//! End-to-end scenario 2: connecting a second source into an input whose
//! port type has no mixdown must be rejected.

mod common;

use engine::client::ClientKind;
use engine::event::EventPlane;
use engine_proto::PortFlags;

#[test]
fn second_connection_without_mixdown_is_rejected() {
    let cfg = common::test_config();
    let engine = common::new_engine(&cfg);
    let events = EventPlane::new();

    let a = common::register_client(&engine, "a", ClientKind::InProcess);
    let b = common::register_client(&engine, "b", ClientKind::InProcess);
    let c = common::register_client(&engine, "c", ClientKind::InProcess);

    let a_out = common::register_port(&engine, &events, a.slot, "a:out", PortFlags::OUTPUT);
    let b_out = common::register_port(&engine, &events, b.slot, "b:out", PortFlags::OUTPUT);
    let c_in = common::register_port(&engine, &events, c.slot, "c:in", PortFlags::INPUT);

    common::activate(&engine, &events, a.slot);
    common::activate(&engine, &events, b.slot);
    common::activate(&engine, &events, c.slot);

    assert_eq!(common::connect(&engine, &events, a_out, c_in), 0);

    let status = common::connect(&engine, &events, b_out, c_in);
    assert_eq!(status, engine_proto::RequestErrorKind::DuplicateConnection.status());

    let graph = engine.graph.lock();
    assert_eq!(graph.connections.count_for_port(c_in), 1);
}
