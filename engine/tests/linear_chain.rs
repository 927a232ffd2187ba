//! End-to-end scenario 1: a linear chain X -> Y -> Z of in-process
//! clients, each with one input and one output of type `audio`.

mod common;

use std::sync::{Arc, Mutex};

use engine::client::{ClientId, ClientKind, ClientState};
use engine::event::EventPlane;
use engine::inprocess::{InProcessClient, InProcessTable};
use engine_proto::PortFlags;

struct Recorder {
    id: ClientId,
    order: Arc<Mutex<Vec<ClientId>>>,
}

impl InProcessClient for Recorder {
    fn process(&mut self, _nframes: u32) -> bool {
        self.order.lock().unwrap().push(self.id);
        true
    }
}

#[test]
fn linear_chain_runs_in_feed_order_and_finishes_all_three() {
    let cfg = common::test_config();
    let engine = common::new_engine(&cfg);
    let events = EventPlane::new();
    let inprocess = InProcessTable::new();

    let x = common::register_client(&engine, "x", ClientKind::InProcess);
    let y = common::register_client(&engine, "y", ClientKind::InProcess);
    let z = common::register_client(&engine, "z", ClientKind::InProcess);

    let x_out = common::register_port(&engine, &events, x.slot, "x:out", PortFlags::OUTPUT);
    let y_in = common::register_port(&engine, &events, y.slot, "y:in", PortFlags::INPUT);
    let y_out = common::register_port(&engine, &events, y.slot, "y:out", PortFlags::OUTPUT);
    let z_in = common::register_port(&engine, &events, z.slot, "z:in", PortFlags::INPUT);

    assert_eq!(common::connect(&engine, &events, x_out, y_in), 0);
    assert_eq!(common::connect(&engine, &events, y_out, z_in), 0);

    common::activate(&engine, &events, x.slot);
    common::activate(&engine, &events, y.slot);
    common::activate(&engine, &events, z.slot);

    let order = Arc::new(Mutex::new(Vec::new()));
    for id in [x, y, z] {
        inprocess.install(
            id,
            Box::new(Recorder {
                id,
                order: order.clone(),
            }),
        );
    }

    let mut adapter = common::new_adapter(&cfg);
    assert!(engine::executor::run_cycle(&engine, &events, &inprocess, &mut adapter));

    assert_eq!(*order.lock().unwrap(), vec![x, y, z]);

    let graph = engine.graph.lock();
    for id in [x, y, z] {
        assert_eq!(graph.clients.get(id).unwrap().state, ClientState::Finished);
    }
    drop(graph);

    assert_eq!(common::disconnect(&engine, &events, y_out, z_in), 0);
    let graph = engine.graph.lock();
    assert!(!graph.clients.get(z).unwrap().fed_by.contains(&y));
    assert!(!graph.clients.get(z).unwrap().fed_by.contains(&x));
    drop(graph);

    // z:in lost its only connection; it now reads the shared silent buffer.
    let ports = engine.ports.lock();
    let audio = engine.buffers.get(engine_proto::PortTypeId::AUDIO).unwrap();
    let silent = (*audio.silent_buffer.lock()).expect("audio type reserves a silent buffer");
    assert_eq!(ports.get(z_in).unwrap().buffer_offset, silent);
}
