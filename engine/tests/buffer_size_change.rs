//! End-to-end scenario 6: growing the buffer size resizes every port
//! type's segment, re-reserves the audio type's silent buffer, and
//! notifies every active client with one `BufferSizeChange` and one
//! `NewPortType` per type.

mod common;

use engine::client::ClientKind;
use engine::event::EventPlane;
use engine_proto::{Event, PortTypeId};

#[test]
fn growing_the_period_resizes_segments_and_notifies_clients() {
    let cfg = common::test_config();
    let engine = common::new_engine(&cfg);
    let events = EventPlane::new();

    let listener = common::register_client(&engine, "listener", ClientKind::InProcess);
    common::activate(&engine, &events, listener.slot);
    let (tx, rx) = crossbeam_channel::unbounded();
    events.register_in_process(listener, tx);

    let audio = engine.buffers.get(PortTypeId::AUDIO).unwrap();
    let old_size = audio.segment_size();
    assert_eq!(old_size, 16 * 256 * 4);

    engine.change_buffer_size(&events, 512);

    let new_size = audio.segment_size();
    assert_eq!(new_size, 16 * 512 * 4);
    assert_eq!(*audio.silent_buffer.lock(), Some(0));

    match rx.try_recv().expect("expected a BufferSizeChange event") {
        Event::BufferSizeChange { nframes } => assert_eq!(nframes, 512),
        other => panic!("unexpected first event: {other:?}"),
    }
    match rx.try_recv().expect("expected a NewPortType event") {
        Event::NewPortType { type_id, size, .. } => {
            assert_eq!(type_id, PortTypeId::AUDIO);
            assert_eq!(size, new_size);
        }
        other => panic!("unexpected second event: {other:?}"),
    }
    assert!(rx.try_recv().is_err(), "no more than one NewPortType per registered type");
}
