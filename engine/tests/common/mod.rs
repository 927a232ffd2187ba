//! Shared scaffolding for the end-to-end scenario tests. Everything here
//! drives the engine the way the connection server and the cycle thread
//! would, minus the actual Unix sockets: clients are registered straight
//! into the registry and requests go through `engine::request::handle_request`
//! directly.

use std::sync::Arc;

use engine::client::{ClientId, ClientKind};
use engine::config::EngineConfig;
use engine::driver::null::NullDriver;
use engine::driver::DriverAdapter;
use engine::engine::Engine;
use engine::event::EventPlane;
use engine::inprocess::InProcessTable;
use engine::request::{handle_request, Handled};
use engine_proto::{BufferSizePolicy, PortFlags, PortId, PortTypeId, Request};

pub fn test_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.sample_rate = 48_000;
    cfg.period_frames = 256;
    cfg.port_max = 16;
    cfg
}

pub fn new_engine(cfg: &EngineConfig) -> Arc<Engine> {
    let engine = Engine::new(cfg.clone());
    engine.buffers.register_type(
        "audio".to_string(),
        BufferSizePolicy::Scaled {
            scale_factor: 1,
            sample_size: 4,
        },
        false,
        cfg.port_max,
        cfg.period_frames,
    );
    engine
}

pub fn new_adapter(cfg: &EngineConfig) -> DriverAdapter<NullDriver> {
    let driver = NullDriver::new(cfg.period_frames, cfg.sample_rate);
    DriverAdapter::new(driver, cfg).expect("null driver attach never fails")
}

/// Registers a client straight into the registry, bypassing the
/// handshake socket. Returns the full generational id; `.slot` is the
/// wire-facing `client_id` every `Request` variant addresses clients by.
pub fn register_client(engine: &Engine, name: &str, kind: ClientKind) -> ClientId {
    let mut graph = engine.graph.lock();
    graph.clients.register(name.to_string(), kind).unwrap()
}

pub fn register_port(engine: &Engine, events: &EventPlane, client_slot: u32, name: &str, flags: PortFlags) -> PortId {
    let req = Request::RegisterPort {
        client_id: client_slot,
        name: name.to_string(),
        type_id: PortTypeId::AUDIO,
        flags,
    };
    match handle_request(engine, events, req) {
        Handled::Reply(r) => assert_eq!(r.status, 0, "register_port({name}) failed"),
        _ => panic!("unexpected reply kind for RegisterPort"),
    }
    engine.ports.lock().find_by_name(name).expect("port not found after registration")
}

pub fn connect(engine: &Engine, events: &EventPlane, source: PortId, destination: PortId) -> i32 {
    match handle_request(engine, events, Request::ConnectPorts { source, destination }) {
        Handled::Reply(r) => r.status,
        _ => panic!("unexpected reply kind for ConnectPorts"),
    }
}

pub fn disconnect(engine: &Engine, events: &EventPlane, source: PortId, destination: PortId) -> i32 {
    match handle_request(engine, events, Request::DisconnectPort { source, destination }) {
        Handled::Reply(r) => r.status,
        _ => panic!("unexpected reply kind for DisconnectPort"),
    }
}

pub fn activate(engine: &Engine, events: &EventPlane, client_slot: u32) {
    match handle_request(engine, events, Request::ActivateClient { client_id: client_slot }) {
        Handled::Reply(r) => assert_eq!(r.status, 0, "activate({client_slot}) failed"),
        _ => panic!("unexpected reply kind for ActivateClient"),
    }
}
