//! Request Plane: `request_lock`-serialized handling of every graph
//! mutation. Each handler takes the graph lock (and port lock, as
//! needed) itself; `request_lock` only serializes the handlers against
//! each other, so two requests can never interleave their view of the
//! graph.

use engine_proto::{BufferSizePolicy, PortFlags, PortId, Reply, Request};
use tracing::debug;

use crate::client::ClientKind as InternalClientKind;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::event::EventPlane;

/// A port's full set of connections, written directly to the requester's
/// reply channel for `GetPortConnections` instead of the generic `Reply`.
pub struct ConnectionsPayload {
    pub port: PortId,
    pub connected: Vec<PortId>,
}

pub enum Handled {
    Reply(Reply),
    Connections(ConnectionsPayload),
}

/// Serialize and dispatch one request. Mirrors spec.md §4.5's list of
/// request kinds one-to-one.
pub fn handle_request(engine: &Engine, events: &EventPlane, req: Request) -> Handled {
    let _serialize = engine.request_lock.lock();
    let result = dispatch(engine, events, &req);
    match result {
        Ok(Handled::Reply(r)) => Handled::Reply(r),
        Ok(other) => other,
        Err(e) => {
            debug!(status = e.status(), ?req, "request failed");
            Handled::Reply(Reply::err(e.status()))
        }
    }
}

fn dispatch(engine: &Engine, events: &EventPlane, req: &Request) -> Result<Handled> {
    match req {
        Request::RegisterPort {
            client_id,
            name,
            type_id,
            flags,
        } => register_port(engine, events, *client_id, name.clone(), *type_id, *flags),
        Request::UnRegisterPort { client_id, port_id } => {
            unregister_port(engine, events, *client_id, *port_id)
        }
        Request::ConnectPorts { source, destination } => {
            connect_ports(engine, events, *source, *destination)
        }
        Request::DisconnectPort { source, destination } => {
            disconnect_port(engine, events, *source, *destination)
        }
        Request::DisconnectPorts { port_id } => disconnect_all(engine, events, *port_id),
        Request::ActivateClient { client_id } => activate_client(engine, events, *client_id),
        Request::DeactivateClient { client_id } => deactivate_client(engine, events, *client_id),
        Request::SetTimeBaseClient { client_id } => set_timebase(engine, *client_id),
        Request::SetClientCapabilities { client_id, realtime } => {
            set_capabilities(engine, *client_id, *realtime)
        }
        Request::GetPortConnections { port_id } => get_port_connections(engine, *port_id),
        Request::GetPortNConnections { port_id } => get_port_n_connections(engine, *port_id),
        Request::RegisterPortType {
            name,
            policy,
            has_mixdown,
        } => register_port_type(engine, name.clone(), *policy, *has_mixdown),
    }
}

fn register_port_type(
    engine: &Engine,
    name: String,
    policy: BufferSizePolicy,
    has_mixdown: bool,
) -> Result<Handled> {
    // NewPortType broadcast is the caller's responsibility (server setup
    // and buffer-size-change both have the shm name/size already in
    // hand); this just allocates the pool.
    engine.buffers.register_type(
        name,
        policy,
        has_mixdown,
        engine.config.port_max,
        engine.config.period_frames,
    );
    Ok(Handled::Reply(Reply::ok()))
}

fn register_port(
    engine: &Engine,
    events: &EventPlane,
    client_id: u32,
    name: String,
    type_id: engine_proto::PortTypeId,
    flags: PortFlags,
) -> Result<Handled> {
    let buffers = engine.buffers.get(type_id).ok_or(EngineError::UnknownPortType)?;
    let mut graph = engine.graph.lock();
    let mut ports = engine.ports.lock();

    let owner = graph
        .clients
        .iter()
        .find(|c| c.id.slot == client_id)
        .map(|c| c.id)
        .ok_or(EngineError::ClientNotFound)?;

    let port_id = ports.register(type_id, client_id, name, flags)?;

    if flags.contains(PortFlags::OUTPUT) {
        match buffers.allocate() {
            Ok(handle) => {
                ports.internal_mut(port_id)?.buffer = Some(handle);
                ports.get_mut(port_id)?.buffer_offset = handle.offset;
            }
            Err(e) => {
                ports.unregister(client_id, port_id)?;
                return Err(e);
            }
        }
    }

    if let Some(c) = graph.clients.get_mut(owner) {
        c.ports.push(port_id);
    }

    crate::graph::resort(&mut graph, &mut ports, &engine.buffers, events);
    events.deliver(&mut graph.clients, owner, engine_proto::Event::PortRegistered { port: port_id });

    Ok(Handled::Reply(Reply::ok()))
}

fn unregister_port(
    engine: &Engine,
    events: &EventPlane,
    client_id: u32,
    port_id: PortId,
) -> Result<Handled> {
    let mut graph = engine.graph.lock();
    let mut ports = engine.ports.lock();

    for conn in graph.connections.remove_all_touching(port_id) {
        let _ = conn;
    }
    let internal = ports.unregister(client_id, port_id)?;
    if let Some(handle) = internal.buffer {
        if let Some(pool) = engine.buffers.get(handle.type_id) {
            pool.release(handle);
        }
    }
    if let Some(owner) = graph.clients.iter().find(|c| c.id.slot == client_id).map(|c| c.id) {
        if let Some(c) = graph.clients.get_mut(owner) {
            c.ports.retain(|&p| p != port_id);
        }
        events.deliver(&mut graph.clients, owner, engine_proto::Event::PortUnregistered { port: port_id });
    }

    crate::graph::resort(&mut graph, &mut ports, &engine.buffers, events);
    Ok(Handled::Reply(Reply::ok()))
}

fn connect_ports(
    engine: &Engine,
    events: &EventPlane,
    source: PortId,
    destination: PortId,
) -> Result<Handled> {
    let mut graph = engine.graph.lock();
    let mut ports = engine.ports.lock();

    let src = ports.get(source)?.clone();
    let dst = ports.get(destination)?.clone();

    if !src.flags.contains(PortFlags::OUTPUT) {
        return Err(EngineError::PortNotOutput);
    }
    if !dst.flags.contains(PortFlags::INPUT) {
        return Err(EngineError::PortNotInput);
    }
    if src.locked || dst.locked {
        return Err(EngineError::PortLocked);
    }
    if src.type_id != dst.type_id {
        return Err(EngineError::PortTypeMismatch);
    }
    let src_owner_active = graph
        .clients
        .iter()
        .any(|c| c.id.slot == src.owner_client_id && c.active && !c.dead);
    let dst_owner_active = graph
        .clients
        .iter()
        .any(|c| c.id.slot == dst.owner_client_id && c.active && !c.dead);
    if !src_owner_active || !dst_owner_active {
        return Err(EngineError::ClientNotActive);
    }
    let existing = graph.connections.count_for_port(destination);
    if existing > 0 {
        let has_mixdown = engine.buffers.get(dst.type_id).map(|t| t.has_mixdown).unwrap_or(false);
        if !has_mixdown {
            return Err(EngineError::DuplicateConnection);
        }
    }

    graph.connections.add(source, destination);
    crate::graph::resort(&mut graph, &mut ports, &engine.buffers, events);

    let dst_owner = graph
        .clients
        .iter()
        .find(|c| c.id.slot == dst.owner_client_id)
        .map(|c| c.id);
    let src_owner = graph
        .clients
        .iter()
        .find(|c| c.id.slot == src.owner_client_id)
        .map(|c| c.id);
    let ev = engine_proto::Event::PortConnected { source, destination };
    if let Some(id) = src_owner {
        events.deliver(&mut graph.clients, id, ev.clone());
    }
    if let Some(id) = dst_owner {
        if Some(id) != src_owner {
            events.deliver(&mut graph.clients, id, ev);
        }
    }

    Ok(Handled::Reply(Reply::ok()))
}

fn disconnect_port(
    engine: &Engine,
    events: &EventPlane,
    source: PortId,
    destination: PortId,
) -> Result<Handled> {
    let mut graph = engine.graph.lock();
    let mut ports = engine.ports.lock();
    if !graph.connections.remove(source, destination) {
        return Err(EngineError::PortDoesNotExist);
    }
    crate::graph::resort(&mut graph, &mut ports, &engine.buffers, events);
    let ev = engine_proto::Event::PortDisconnected { source, destination };
    let owners: Vec<_> = [source, destination]
        .iter()
        .filter_map(|p| ports.get(*p).ok())
        .map(|p| p.owner_client_id)
        .collect();
    for owner_slot in owners {
        if let Some(id) = graph.clients.iter().find(|c| c.id.slot == owner_slot).map(|c| c.id) {
            events.deliver(&mut graph.clients, id, ev.clone());
        }
    }
    Ok(Handled::Reply(Reply::ok()))
}

fn disconnect_all(engine: &Engine, events: &EventPlane, port_id: PortId) -> Result<Handled> {
    let mut graph = engine.graph.lock();
    let mut ports = engine.ports.lock();
    let removed = graph.connections.remove_all_touching(port_id);
    crate::graph::resort(&mut graph, &mut ports, &engine.buffers, events);
    for conn in removed {
        let ev = engine_proto::Event::PortDisconnected {
            source: conn.source,
            destination: conn.destination,
        };
        for p in [conn.source, conn.destination] {
            if let Ok(port) = ports.get(p) {
                if let Some(id) = graph
                    .clients
                    .iter()
                    .find(|c| c.id.slot == port.owner_client_id)
                    .map(|c| c.id)
                {
                    events.deliver(&mut graph.clients, id, ev.clone());
                }
            }
        }
    }
    Ok(Handled::Reply(Reply::ok()))
}

fn activate_client(engine: &Engine, events: &EventPlane, client_id: u32) -> Result<Handled> {
    let mut graph = engine.graph.lock();
    let mut ports = engine.ports.lock();
    let id = graph
        .clients
        .iter()
        .find(|c| c.id.slot == client_id)
        .map(|c| c.id)
        .ok_or(EngineError::ClientNotFound)?;
    let is_external = graph.clients.get(id).map(|c| c.kind) == Some(InternalClientKind::External);
    if is_external {
        graph.clients.bump_external_count();
    }
    if let Some(c) = graph.clients.get_mut(id) {
        c.active = true;
    }
    crate::graph::resort(&mut graph, &mut ports, &engine.buffers, events);
    Ok(Handled::Reply(Reply::ok()))
}

fn deactivate_client(engine: &Engine, events: &EventPlane, client_id: u32) -> Result<Handled> {
    let mut graph = engine.graph.lock();
    let mut ports = engine.ports.lock();
    let id = graph
        .clients
        .iter()
        .find(|c| c.id.slot == client_id)
        .map(|c| c.id)
        .ok_or(EngineError::ClientNotFound)?;

    let owned_ports = graph.clients.get(id).map(|c| c.ports.clone()).unwrap_or_default();
    for p in owned_ports {
        graph.connections.remove_all_touching(p);
    }
    let is_external = graph.clients.get(id).map(|c| c.kind) == Some(InternalClientKind::External);
    if is_external {
        graph.clients.decrement_external_count();
    }
    if let Some(c) = graph.clients.get_mut(id) {
        c.active = false;
        c.subgraph_start_fd = None;
        c.subgraph_wait_fd = None;
    }
    crate::graph::resort(&mut graph, &mut ports, &engine.buffers, events);
    Ok(Handled::Reply(Reply::ok()))
}

fn set_timebase(engine: &Engine, client_id: u32) -> Result<Handled> {
    let mut graph = engine.graph.lock();
    let id = graph
        .clients
        .iter()
        .find(|c| c.id.slot == client_id)
        .map(|c| c.id)
        .ok_or(EngineError::ClientNotFound)?;
    graph.clients.set_timebase(id);
    Ok(Handled::Reply(Reply::ok()))
}

fn set_capabilities(engine: &Engine, client_id: u32, _realtime: bool) -> Result<Handled> {
    let graph = engine.graph.lock();
    graph
        .clients
        .iter()
        .find(|c| c.id.slot == client_id)
        .ok_or(EngineError::ClientNotFound)?;
    Ok(Handled::Reply(Reply::ok()))
}

fn get_port_connections(engine: &Engine, port_id: PortId) -> Result<Handled> {
    let graph = engine.graph.lock();
    let ports = engine.ports.lock();
    ports.get(port_id)?;
    let connected: Vec<PortId> = graph
        .connections
        .for_source(port_id)
        .into_iter()
        .map(|c| c.destination)
        .chain(graph.connections.for_destination(port_id).into_iter().map(|c| c.source))
        .collect();
    Ok(Handled::Connections(ConnectionsPayload { port: port_id, connected }))
}

fn get_port_n_connections(engine: &Engine, port_id: PortId) -> Result<Handled> {
    let graph = engine.graph.lock();
    let ports = engine.ports.lock();
    ports.get(port_id)?;
    let n = graph.connections.count_for_port(port_id);
    Ok(Handled::Reply(Reply::ok_with_count(n as i32)))
}
