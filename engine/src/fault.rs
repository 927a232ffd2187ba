//! Fault-state transitions shared by the Cycle Executor's post-process
//! step and the Watchdog thread: `error < ERROR_WITH_SOCKETS` zombifies a
//! client, `error >= ERROR_WITH_SOCKETS` removes it outright.

use tracing::{info, warn};

use crate::client::ClientId;
use crate::engine::{Engine, GraphInner, ERROR_WITH_SOCKETS};
use crate::port::PortTable;

/// Disconnect every port of `id`, deactivate it, drop timebase role if
/// held, and mark it dead. Bookkeeping (ports, fds) is left in place for
/// the server thread to clean up.
pub fn zombify(graph: &mut GraphInner, ports: &mut PortTable, id: ClientId) {
    let Some(client) = graph.clients.get(id) else {
        return;
    };
    let owned_ports = client.ports.clone();
    for port_id in owned_ports {
        for conn in graph.connections.remove_all_touching(port_id) {
            let _ = conn;
        }
    }
    graph.clients.clear_timebase_if(id);
    if let Some(c) = graph.clients.get_mut(id) {
        c.dead = true;
        c.active = false;
    }
    warn!(?id, "client zombified");
}

/// Remove a zombified client entirely once its socket has also failed:
/// release its ports (and their buffer assignments) and drop it from the
/// registry.
pub fn remove(engine: &Engine, graph: &mut GraphInner, ports: &mut PortTable, id: ClientId) {
    let removed_ports = ports.unregister_all_owned_by(id.slot);
    for (_port_id, internal) in removed_ports {
        if let Some(handle) = internal.buffer {
            if let Some(pool) = engine.buffers.get(handle.type_id) {
                pool.release(handle);
            }
        }
    }
    graph.clients.remove(id);
    info!(?id, "client removed");
}

/// Post-process fault handling for one cycle: bump `timed_out`, escalate
/// to `error_count`, and zombify/remove based on the threshold.
pub fn handle_post_process_fault(
    engine: &Engine,
    graph: &mut GraphInner,
    ports: &mut PortTable,
    id: ClientId,
) {
    let should_remove;
    {
        let Some(client) = graph.clients.get_mut(id) else {
            return;
        };
        client.error_count += 1;
        should_remove = client.error_count >= ERROR_WITH_SOCKETS;
    }
    if !graph.clients.get(id).map(|c| c.dead).unwrap_or(true) {
        zombify(graph, ports, id);
    }
    if should_remove {
        remove(engine, graph, ports, id);
    }
}
