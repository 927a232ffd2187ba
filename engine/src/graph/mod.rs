//! Graph Builder/Sorter: maintains reverse reachability (`fed_by`),
//! topologically sorts clients, partitions them into external subgraphs
//! separated by in-process clients, and recomputes per-port total latency.

mod chain;
mod latency;
mod sort;

pub use chain::FifoTable;

use engine_proto::{PortFlags, PortId};
use tracing::debug;

use crate::buffer::BufferPool;
use crate::engine::GraphInner;
use crate::event::EventPlane;
use crate::port::PortTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub source: PortId,
    pub destination: PortId,
}

#[derive(Default)]
pub struct ConnectionTable {
    connections: Vec<Connection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, source: PortId, destination: PortId) {
        self.connections.push(Connection { source, destination });
    }

    pub fn remove(&mut self, source: PortId, destination: PortId) -> bool {
        let before = self.connections.len();
        self.connections
            .retain(|c| !(c.source == source && c.destination == destination));
        self.connections.len() != before
    }

    /// Remove every connection touching `port`, returning the removed
    /// connections (used by disconnect-all and by client/port removal).
    pub fn remove_all_touching(&mut self, port: PortId) -> Vec<Connection> {
        let mut removed = Vec::new();
        self.connections.retain(|c| {
            let touches = c.source == port || c.destination == port;
            if touches {
                removed.push(*c);
            }
            !touches
        });
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn for_destination(&self, dst: PortId) -> Vec<Connection> {
        self.connections
            .iter()
            .filter(|c| c.destination == dst)
            .copied()
            .collect()
    }

    pub fn for_source(&self, src: PortId) -> Vec<Connection> {
        self.connections
            .iter()
            .filter(|c| c.source == src)
            .copied()
            .collect()
    }

    pub fn count_for_port(&self, port: PortId) -> usize {
        self.connections
            .iter()
            .filter(|c| c.source == port || c.destination == port)
            .count()
    }
}

/// Recompute `fed_by`, resort, rechain, and recompute latency, in that
/// order. Called after every structural mutation (port register/
/// unregister, connect/disconnect, activate/deactivate). Leaves the new
/// order in `graph.order` for the cycle executor to walk, and delivers
/// `GraphReordered` (carrying each client's new `execution_order`) to
/// every active client, per spec.md §4.3's final step.
pub fn resort(graph: &mut GraphInner, ports: &mut PortTable, buffers: &BufferPool, events: &EventPlane) {
    let driver_id = graph
        .clients
        .iter()
        .find(|c| matches!(c.kind, crate::client::ClientKind::Driver))
        .map(|c| c.id);
    sort::recompute_fed_by(&mut graph.clients, ports, &graph.connections);
    let sorted = sort::topo_sort(&graph.clients, driver_id);
    chain::rechain(&sorted, &mut graph.clients, &mut graph.fifos);
    latency::recompute_latency(ports, &graph.connections);
    resolve_input_buffers(ports, &graph.connections, buffers);
    debug!(n_clients = sorted.len(), "graph resorted");
    graph.order = sorted;
    events.broadcast_reordered(&mut graph.clients);
}

/// §4.10: assign every in-use input port its effective read buffer. An
/// unconnected input reads the type's shared silent buffer (when one is
/// reserved); a singly-connected input reads its source's offset
/// directly; a multiply-connected input (mixdown types only) gets a
/// private slot the owning client populates via the mixdown callback.
/// Called after every structural mutation (`resort`) and after a buffer
/// resize (`Engine::change_buffer_size`), since both invalidate prior
/// offsets.
pub fn resolve_input_buffers(ports: &mut PortTable, connections: &ConnectionTable, buffers: &BufferPool) {
    let inputs: Vec<PortId> = ports
        .iter_in_use()
        .filter(|p| p.flags.contains(PortFlags::INPUT))
        .map(|p| p.id)
        .collect();

    for id in inputs {
        let conns = connections.for_destination(id);
        let type_id = match ports.get(id) {
            Ok(p) => p.type_id,
            Err(_) => continue,
        };
        match conns.len() {
            0 => {
                if let Some(pool) = buffers.get(type_id) {
                    if let Some(offset) = *pool.silent_buffer.lock() {
                        if let Ok(port) = ports.get_mut(id) {
                            port.buffer_offset = offset;
                        }
                    }
                }
            }
            1 => {
                let Ok(src_offset) = ports.get(conns[0].source).map(|p| p.buffer_offset) else {
                    continue;
                };
                if let Ok(port) = ports.get_mut(id) {
                    port.buffer_offset = src_offset;
                }
            }
            _ => {
                let already = ports.internal(id).ok().and_then(|i| i.buffer);
                let handle = match already {
                    Some(h) => Some(h),
                    None => buffers.get(type_id).and_then(|pool| pool.allocate().ok()),
                };
                if let Some(handle) = handle {
                    if let Ok(internal) = ports.internal_mut(id) {
                        internal.buffer = Some(handle);
                    }
                    if let Ok(port) = ports.get_mut(id) {
                        port.buffer_offset = handle.offset;
                    }
                }
            }
        }
    }
}
