//! Wires every component together. `Engine` is the shared handle passed to
//! the cycle thread, the server thread, and the watchdog thread.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::buffer::BufferPool;
use crate::client::ClientRegistry;
use crate::config::EngineConfig;
use crate::event::EventPlane;
use crate::graph::{ConnectionTable, FifoTable};
use crate::port::PortTable;
use crate::time::FrameClock;
use crate::transport::TransportPosition;

/// Everything protected by the "graph lock": the client list, per-client
/// `fed_by`/ports, and all connection mutations.
pub struct GraphInner {
    pub clients: ClientRegistry,
    pub connections: ConnectionTable,
    pub fifos: FifoTable,
    /// The last computed topological order. The cycle executor walks
    /// this directly rather than re-sorting on the realtime thread.
    pub order: Vec<crate::client::ClientId>,
}

pub const ERROR_WITH_SOCKETS: u32 = 4;

pub struct Engine {
    pub config: EngineConfig,
    /// Serializes request handling. Never held during blocking I/O beyond
    /// a handler's own.
    pub request_lock: Mutex<()>,
    /// The graph lock: acquired with `try_lock` by the cycle thread,
    /// blocking `lock` by the request and server threads.
    pub graph: Mutex<GraphInner>,
    /// Protects only the port table's allocation bitmap and fields.
    pub ports: Mutex<PortTable>,
    pub buffers: BufferPool,
    pub clock: FrameClock,
    pub current_time: Mutex<TransportPosition>,
    pub pending_time: Mutex<TransportPosition>,
    pub watchdog_check: AtomicBool,
    pub consecutive_delay: AtomicU32,
    pub restart_count: AtomicU32,
    /// Exponential rolling average of processing time as a fraction of
    /// one period, recomputed every cycle in post-process.
    pub cpu_load: Mutex<f64>,
    /// pid of the external client currently signalled, or 0 if none. The
    /// watchdog reads this to know which process group to kill first if
    /// the cycle thread is stalled inside a subgraph wait.
    pub current_client_pid: AtomicI32,
    /// Wall-clock origin used to convert frame advances into `usecs` for
    /// the frame clock and transport position; never read back as a
    /// duration across process restarts.
    pub epoch: Instant,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let clock = FrameClock::new(config.sample_rate);
        let ports = PortTable::new(config.port_max);
        let graph = GraphInner {
            clients: ClientRegistry::new(),
            connections: ConnectionTable::new(),
            fifos: FifoTable::new(),
            order: Vec::new(),
        };
        Arc::new(Engine {
            config,
            request_lock: Mutex::new(()),
            graph: Mutex::new(graph),
            ports: Mutex::new(ports),
            buffers: BufferPool::new(),
            clock,
            current_time: Mutex::new(TransportPosition::default()),
            pending_time: Mutex::new(TransportPosition::default()),
            watchdog_check: AtomicBool::new(false),
            consecutive_delay: AtomicU32::new(0),
            restart_count: AtomicU32::new(0),
            cpu_load: Mutex::new(0.0),
            current_client_pid: AtomicI32::new(0),
            epoch: Instant::now(),
        })
    }

    /// Microseconds since the engine was constructed, used to timestamp
    /// frame-clock advances. Monotonic; never compared across restarts.
    pub fn elapsed_usecs(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Apply a live buffer-size change: resize every port type's shared
    /// segment to `new_period_frames`, re-resolve every input port's
    /// buffer reference against the resized segments, then broadcast one
    /// `BufferSizeChange` and one `NewPortType` per type to every active
    /// client. `config.period_frames` is left untouched — it is only
    /// ever consulted at startup to size the first registration of each
    /// port type, and dynamic port-type registration after startup is
    /// out of scope, so there is nothing downstream that needs it to
    /// track the live value.
    pub fn change_buffer_size(&self, events: &EventPlane, new_period_frames: u32) {
        let nports = self.ports.lock().capacity();
        self.buffers.resize_all(nports, new_period_frames);

        let mut graph = self.graph.lock();
        {
            let mut ports = self.ports.lock();
            crate::graph::resolve_input_buffers(&mut ports, &graph.connections, &self.buffers);
        }
        events.broadcast(
            &mut graph.clients,
            engine_proto::Event::BufferSizeChange {
                nframes: new_period_frames,
            },
        );
        for t in self.buffers.iter() {
            events.broadcast(
                &mut graph.clients,
                engine_proto::Event::NewPortType {
                    type_id: t.type_id,
                    shm_name: t.shm_name(),
                    size: t.segment_size(),
                },
            );
        }
    }
}
