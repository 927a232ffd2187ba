//! Event Plane: reliable delivery of engine-to-client notifications.
//! In-process clients receive a direct function call; external clients
//! get a write to `event_fd` followed by a read-back status byte. Any
//! failure (write, read, or non-zero status) increments the client's
//! error counter.

use std::os::fd::{AsFd, BorrowedFd, RawFd};

use crossbeam_channel::Sender;
use engine_proto::Event;
use tracing::warn;

use crate::client::{ClientId, ClientKind, ClientRegistry};

/// Sink an in-process client registers to receive events as plain values
/// instead of over a socket.
pub type InProcessSink = Sender<Event>;

#[derive(Default)]
pub struct EventPlane {
    in_process_sinks: parking_lot::Mutex<std::collections::HashMap<ClientId, InProcessSink>>,
}

impl EventPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_in_process(&self, id: ClientId, sink: InProcessSink) {
        self.in_process_sinks.lock().insert(id, sink);
    }

    pub fn unregister(&self, id: ClientId) {
        self.in_process_sinks.lock().remove(&id);
    }

    /// Deliver one event to one client. Returns `false` (and bumps the
    /// caller's error count) on any delivery failure.
    pub fn deliver(&self, clients: &mut ClientRegistry, id: ClientId, event: Event) -> bool {
        let kind = match clients.get(id) {
            Some(c) if c.active && !c.dead => c.kind,
            _ => return true,
        };
        let ok = match kind {
            ClientKind::InProcess | ClientKind::Driver => {
                let sinks = self.in_process_sinks.lock();
                match sinks.get(&id) {
                    Some(sink) => sink.send(event).is_ok(),
                    None => true,
                }
            }
            ClientKind::External => {
                let fd = clients.get(id).and_then(|c| c.event_fd);
                match fd {
                    Some(fd) => deliver_over_fd(fd, &event),
                    None => true,
                }
            }
        };
        if !ok {
            warn!(?id, "event delivery failed");
            if let Some(c) = clients.get_mut(id) {
                c.error_count += 1;
            }
        }
        ok
    }

    /// Deliver one event to every active, non-dead client.
    pub fn broadcast(&self, clients: &mut ClientRegistry, event: Event) {
        let ids: Vec<ClientId> = clients
            .iter()
            .filter(|c| c.active && !c.dead)
            .map(|c| c.id)
            .collect();
        for id in ids {
            self.deliver(clients, id, event.clone());
        }
    }

    /// `GraphReordered` carries each client's own new execution order, so
    /// it is delivered per-client rather than via `broadcast`.
    pub fn broadcast_reordered(&self, clients: &mut ClientRegistry) {
        let entries: Vec<(ClientId, u32)> = clients
            .iter()
            .filter(|c| c.active && !c.dead)
            .map(|c| (c.id, c.execution_order))
            .collect();
        for (id, order) in entries {
            self.deliver(clients, id, Event::GraphReordered { execution_order: order });
        }
    }
}

/// Write the event record then block for the single status-byte
/// handshake, operating on the borrowed fd directly so the client
/// registry keeps ownership of it.
fn deliver_over_fd(fd: RawFd, event: &Event) -> bool {
    let borrowed: BorrowedFd = unsafe { BorrowedFd::borrow_raw(fd) };
    let payload = match serde_json::to_vec(event) {
        Ok(p) => p,
        Err(_) => return false,
    };
    let len = (payload.len() as u32).to_le_bytes();
    if write_all(borrowed.as_fd(), &len).is_err() || write_all(borrowed.as_fd(), &payload).is_err() {
        return false;
    }
    let mut status = [0u8; 1];
    match nix::unistd::read(fd, &mut status) {
        Ok(1) => status[0] == 0,
        _ => false,
    }
}

fn write_all(fd: BorrowedFd, mut buf: &[u8]) -> nix::Result<()> {
    while !buf.is_empty() {
        let n = nix::unistd::write(fd, buf)?;
        if n == 0 {
            return Err(nix::errno::Errno::EIO);
        }
        buf = &buf[n..];
    }
    Ok(())
}
