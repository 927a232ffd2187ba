//! Connection Server: accepts client handshakes on two listening Unix
//! sockets, installs fds into a poll set, and dispatches subsequent
//! request-socket traffic into the Request Plane. Deliberately built on
//! `libc::poll` and blocking `std::os::unix::net` sockets rather than an
//! async runtime, matching the engine's avoidance of tokio on threads
//! whose latency bounds need to stay legible.

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use engine_proto::{ClientConnectRequest, ClientConnectResponse};
use engine_proto::{Event, Request};
use tracing::{debug, info, warn};

use crate::client::{ClientId, ClientKind};
use crate::engine::Engine;
use crate::event::EventPlane;
use crate::request::{handle_request, Handled};

const MAX_SERVER_INDEX: u32 = 999;

/// Remove stale rendezvous files from a previous run. Spec.md §6: no
/// state is persisted across restarts.
pub fn clean_server_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("jack-") || name.starts_with("jack_") {
            let _ = std::fs::remove_file(entry.path());
        }
    }
    Ok(())
}

struct ClientConn {
    id: ClientId,
    stream: UnixStream,
}

pub struct ConnectionServer {
    request_listener: UnixListener,
    ack_listener: UnixListener,
    server_dir: PathBuf,
    fifo_prefix: String,
    request_conns: Vec<ClientConn>,
    pending_ack: Vec<(RawFd, UnixStream)>,
}

impl ConnectionServer {
    /// Bind the two listening sockets at the lowest free index in
    /// `[0, 999)`.
    pub fn bind(server_dir: &Path) -> std::io::Result<Self> {
        for n in 0..MAX_SERVER_INDEX {
            let req_path = server_dir.join(format!("jack_{n}"));
            let ack_path = server_dir.join(format!("jack_ack_{n}"));
            if req_path.exists() || ack_path.exists() {
                continue;
            }
            if let Ok(request_listener) = UnixListener::bind(&req_path) {
                match UnixListener::bind(&ack_path) {
                    Ok(ack_listener) => {
                        info!(n, "connection server bound");
                        return Ok(ConnectionServer {
                            request_listener,
                            ack_listener,
                            server_dir: server_dir.to_path_buf(),
                            fifo_prefix: server_dir.join(format!("jack-ack-fifo-{}", std::process::id())).to_string_lossy().into_owned(),
                            request_conns: Vec::new(),
                            pending_ack: Vec::new(),
                        });
                    }
                    Err(e) => {
                        let _ = std::fs::remove_file(&req_path);
                        return Err(e);
                    }
                }
            }
        }
        Err(std::io::Error::new(std::io::ErrorKind::AddrInUse, "no free server index in [0, 999)"))
    }

    /// Poll every listener and connected request socket once, with a
    /// bounded wait, dispatching any ready I/O. Intended to be called in
    /// a loop from the server thread.
    pub fn poll_once(&mut self, engine: &Engine, events: &EventPlane, timeout_ms: i32) -> std::io::Result<()> {
        let mut pollfds: Vec<libc::pollfd> = Vec::with_capacity(2 + self.request_conns.len());
        pollfds.push(libc::pollfd {
            fd: self.request_listener.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        });
        pollfds.push(libc::pollfd {
            fd: self.ack_listener.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        });
        for conn in &self.request_conns {
            pollfds.push(libc::pollfd {
                fd: conn.stream.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
        }

        let n = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
        if n < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if n == 0 {
            return Ok(());
        }

        if pollfds[0].revents & libc::POLLIN != 0 {
            self.accept_request_connection(engine, events)?;
        }
        if pollfds[1].revents & libc::POLLIN != 0 {
            self.accept_ack_connection(engine)?;
        }

        let mut dead = Vec::new();
        for (i, conn) in self.request_conns.iter_mut().enumerate() {
            let revents = pollfds[2 + i].revents;
            if revents & (libc::POLLHUP | libc::POLLERR) != 0 {
                dead.push(i);
                continue;
            }
            if revents & libc::POLLIN != 0 {
                if dispatch_one_request(&mut conn.stream, engine, events).is_err() {
                    dead.push(i);
                }
            }
        }
        for i in dead.into_iter().rev() {
            let conn = self.request_conns.remove(i);
            warn!(id = ?conn.id, "request connection lost");
            let mut graph = engine.graph.lock();
            let mut ports = engine.ports.lock();
            crate::fault::zombify(&mut graph, &mut ports, conn.id);
        }
        Ok(())
    }

    fn accept_request_connection(&mut self, engine: &Engine, events: &EventPlane) -> std::io::Result<()> {
        let (mut stream, _) = self.request_listener.accept()?;
        let handshake: ClientConnectRequest = match read_framed(&mut stream) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "malformed client handshake");
                return Ok(());
            }
        };

        let kind = match handshake.kind {
            engine_proto::ClientKind::External => ClientKind::External,
            engine_proto::ClientKind::InProcess => ClientKind::InProcess,
            engine_proto::ClientKind::Driver => ClientKind::Driver,
        };

        let id = {
            let mut graph = engine.graph.lock();
            match graph.clients.register(handshake.name.clone(), kind) {
                Some(id) => id,
                None => {
                    let resp = ClientConnectResponse {
                        status: engine_proto::RequestErrorKind::InternalLoadFailure.status(),
                        protocol_version: handshake.protocol_version,
                        client_shm_name: String::new(),
                        control_shm_name: String::new(),
                        control_size: 0,
                        realtime: engine.config.realtime,
                        realtime_priority: engine.config.rtpriority,
                        n_port_types: 0,
                        fifo_prefix: self.fifo_prefix.clone(),
                    };
                    let _ = write_framed(&mut stream, &resp);
                    return Ok(());
                }
            }
        };

        if let Some(c) = engine.graph.lock().clients.get_mut(id) {
            c.pid = stream_peer_pid(&stream);
        }

        let n_port_types = engine.buffers.iter().len() as u32;
        let resp = ClientConnectResponse {
            status: 0,
            protocol_version: handshake.protocol_version,
            client_shm_name: format!("/jack-c-{}", handshake.name),
            control_shm_name: "/jack-engine".to_string(),
            control_size: 0,
            realtime: engine.config.realtime,
            realtime_priority: engine.config.rtpriority,
            n_port_types,
            fifo_prefix: self.fifo_prefix.clone(),
        };
        write_framed(&mut stream, &resp)?;

        if kind == ClientKind::External {
            for t in engine.buffers.iter() {
                let ev = Event::NewPortType {
                    type_id: t.type_id,
                    shm_name: t.shm_name(),
                    size: t.segment_size(),
                };
                let _ = write_framed(&mut stream, &ev);
            }
        }

        debug!(?id, name = %handshake.name, "client connected");
        self.request_conns.push(ClientConn { id, stream });
        let _ = events;
        Ok(())
    }

    fn accept_ack_connection(&mut self, engine: &Engine) -> std::io::Result<()> {
        let (mut stream, _) = self.ack_listener.accept()?;
        let client_id: u32 = match read_framed(&mut stream) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "malformed event-ack handshake");
                return Ok(());
            }
        };
        let mut graph = engine.graph.lock();
        let found = graph.clients.iter().find(|c| c.id.slot == client_id).map(|c| c.id);
        if let Some(id) = found {
            let fd = stream.as_raw_fd();
            if let Some(c) = graph.clients.get_mut(id) {
                c.event_fd = Some(fd);
            }
            self.pending_ack.push((fd, stream));
        }
        Ok(())
    }

    pub fn server_dir(&self) -> &Path {
        &self.server_dir
    }
}

fn dispatch_one_request(stream: &mut UnixStream, engine: &Engine, events: &EventPlane) -> std::io::Result<()> {
    let req: Request = read_framed(stream)?;
    match handle_request(engine, events, req) {
        Handled::Reply(r) => write_framed(stream, &r),
        Handled::Connections(payload) => write_framed(stream, &(payload.port, payload.connected)),
    }
}

fn read_framed<T: serde::de::DeserializeOwned>(stream: &mut UnixStream) -> std::io::Result<T> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;
    serde_json::from_slice(&buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn write_framed<T: serde::Serialize>(stream: &mut UnixStream, value: &T) -> std::io::Result<()> {
    let payload = serde_json::to_vec(value).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_all(&(payload.len() as u32).to_le_bytes())?;
    stream.write_all(&payload)?;
    Ok(())
}

fn stream_peer_pid(stream: &UnixStream) -> Option<i32> {
    let fd = stream.as_raw_fd();
    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc == 0 {
        Some(cred.pid)
    } else {
        None
    }
}
