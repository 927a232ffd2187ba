use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientKind {
    External,
    InProcess,
    Driver,
}

/// Initial handshake a client sends on the request socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConnectRequest {
    pub kind: ClientKind,
    pub name: String,
    pub protocol_version: u32,
    /// True when loading a (possibly already-known) in-process plug-in by
    /// name rather than registering fresh; mirrors the load/unload
    /// distinction the connection server makes on handshake.
    pub load: bool,
    pub object_path: Option<String>,
    pub object_data: Option<String>,
}

/// Response to [`ClientConnectRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConnectResponse {
    pub status: i32,
    pub protocol_version: u32,
    pub client_shm_name: String,
    pub control_shm_name: String,
    pub control_size: usize,
    pub realtime: bool,
    pub realtime_priority: u8,
    pub n_port_types: u32,
    pub fifo_prefix: String,
}
