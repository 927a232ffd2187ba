use serde::{Deserialize, Serialize};

use crate::port::{BufferSizePolicy, PortFlags, PortId, PortTypeId};

/// One request-plane operation. Handled serially under the engine's
/// `request_lock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    RegisterPort {
        client_id: u32,
        name: String,
        type_id: PortTypeId,
        flags: PortFlags,
    },
    UnRegisterPort {
        client_id: u32,
        port_id: PortId,
    },
    ConnectPorts {
        source: PortId,
        destination: PortId,
    },
    DisconnectPort {
        source: PortId,
        destination: PortId,
    },
    DisconnectPorts {
        port_id: PortId,
    },
    ActivateClient {
        client_id: u32,
    },
    DeactivateClient {
        client_id: u32,
    },
    SetTimeBaseClient {
        client_id: u32,
    },
    SetClientCapabilities {
        client_id: u32,
        realtime: bool,
    },
    GetPortConnections {
        port_id: PortId,
    },
    GetPortNConnections {
        port_id: PortId,
    },
    RegisterPortType {
        name: String,
        policy: BufferSizePolicy,
        has_mixdown: bool,
    },
}

/// Generic reply envelope. `GetPortConnections` suppresses this and writes
/// its payload directly to the requester's reply channel instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub status: i32,
}

impl Reply {
    pub fn ok() -> Self {
        Reply { status: 0 }
    }

    pub fn err(status: i32) -> Self {
        Reply { status }
    }

    /// `GetPortNConnections`'s reply carries the count in `status`
    /// (always >= 0, so it is never confused with an error code).
    pub fn ok_with_count(n: i32) -> Self {
        Reply { status: n }
    }
}
