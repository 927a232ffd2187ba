use serde::{Deserialize, Serialize};

use crate::port::{PortId, PortTypeId};

/// Engine-to-client notification. External clients must answer each one
/// with a single status byte; in-process clients receive these as a direct
/// function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    PortRegistered { port: PortId },
    PortUnregistered { port: PortId },
    PortConnected { source: PortId, destination: PortId },
    PortDisconnected { source: PortId, destination: PortId },
    BufferSizeChange { nframes: u32 },
    SampleRateChange { sample_rate: u32 },
    GraphReordered { execution_order: u32 },
    XRun,
    NewPortType {
        type_id: PortTypeId,
        shm_name: String,
        size: usize,
    },
}
