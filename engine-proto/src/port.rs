use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Directional / role flags for a port.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PortFlags: u8 {
        const INPUT    = 0b0001;
        const OUTPUT   = 0b0010;
        const TERMINAL = 0b0100;
        const PHYSICAL = 0b1000;
    }
}

/// A port identifier. Low bits are the slot index into the port table;
/// high bits are a generation counter bumped on every reuse of the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortId {
    pub slot: u32,
    pub generation: u32,
}

/// A port-type identifier. `PortTypeId::AUDIO` is the primary type whose
/// shared segment reserves the process-wide silent buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortTypeId(pub u32);

impl PortTypeId {
    pub const AUDIO: PortTypeId = PortTypeId(0);
}

/// How a port type's buffer slots are sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferSizePolicy {
    FixedBytes(usize),
    Scaled {
        scale_factor: usize,
        sample_size: usize,
    },
}

/// Descriptor for a registered port, as seen across the request/event wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortInfo {
    pub id: PortId,
    pub type_id: PortTypeId,
    pub owner_client_id: u32,
    pub name: String,
    pub flags: PortFlags,
    pub latency: u32,
    pub total_latency: u32,
}
