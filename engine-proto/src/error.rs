use serde::{Deserialize, Serialize};

/// Negative-`status` reason codes the request plane can return. These never
/// propagate as Rust errors across the wire — the envelope's `status` field
/// carries the discriminant and the connection stays usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum RequestErrorKind {
    PortDoesNotExist = -1,
    PortTypeMismatch = -2,
    PortLocked = -3,
    PortNotInput = -4,
    PortNotOutput = -5,
    DuplicateConnection = -6,
    ClientNotActive = -7,
    ClientNotFound = -8,
    NoFreePortSlot = -9,
    UnknownPortType = -10,
    OwnerMismatch = -11,
    IoFailure = -12,
    InternalLoadFailure = -13,
}

impl RequestErrorKind {
    pub fn status(self) -> i32 {
        self as i32
    }
}
