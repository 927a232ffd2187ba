//! Error types for the engine crate.
//!
//! [`EngineError`] covers request-plane failures that need to be matched
//! into a wire status code; bootstrap-time failures that only ever get
//! logged and turned into a process exit use `anyhow::Error` instead.

use thiserror::Error;

use engine_proto::RequestErrorKind;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("port does not exist")]
    PortDoesNotExist,

    #[error("port type mismatch")]
    PortTypeMismatch,

    #[error("port is locked")]
    PortLocked,

    #[error("port does not have the input flag")]
    PortNotInput,

    #[error("port does not have the output flag")]
    PortNotOutput,

    #[error("destination already connected and its type has no mixdown")]
    DuplicateConnection,

    #[error("client is not active")]
    ClientNotActive,

    #[error("client not found")]
    ClientNotFound,

    #[error("no free port slot")]
    NoFreePortSlot,

    #[error("unknown port type")]
    UnknownPortType,

    #[error("requesting client does not own this port")]
    OwnerMismatch,

    #[error("I/O failure: {0}")]
    IoFailure(String),

    #[error("in-process client failed to load: {0}")]
    InternalLoadFailure(String),
}

impl EngineError {
    pub fn kind(&self) -> RequestErrorKind {
        match self {
            EngineError::PortDoesNotExist => RequestErrorKind::PortDoesNotExist,
            EngineError::PortTypeMismatch => RequestErrorKind::PortTypeMismatch,
            EngineError::PortLocked => RequestErrorKind::PortLocked,
            EngineError::PortNotInput => RequestErrorKind::PortNotInput,
            EngineError::PortNotOutput => RequestErrorKind::PortNotOutput,
            EngineError::DuplicateConnection => RequestErrorKind::DuplicateConnection,
            EngineError::ClientNotActive => RequestErrorKind::ClientNotActive,
            EngineError::ClientNotFound => RequestErrorKind::ClientNotFound,
            EngineError::NoFreePortSlot => RequestErrorKind::NoFreePortSlot,
            EngineError::UnknownPortType => RequestErrorKind::UnknownPortType,
            EngineError::OwnerMismatch => RequestErrorKind::OwnerMismatch,
            EngineError::IoFailure(_) => RequestErrorKind::IoFailure,
            EngineError::InternalLoadFailure(_) => RequestErrorKind::InternalLoadFailure,
        }
    }

    pub fn status(&self) -> i32 {
        self.kind().status()
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
