//! Engine-level error taxonomy.

use thiserror::Error;

use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, CartError>;

#[derive(Error, Debug)]
pub enum CartError {
    #[error("No supported cartridge reader found")]
    NoDeviceFound,

    #[error("Reader {vid:04X}:{pid:04X} has no serial or vendor interface")]
    NoSerialInterface { vid: u16, pid: u16 },

    #[error("No permission to open reader {vid:04X}:{pid:04X}")]
    PermissionDenied { vid: u16, pid: u16 },

    #[error("Failed to open reader: {0}")]
    OpenFailed(#[source] TransportError),

    #[error("Failed to claim interface: {0}")]
    ClaimFailed(#[source] TransportError),

    #[error("Unrecognized identification response: {response:?}")]
    UnknownDeviceResponse { response: String },

    #[error("Not connected")]
    NotConnected,

    #[error("No cartridge inserted")]
    NoCartridge,

    #[error("Request 0x{offset:X}+0x{length:X} is outside 0x{limit:X} bytes")]
    OutOfRange {
        offset: usize,
        length: usize,
        limit: usize,
    },

    #[error("Cartridge has no save memory")]
    NoSaveMemory,

    #[error("Save size unknown")]
    SaveSizeUnknown,

    #[error("Save data is {actual} bytes, cartridge expects {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Transfer failed at 0x{offset:X}: {source}")]
    TransferIo {
        offset: usize,
        #[source]
        source: TransportError,
    },

    #[error("Transfer cancelled")]
    Cancelled,
}

impl CartError {
    /// Whether the error came from the reader dropping off the bus.
    pub fn is_disconnect(&self) -> bool {
        match self {
            CartError::NotConnected => true,
            CartError::TransferIo { source, .. } => source.is_disconnect(),
            _ => false,
        }
    }
}
