//! Cartlink-Core: transfer engine for USB Game Boy Advance cartridge readers.
//!
//! This crate discovers a supported reader on the USB bus, opens a session
//! over its bulk endpoints and moves ROM and save data in chunked,
//! progress-reporting, cancellable transfers.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Transport**: USB host abstraction (nusb, mock)
//! - **Device**: Registry of supported readers and discovery
//! - **Protocol**: Line commands, `INFO` metadata, header layout
//! - **Session**: One open reader, serialized I/O
//! - **Transfer**: Chunk planning and worker-thread transfers
//! - **Cartridge**: Header parsing into `CartridgeInfo`
//! - **Events**: Observer pattern for UI decoupling
//! - **Engine**: `CartReader`, the high-level entry point
//!
//! # Example
//!
//! ```no_run
//! use cartlink_core::{CartReader, EngineConfig};
//!
//! let reader = CartReader::new(EngineConfig::default());
//! reader.connect()?;
//! let cart = reader.cartridge_info()?;
//! let rom = reader.read_rom(0, cart.rom_size, |f| eprint!("\r{:3.0}%", f * 100.0))?;
//! std::fs::write(format!("{}.gba", cart.file_stem()), rom)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cartridge;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod protocol;
pub mod session;
pub mod transfer;
pub mod transport;

// Re-exports for convenience
pub use cartridge::{CartridgeInfo, SaveType};
pub use config::EngineConfig;
pub use device::{DeviceCandidate, DeviceDescriptor, DeviceType, REGISTRY};
pub use engine::{CartReader, ScannedDevice};
pub use error::{CartError, Result};
pub use events::{CartEvent, CartObserver, NullObserver, TracingObserver};
pub use session::ConnectionState;
pub use transfer::{CancelToken, TransferHandle, TransferKind, TransferProgress};
pub use transport::{MockHost, MockTransport, NusbHost, TransportError, UsbHost, UsbTransport};
