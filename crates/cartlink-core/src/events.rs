//! Event system for UI decoupling.
//!
//! Lets a CLI or GUI follow connection and transfer activity without
//! coupling to the engine internals.

use std::fmt;

use crate::device::DeviceType;
use crate::session::ConnectionState;
use crate::transfer::TransferKind;

/// Events emitted by the cartridge reader engine.
#[derive(Debug, Clone)]
pub enum CartEvent {
    /// Reader connected and identified.
    DeviceConnected {
        vid: u16,
        pid: u16,
        device_type: DeviceType,
    },
    /// Session torn down.
    DeviceDisconnected,
    /// Connection state changed.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Command line written to the reader.
    CommandSent { command: String },
    /// USB packet sent/received.
    Packet {
        direction: PacketDirection,
        length: usize,
        data: Option<Vec<u8>>,
    },
    /// Cartridge header read.
    CartridgeDetected { title: String, game_code: String },
    /// Chunk completed.
    Progress {
        kind: TransferKind,
        current: u64,
        total: u64,
    },
    /// Error occurred.
    Error { message: String },
}

/// USB packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving engine events.
///
/// Called from whichever thread drives the I/O; keep it cheap.
pub trait CartObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &CartEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl CartObserver for NullObserver {
    fn on_event(&self, _event: &CartEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl CartObserver for TracingObserver {
    fn on_event(&self, event: &CartEvent) {
        match event {
            CartEvent::DeviceConnected {
                vid,
                pid,
                device_type,
            } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), device = %device_type, "Device connected");
            }
            CartEvent::DeviceDisconnected => {
                tracing::info!("Device disconnected");
            }
            CartEvent::StateChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Connection state changed");
            }
            CartEvent::CommandSent { command } => {
                tracing::debug!(command = %command, "Command sent");
            }
            CartEvent::Packet {
                direction, length, ..
            } => {
                tracing::trace!(dir = %direction, len = length, "USB Packet");
            }
            CartEvent::CartridgeDetected { title, game_code } => {
                tracing::info!(title = %title, game_code = %game_code, "Cartridge detected");
            }
            CartEvent::Progress {
                kind,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    100
                };
                tracing::debug!(operation = %kind, progress = %format!("{}%", pct), "Progress");
            }
            CartEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
        }
    }
}
