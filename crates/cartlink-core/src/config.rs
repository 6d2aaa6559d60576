//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::protocol::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_TIMEOUT_MS, RESPONSE_BUFFER};
use crate::transfer::chunk::clamp_chunk_size;

/// Configuration for a cartridge reader engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout for each bulk or control transfer, in milliseconds.
    pub timeout_ms: u64,
    /// Transfer chunk size in bytes. Clamped to 1 KiB..=256 KiB when used.
    pub chunk_size: usize,
    /// Maximum bytes read for a command response.
    pub response_buffer: usize,
    /// Send the vendor line-setup request during connect.
    pub configure_line: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            response_buffer: RESPONSE_BUFFER,
            configure_line: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Chunk size actually used for transfers.
    pub fn effective_chunk_size(&self) -> usize {
        clamp_chunk_size(self.chunk_size)
    }
}
