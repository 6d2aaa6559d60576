//! Parsing of the `INFO` cartridge metadata response.
//!
//! Physical ROM size is not stored in the GBA header, so the reader reports
//! it, together with the save size, as `KEY=VALUE` tokens:
//! `ROM=33554432 SAVE=65536`.

use tracing::warn;

use super::constants::{INFO_KEY_ROM, INFO_KEY_SAVE, INFO_SAVE_NONE, RESP_NO_CART};
use crate::cartridge::SaveType;

/// Sizes reported by the reader for the inserted cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartMetadata {
    /// ROM size in bytes, always non-zero.
    pub rom_size: usize,
    /// Save size in bytes. `Some(0)`: no save memory. `None`: unknown.
    pub save_size: Option<usize>,
}

impl CartMetadata {
    /// Parse an `INFO` response. `None` means no cartridge.
    pub fn parse(response: &str) -> Option<Self> {
        let response = response.trim();
        if response.is_empty() || response.starts_with(RESP_NO_CART) {
            return None;
        }

        let mut rom_size = None;
        let mut save_size = None;

        for token in response.split(|c: char| c.is_whitespace() || c == ';') {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            match key.trim().to_ascii_uppercase().as_str() {
                INFO_KEY_ROM => rom_size = value.trim().parse::<usize>().ok(),
                INFO_KEY_SAVE => save_size = parse_save_size(value.trim()),
                _ => {}
            }
        }

        match rom_size {
            Some(rom_size) if rom_size > 0 => Some(Self {
                rom_size,
                save_size,
            }),
            _ => None,
        }
    }
}

fn parse_save_size(value: &str) -> Option<usize> {
    if value.eq_ignore_ascii_case(INFO_SAVE_NONE) {
        return Some(0);
    }
    let size = value.parse::<usize>().ok()?;
    if size == 0 || SaveType::from_size(size).is_some() {
        Some(size)
    } else {
        warn!(size, "Non-standard save size reported, treating as unknown");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let meta = CartMetadata::parse("ROM=33554432 SAVE=65536").unwrap();
        assert_eq!(meta.rom_size, 32 * 1024 * 1024);
        assert_eq!(meta.save_size, Some(64 * 1024));

        let meta = CartMetadata::parse("rom=8388608;save=512\n").unwrap();
        assert_eq!(meta.rom_size, 8 * 1024 * 1024);
        assert_eq!(meta.save_size, Some(512));
    }

    #[test]
    fn test_parse_saveless_and_unknown() {
        let none = CartMetadata::parse("ROM=4194304 SAVE=NONE").unwrap();
        assert_eq!(none.save_size, Some(0));

        let zero = CartMetadata::parse("ROM=4194304 SAVE=0").unwrap();
        assert_eq!(zero.save_size, Some(0));

        let unknown = CartMetadata::parse("ROM=4194304 SAVE=?").unwrap();
        assert_eq!(unknown.save_size, None);

        let missing = CartMetadata::parse("ROM=4194304").unwrap();
        assert_eq!(missing.save_size, None);

        let odd = CartMetadata::parse("ROM=4194304 SAVE=1000").unwrap();
        assert_eq!(odd.save_size, None);
    }

    #[test]
    fn test_parse_no_cartridge() {
        assert!(CartMetadata::parse("").is_none());
        assert!(CartMetadata::parse("NOCART").is_none());
        assert!(CartMetadata::parse("ROM=0 SAVE=NONE").is_none());
        assert!(CartMetadata::parse("garbage").is_none());
    }
}
