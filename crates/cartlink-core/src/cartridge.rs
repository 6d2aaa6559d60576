//! GBA cartridge header fields and save memory types.

use std::fmt;

use crate::protocol::constants::*;
use crate::protocol::metadata::CartMetadata;

/// Placeholder for a header field the cartridge data does not cover.
pub const UNKNOWN_FIELD: &str = "UNKNOWN";

/// Standard GBA save chip sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveType {
    Eeprom512,
    Eeprom8K,
    Sram32K,
    Flash64K,
    Flash128K,
}

impl SaveType {
    pub const ALL: [SaveType; 5] = [
        SaveType::Eeprom512,
        SaveType::Eeprom8K,
        SaveType::Sram32K,
        SaveType::Flash64K,
        SaveType::Flash128K,
    ];

    /// Size in bytes.
    pub fn size(&self) -> usize {
        match self {
            SaveType::Eeprom512 => 512,
            SaveType::Eeprom8K => 8 * 1024,
            SaveType::Sram32K => 32 * 1024,
            SaveType::Flash64K => 64 * 1024,
            SaveType::Flash128K => 128 * 1024,
        }
    }

    pub fn from_size(size: usize) -> Option<SaveType> {
        Self::ALL.into_iter().find(|t| t.size() == size)
    }
}

impl fmt::Display for SaveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveType::Eeprom512 => write!(f, "EEPROM 512 B"),
            SaveType::Eeprom8K => write!(f, "EEPROM 8 KiB"),
            SaveType::Sram32K => write!(f, "SRAM 32 KiB"),
            SaveType::Flash64K => write!(f, "Flash 64 KiB"),
            SaveType::Flash128K => write!(f, "Flash 128 KiB"),
        }
    }
}

/// Snapshot of the inserted cartridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartridgeInfo {
    pub title: String,
    pub game_code: String,
    pub maker_code: String,
    /// Software version byte, `None` if the header is truncated.
    pub version: Option<u8>,
    /// ROM size in bytes as reported by the reader. Always non-zero.
    pub rom_size: usize,
    /// Save size in bytes. `Some(0)`: no save memory. `None`: unknown.
    pub save_size: Option<usize>,
    /// Header complement check, `None` if the header is truncated.
    pub header_checksum_valid: Option<bool>,
}

impl CartridgeInfo {
    /// Build from raw header bytes (starting at ROM offset 0) and reader
    /// metadata. Fields past the end of `header` become placeholders.
    pub fn from_header(header: &[u8], meta: CartMetadata) -> Self {
        Self {
            title: ascii_field(header, HEADER_TITLE_OFFSET, HEADER_TITLE_LEN),
            game_code: ascii_field(header, HEADER_GAME_CODE_OFFSET, HEADER_GAME_CODE_LEN),
            maker_code: ascii_field(header, HEADER_MAKER_CODE_OFFSET, HEADER_MAKER_CODE_LEN),
            version: header.get(HEADER_VERSION_OFFSET).copied(),
            rom_size: meta.rom_size,
            save_size: meta.save_size,
            header_checksum_valid: header_checksum(header)
                .map(|expected| expected == header[HEADER_CHECKSUM_OFFSET]),
        }
    }

    pub fn save_type(&self) -> Option<SaveType> {
        self.save_size.and_then(SaveType::from_size)
    }

    /// Whether the cartridge has save memory of known size.
    pub fn has_save(&self) -> bool {
        self.save_size.is_some_and(|s| s > 0)
    }

    /// `TITLE_CODE` with filesystem-unfriendly characters replaced.
    pub fn file_stem(&self) -> String {
        let title = if self.title.is_empty() {
            UNKNOWN_FIELD
        } else {
            &self.title
        };
        format!("{}_{}", title, self.game_code)
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for CartridgeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] maker {} rev {} ROM {} KiB",
            self.title,
            self.game_code,
            self.maker_code,
            self.version
                .map_or_else(|| UNKNOWN_FIELD.to_string(), |v| v.to_string()),
            self.rom_size / 1024
        )?;
        match (self.save_size, self.save_type()) {
            (Some(0), _) => write!(f, ", no save"),
            (_, Some(save)) => write!(f, ", save {}", save),
            _ => write!(f, ", save unknown"),
        }
    }
}

/// Fixed-width ASCII field, right-trimmed of NUL and space padding.
fn ascii_field(header: &[u8], offset: usize, len: usize) -> String {
    let Some(bytes) = header.get(offset..offset + len) else {
        return UNKNOWN_FIELD.to_string();
    };
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                ' '
            }
        })
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Expected complement byte over 0xA0..=0xBC.
fn header_checksum(header: &[u8]) -> Option<u8> {
    if header.len() <= HEADER_CHECKSUM_OFFSET {
        return None;
    }
    let sum = header[HEADER_TITLE_OFFSET..HEADER_CHECKSUM_OFFSET]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_sub(b));
    Some(sum.wrapping_sub(0x19))
}
