//! Protocol constants for the cartridge reader line protocol.

// ============================================================================
// Commands (Host -> Device), newline-terminated ASCII
// ============================================================================

/// Line terminator appended to every command.
pub const LINE_END: u8 = b'\n';

/// Reset the reader and ask it to identify itself.
pub const CMD_RESET: &str = "RESET";

/// Report cartridge metadata (ROM / save sizes).
pub const CMD_INFO: &str = "INFO";

/// `READ <region> <offset hex> <length hex>`; raw bytes follow.
pub const CMD_READ: &str = "READ";

/// `WRITE <region> <offset hex> <length hex>`; host sends raw bytes, device acks.
pub const CMD_WRITE: &str = "WRITE";

/// Memory region names used by READ / WRITE.
pub const REGION_ROM: &str = "ROM";
pub const REGION_SAVE: &str = "SAVE";

// ============================================================================
// Responses (Device -> Host)
// ============================================================================

/// Write acknowledgement prefix.
pub const RESP_OK: &str = "OK";

/// Reported by INFO when the slot is empty.
pub const RESP_NO_CART: &str = "NOCART";

/// INFO keys.
pub const INFO_KEY_ROM: &str = "ROM";
pub const INFO_KEY_SAVE: &str = "SAVE";

/// INFO save value for a cartridge without save memory.
pub const INFO_SAVE_NONE: &str = "NONE";

// ============================================================================
// Line setup (CH34x-style vendor request)
// ============================================================================

/// Vendor "write register" request.
pub const LINE_CONFIG_REQUEST: u8 = 0x9A;
/// Baud rate divisor register pair.
pub const LINE_CONFIG_VALUE: u16 = 0x1312;
/// Divisor / prescaler for 115200 baud.
pub const LINE_CONFIG_INDEX: u16 = 0xCC83;

// ============================================================================
// Sizes and timing
// ============================================================================

/// Default per-transfer timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default maximum bytes read back for a command response.
pub const RESPONSE_BUFFER: usize = 512;

pub const ONE_KB: usize = 1024;
pub const SIXTY_FOUR_KB: usize = 64 * 1024;
pub const TWO_FIFTY_SIX_KB: usize = 256 * 1024;

/// Transfer chunk size bounds.
pub const MIN_CHUNK_SIZE: usize = ONE_KB;
pub const MAX_CHUNK_SIZE: usize = TWO_FIFTY_SIX_KB;
pub const DEFAULT_CHUNK_SIZE: usize = SIXTY_FOUR_KB;

// ============================================================================
// GBA cartridge header layout
// ============================================================================

/// Bytes read to cover the whole header.
pub const HEADER_SIZE: usize = 0xC0;

pub const HEADER_TITLE_OFFSET: usize = 0xA0;
pub const HEADER_TITLE_LEN: usize = 12;
pub const HEADER_GAME_CODE_OFFSET: usize = 0xAC;
pub const HEADER_GAME_CODE_LEN: usize = 4;
pub const HEADER_MAKER_CODE_OFFSET: usize = 0xB0;
pub const HEADER_MAKER_CODE_LEN: usize = 2;
pub const HEADER_VERSION_OFFSET: usize = 0xBC;
pub const HEADER_CHECKSUM_OFFSET: usize = 0xBD;
