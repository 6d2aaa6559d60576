//! Protocol module - reader line protocol definitions.

pub mod command;
pub mod constants;
pub mod metadata;

pub use command::{CommandChannel, Region, decode_response, encode_command};
pub use constants::*;
pub use metadata::CartMetadata;
