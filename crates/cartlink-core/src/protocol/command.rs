//! Line-oriented command/response exchange over a claimed transport.

use std::fmt;

use tracing::{debug, instrument, warn};

use super::constants::*;
use super::metadata::CartMetadata;
use crate::device::DeviceType;
use crate::transport::{TransportError, UsbTransport};

/// Addressable cartridge memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Rom,
    Save,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Rom => REGION_ROM,
            Region::Save => REGION_SAVE,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode a command as a newline-terminated ASCII line.
pub fn encode_command(command: &str) -> Vec<u8> {
    let mut line = Vec::with_capacity(command.len() + 1);
    line.extend_from_slice(command.as_bytes());
    line.push(LINE_END);
    line
}

/// Decode a response buffer as text, dropping trailing padding.
pub fn decode_response(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\0', '\r', '\n', ' '])
        .to_string()
}

/// `READ` / `WRITE` command line for a region window.
pub fn block_command(verb: &str, region: Region, offset: usize, len: usize) -> String {
    format!("{} {} {:X} {:X}", verb, region, offset, len)
}

/// Command/response channel bound to one transport.
pub struct CommandChannel<'a> {
    transport: &'a dyn UsbTransport,
    response_buffer: usize,
}

impl<'a> CommandChannel<'a> {
    pub fn new(transport: &'a dyn UsbTransport, response_buffer: usize) -> Self {
        Self {
            transport,
            response_buffer,
        }
    }

    /// Send one command line and return the decoded response.
    ///
    /// A failed or partial write skips the read. Any failure, including a
    /// zero-byte read, yields an empty response.
    #[instrument(skip(self))]
    pub fn send_command(&self, command: &str) -> String {
        let line = encode_command(command);
        match self.transport.write(&line) {
            Ok(n) if n == line.len() => {}
            Ok(n) => {
                warn!(written = n, expected = line.len(), "Short command write");
                return String::new();
            }
            Err(e) => {
                warn!(error = %e, "Command write failed");
                return String::new();
            }
        }

        match self.transport.read(self.response_buffer) {
            Ok(bytes) if !bytes.is_empty() => {
                let response = decode_response(&bytes);
                debug!(response = %response, "Response received");
                response
            }
            Ok(_) => {
                debug!("Empty response");
                String::new()
            }
            Err(e) => {
                warn!(error = %e, "Response read failed");
                String::new()
            }
        }
    }

    /// Reset the reader and identify its family.
    pub fn identify(&self) -> (DeviceType, String) {
        let response = self.send_command(CMD_RESET);
        (DeviceType::from_identification(&response), response)
    }

    /// Ask the reader what cartridge is inserted. `None` when the slot is
    /// empty or the reader gave no usable answer.
    pub fn query_cartridge(&self) -> Option<CartMetadata> {
        CartMetadata::parse(&self.send_command(CMD_INFO))
    }

    /// Configure the serial line via the vendor control request.
    pub fn configure_line(&self) -> Result<(), TransportError> {
        self.transport
            .control_out(LINE_CONFIG_REQUEST, LINE_CONFIG_VALUE, LINE_CONFIG_INDEX)
    }

    /// Read `len` bytes of `region` starting at `offset`.
    #[instrument(skip(self))]
    pub fn read_block(
        &self,
        region: Region,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        self.write_full(&encode_command(&block_command(CMD_READ, region, offset, len)))?;
        self.transport.read_exact(len)
    }

    /// Write `data` into `region` starting at `offset` and wait for the ack.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn write_block(
        &self,
        region: Region,
        offset: usize,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.write_full(&encode_command(&block_command(
            CMD_WRITE,
            region,
            offset,
            data.len(),
        )))?;
        self.write_full(data)?;

        let ack = decode_response(&self.transport.read(self.response_buffer)?);
        if ack.starts_with(RESP_OK) {
            Ok(())
        } else {
            Err(TransportError::WriteFailed(format!(
                "Device rejected write at 0x{:X}: {:?}",
                offset, ack
            )))
        }
    }

    /// Write `bytes`, treating a partial write as a failure.
    fn write_full(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let written = self.transport.write(bytes)?;
        if written == bytes.len() {
            Ok(())
        } else {
            Err(TransportError::WriteFailed(format!(
                "Short write: {} of {} bytes",
                written,
                bytes.len()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockCartridge, MockTransport};

    #[test]
    fn test_encode_decode() {
        assert_eq!(encode_command("RESET"), b"RESET\n");
        assert_eq!(decode_response(b"GBxCart\r\n\0\0"), "GBxCart");
        assert_eq!(
            block_command(CMD_READ, Region::Save, 0x100, 0x400),
            "READ SAVE 100 400"
        );
    }

    #[test]
    fn test_send_command() {
        let mock = MockTransport::new();
        mock.queue_response(b"Joey Jr v2\n");
        let channel = CommandChannel::new(&mock, RESPONSE_BUFFER);

        assert_eq!(channel.send_command("RESET"), "Joey Jr v2");
        assert_eq!(mock.get_writes(), vec![b"RESET\n".to_vec()]);
    }

    #[test]
    fn test_write_failure_skips_read() {
        let mock = MockTransport::new();
        mock.queue_response(b"stale");
        mock.set_fail_writes(true);
        let channel = CommandChannel::new(&mock, RESPONSE_BUFFER);

        assert_eq!(channel.send_command("RESET"), "");
        assert_eq!(mock.read_count(), 0);
    }

    #[test]
    fn test_read_failure_is_empty() {
        let mock = MockTransport::new();
        let channel = CommandChannel::new(&mock, RESPONSE_BUFFER);
        // Nothing queued: the mock times out.
        assert_eq!(channel.send_command("INFO"), "");

        mock.queue_response(b"");
        assert_eq!(channel.send_command("INFO"), "");
    }

    #[test]
    fn test_identify() {
        let mock = MockTransport::new();
        mock.queue_response(b"GB Operator 1.0");
        let channel = CommandChannel::new(&mock, RESPONSE_BUFFER);
        let (device_type, raw) = channel.identify();
        assert_eq!(device_type, DeviceType::GbOperator);
        assert_eq!(raw, "GB Operator 1.0");
    }

    #[test]
    fn test_block_transfers() {
        let rom: Vec<u8> = (0..64u8).collect();
        let mock = MockTransport::with_cartridge(MockCartridge::new(
            "GBxCart",
            rom,
            Some(vec![0u8; 512]),
        ));
        let channel = CommandChannel::new(&mock, RESPONSE_BUFFER);

        assert_eq!(
            channel.read_block(Region::Rom, 8, 4).unwrap(),
            vec![8, 9, 10, 11]
        );

        channel.write_block(Region::Save, 4, &[0xAA; 4]).unwrap();
        assert_eq!(
            channel.read_block(Region::Save, 0, 8).unwrap(),
            vec![0, 0, 0, 0, 0xAA, 0xAA, 0xAA, 0xAA]
        );
    }

    #[test]
    fn test_write_block_rejected() {
        let mock = MockTransport::new();
        mock.queue_response(b"ERR\n");
        let channel = CommandChannel::new(&mock, RESPONSE_BUFFER);
        assert!(channel.write_block(Region::Save, 0, &[1, 2]).is_err());
    }

    #[test]
    fn test_short_command_write_stops_block_write() {
        let mock = MockTransport::with_cartridge(MockCartridge::new(
            "GBxCart",
            vec![0u8; 64],
            Some(vec![0u8; 16]),
        ));
        mock.set_write_limit(Some(4));
        let channel = CommandChannel::new(&mock, RESPONSE_BUFFER);

        assert!(matches!(
            channel.write_block(Region::Save, 0, &[9, 9, 9]),
            Err(TransportError::WriteFailed(_))
        ));
        // Only the truncated command line went out; the payload did not.
        assert_eq!(mock.get_writes(), vec![b"WRIT".to_vec()]);
        assert_eq!(mock.cartridge().unwrap().save.unwrap(), vec![0u8; 16]);
    }

    #[test]
    fn test_short_command_write_stops_block_read() {
        let mock = MockTransport::with_cartridge(MockCartridge::new("GBxCart", vec![1u8; 64], None));
        mock.set_write_limit(Some(4));
        let channel = CommandChannel::new(&mock, RESPONSE_BUFFER);

        assert!(channel.read_block(Region::Rom, 0, 8).is_err());
        assert_eq!(mock.read_count(), 0);
    }
}
