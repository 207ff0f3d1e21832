//! Command frame encoding
//!
//! Frame format (19 bytes):
//! - 5 bytes: command header (head `0xAA`, `0xB4`, sub-command, mode flags)
//! - 10 bytes: reserved, always zero
//! - 2 bytes: device id, always the `0xFF 0xFF` wildcard
//! - 1 byte: checksum (tabulated per command)
//! - 1 byte: tail `0xAB`

use std::fmt;

use super::{Command, COMMAND_FRAME_LEN, TAIL};

/// Device id that addresses any sensor on the line
const DEVICE_ID_WILDCARD: [u8; 2] = [0xFF, 0xFF];

const HEADER_LEN: usize = 5;
const RESERVED_LEN: usize = 10;
const DEVICE_ID_OFFSET: usize = HEADER_LEN + RESERVED_LEN;
const CHECKSUM_OFFSET: usize = DEVICE_ID_OFFSET + 2;

/// An encoded command, ready to be written
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame([u8; COMMAND_FRAME_LEN]);

impl CommandFrame {
    /// Raw frame bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Frame length, always 19
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false, a frame is never empty
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandFrame({:02x?})", self.0)
    }
}

/// Encode a catalog command into its 19-byte wire frame
pub fn encode(command: &Command) -> CommandFrame {
    let mut bytes = [0u8; COMMAND_FRAME_LEN];
    bytes[..HEADER_LEN].copy_from_slice(&command.header);
    // bytes[5..15] stay zero
    bytes[DEVICE_ID_OFFSET..CHECKSUM_OFFSET].copy_from_slice(&DEVICE_ID_WILDCARD);
    bytes[CHECKSUM_OFFSET] = command.checksum;
    bytes[COMMAND_FRAME_LEN - 1] = TAIL;
    CommandFrame(bytes)
}
