//! Serial Protocol Communication
//!
//! Implements the SDS011 binary command/response protocol.
//!
//! Commands are fixed 19-byte frames, replies are fixed 10-byte frames. Both
//! are bounded by the `0xAA` head and `0xAB` tail sentinels.

pub mod commands;
mod connection;
pub mod decoder;
mod error;
mod packet;
pub mod reader;
pub mod serial;
pub mod stream;

pub use commands::{lookup, Command, CommandName, CATALOG};
pub use connection::{Connection, ConnectionState};
pub use decoder::{
    decode_data, decode_firmware, decode_mode, response_checksum, FirmwareDate, ModeState,
    ParsedReading,
};
pub use error::ProtocolError;
pub use packet::{encode, CommandFrame};
pub use reader::FrameReader;
pub use serial::{configure_port, list_ports, open_port, PortInfo};
pub use stream::{SerialPortTransport, SerialTransport};

/// Byte that starts every frame, command or reply
pub const HEAD: u8 = 0xAA;

/// Byte that ends every frame, command or reply
pub const TAIL: u8 = 0xAB;

/// Second byte of every command frame
pub const COMMAND_ID: u8 = 0xB4;

/// Id of a reply to a mode or firmware command
pub const REPLY_ID: u8 = 0xC5;

/// Id of a particulate-matter data report
pub const DATA_REPORT_ID: u8 = 0xC0;

/// Size of a command frame on the wire
pub const COMMAND_FRAME_LEN: usize = 19;

/// Size of every reply frame on the wire
pub const RESPONSE_FRAME_LEN: usize = 10;

/// Default baud rate of the sensor UART
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default per-call read/write timeout in milliseconds
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 1000;

/// Default wait between writing a command and reading its reply
pub const DEFAULT_SETTLE_MS: u64 = 1000;

/// Default deadline for collecting a command reply
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 5000;

/// Default deadline for collecting a streamed data report
pub const DEFAULT_DATA_TIMEOUT_MS: u64 = 2000;

/// Sleep between polls of the transport while a frame is being collected
pub const DEFAULT_BYTE_POLL_MS: u64 = 10;
