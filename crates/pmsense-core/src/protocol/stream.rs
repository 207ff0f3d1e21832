//! Transport abstraction
//!
//! The engine talks to anything that reads and writes bytes and can report
//! and discard pending input. Reads may return fewer bytes than asked for,
//! or fail with `TimedOut`/`WouldBlock` when nothing arrived within the
//! per-call timeout.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::{configure_port, open_port, ProtocolError};

/// Half-duplex byte channel to a sensor
pub trait SerialTransport: Read + Write + Send {
    /// Number of bytes already received and waiting to be read
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Drop everything waiting in the receive buffer
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Set the per-call read/write timeout
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

/// `serialport`-backed transport
pub struct SerialPortTransport {
    port: Box<dyn SerialPort>,
}

impl SerialPortTransport {
    /// Open and configure a port for the sensor
    pub fn open(name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, ProtocolError> {
        let mut port = open_port(name, Some(baud_rate), Some(timeout))?;
        configure_port(port.as_mut())?;
        Ok(Self { port })
    }
}

impl Read for SerialPortTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialPortTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl SerialTransport for SerialPortTransport {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io::Error::other)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }
}

impl<T: SerialTransport + ?Sized> SerialTransport for Box<T> {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        (**self).bytes_to_read()
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        (**self).clear_input_buffer()
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        (**self).set_timeout(timeout)
    }
}
