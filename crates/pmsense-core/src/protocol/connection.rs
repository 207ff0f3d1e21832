//! Connection management
//!
//! Owns the transport and runs command exchanges with the sensor. At most
//! one exchange is in flight at a time; `&mut self` on every operation
//! enforces that.

use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{
    encode, lookup, Command, CommandName, FirmwareDate, FrameReader, ModeState, ParsedReading,
    ProtocolError, SerialPortTransport, SerialTransport, DATA_REPORT_ID, RESPONSE_FRAME_LEN,
};
use crate::config::SensorConfig;
use crate::poll::{Outcome, PollCycle};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No transport
    Disconnected,
    /// Transport open and usable
    Connected,
    /// Last exchange failed at the transport level
    Error,
}

/// Link to one sensor
pub struct Connection {
    /// Transport handle, present while open
    transport: Option<Box<dyn SerialTransport>>,
    state: ConnectionState,
    config: SensorConfig,
    reader: FrameReader,
    tx_bytes: u64,
    rx_bytes: u64,
    tx_frames: u64,
    rx_frames: u64,
}

impl Connection {
    /// Create a connection (not yet open)
    pub fn new(config: SensorConfig) -> Self {
        let reader = FrameReader::new(config.byte_poll_interval());
        Self {
            transport: None,
            state: ConnectionState::Disconnected,
            config,
            reader,
            tx_bytes: 0,
            rx_bytes: 0,
            tx_frames: 0,
            rx_frames: 0,
        }
    }

    /// Create a connection over an already-open transport
    ///
    /// The configured I/O timeout is applied; a transport that rejects it
    /// keeps its own.
    pub fn with_transport(config: SensorConfig, mut transport: Box<dyn SerialTransport>) -> Self {
        if let Err(e) = transport.set_timeout(config.io_timeout()) {
            warn!("transport kept its own timeout: {}", e);
        }
        let mut conn = Self::new(config);
        conn.transport = Some(transport);
        conn.state = ConnectionState::Connected;
        conn
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a transport is attached
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Active configuration
    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    /// Cumulative tx bytes, rx bytes, tx frames and rx frames
    pub fn counters(&self) -> (u64, u64, u64, u64) {
        (self.tx_bytes, self.rx_bytes, self.tx_frames, self.rx_frames)
    }

    /// Open the configured serial port
    pub fn open(&mut self) -> Result<(), ProtocolError> {
        if self.transport.is_some() {
            return Err(ProtocolError::AlreadyConnected);
        }
        self.config.validate()?;

        let transport = SerialPortTransport::open(
            &self.config.port_name,
            self.config.baud_rate,
            self.config.io_timeout(),
        )
        .inspect_err(|e| {
            error!("{}", e);
            self.state = ConnectionState::Error;
        })?;

        self.attach(Box::new(transport))
    }

    /// Take over a freshly opened transport
    ///
    /// Applies the I/O timeout, waits out the post-open delay and drops
    /// whatever the sensor sent meanwhile. Any failure here is an open
    /// failure and leaves the connection closed.
    pub fn attach(&mut self, mut transport: Box<dyn SerialTransport>) -> Result<(), ProtocolError> {
        if self.transport.is_some() {
            return Err(ProtocolError::AlreadyConnected);
        }

        let port = self.config.port_name.clone();
        let open_err = |e: io::Error| ProtocolError::TransportOpen {
            port: port.clone(),
            reason: e.to_string(),
        };

        let settled = transport
            .set_timeout(self.config.io_timeout())
            .map_err(open_err)
            .and_then(|()| {
                debug!(
                    "open: waiting {}ms after port open",
                    self.config.open_delay_ms
                );
                std::thread::sleep(self.config.open_delay());
                transport.clear_input_buffer().map_err(open_err)
            });
        if let Err(e) = settled {
            error!("{}", e);
            self.state = ConnectionState::Error;
            return Err(e);
        }

        info!("{} is open", self.config.port_name);
        self.transport = Some(transport);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    /// Drop the transport
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            info!("closed {}", self.config.port_name);
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Wait for the fan and laser to spin up
    pub fn warm_up(&self) {
        info!("sensor is initializing for {}ms", self.config.warmup_ms);
        std::thread::sleep(self.config.warmup());
    }

    fn transport_mut(&mut self) -> Result<&mut Box<dyn SerialTransport>, ProtocolError> {
        self.transport.as_mut().ok_or(ProtocolError::NotConnected)
    }

    /// Discard pending input
    pub fn clear_input(&mut self) -> Result<(), ProtocolError> {
        self.transport_mut()?
            .clear_input_buffer()
            .map_err(|e| ProtocolError::TransportRead(e.to_string()))
    }

    /// Flush pending input and write the command frame
    pub fn send_command(&mut self, command: &Command) -> Result<(), ProtocolError> {
        let frame = encode(command);
        let transport = self.transport_mut()?;

        if let Err(e) = write_frame(&mut **transport, frame.as_bytes()) {
            error!("write of {} failed: {}", command.name, e);
            self.state = ConnectionState::Error;
            return Err(ProtocolError::TransportWrite(e.to_string()));
        }

        debug!("pc->sensor [{:02x?}]", frame.as_bytes());
        self.tx_bytes = self.tx_bytes.saturating_add(frame.len() as u64);
        self.tx_frames = self.tx_frames.saturating_add(1);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    /// Collect one reply frame carrying `expected_id`
    ///
    /// The result is shorter than a full frame if the deadline passed first.
    pub fn collect(
        &mut self,
        expected_id: u8,
        deadline: Duration,
    ) -> Result<Vec<u8>, ProtocolError> {
        let reader = self.reader;
        let transport = self.transport_mut()?;
        let frame = match reader.collect(transport, expected_id, deadline, RESPONSE_FRAME_LEN) {
            Ok(frame) => frame,
            Err(e) => {
                error!("{}", e);
                self.state = ConnectionState::Error;
                return Err(e);
            }
        };

        self.rx_bytes = self.rx_bytes.saturating_add(frame.len() as u64);
        if frame.len() == RESPONSE_FRAME_LEN {
            debug!("sensor->pc [{:02x?}]", frame);
            self.rx_frames = self.rx_frames.saturating_add(1);
        }
        Ok(frame)
    }

    /// Send a command and return its raw reply, possibly incomplete
    pub fn execute(&mut self, name: CommandName) -> Result<Vec<u8>, ProtocolError> {
        let command = name.command();
        self.send_command(command)?;
        std::thread::sleep(self.config.settle_delay());
        let deadline = self.config.response_timeout();
        self.collect(command.response_id, deadline)
    }

    /// Like [`execute`](Self::execute), with the command looked up by name
    ///
    /// Unknown names fail before anything is written.
    pub fn execute_named(&mut self, name: &str) -> Result<Vec<u8>, ProtocolError> {
        let command = lookup(name)?;
        self.execute(command.name)
    }

    /// Read the firmware build date
    pub fn check_firmware(&mut self) -> Result<Option<FirmwareDate>, ProtocolError> {
        Ok(self
            .run_cycle(CommandName::CheckFirmware)?
            .and_then(Outcome::into_firmware))
    }

    /// Switch to streaming reports
    pub fn set_active_mode(&mut self) -> Result<Option<ModeState>, ProtocolError> {
        Ok(self
            .run_cycle(CommandName::SetActiveMode)?
            .and_then(Outcome::into_mode))
    }

    /// Switch to reporting on request
    pub fn set_query_mode(&mut self) -> Result<Option<ModeState>, ProtocolError> {
        Ok(self
            .run_cycle(CommandName::SetQueryMode)?
            .and_then(Outcome::into_mode))
    }

    /// Ask which report mode is active
    pub fn get_report_mode(&mut self) -> Result<Option<ModeState>, ProtocolError> {
        Ok(self
            .run_cycle(CommandName::GetReportMode)?
            .and_then(Outcome::into_mode))
    }

    /// Ask for one reading, then drop whatever else is queued
    pub fn query_data(&mut self) -> Result<Option<ParsedReading>, ProtocolError> {
        let outcome = self.run_cycle(CommandName::QueryData)?;
        self.clear_input()?;
        Ok(outcome.and_then(Outcome::into_reading))
    }

    /// Wait for one streamed data report (active mode)
    pub fn listen_for_data(&mut self) -> Result<Option<ParsedReading>, ProtocolError> {
        let deadline = self.config.data_timeout();
        let frame = self.collect(DATA_REPORT_ID, deadline)?;
        if frame.is_empty() {
            info!("sensor->pc no response!");
            return Ok(None);
        }
        Ok(super::decode_data(&frame))
    }

    fn run_cycle(&mut self, name: CommandName) -> Result<Option<Outcome>, ProtocolError> {
        PollCycle::new(name).run(self)
    }
}

fn write_frame(transport: &mut dyn SerialTransport, bytes: &[u8]) -> io::Result<()> {
    transport.clear_input_buffer()?;
    transport.write_all(bytes)?;
    transport.flush()
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
