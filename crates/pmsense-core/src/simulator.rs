//! Simulated sensor
//!
//! A transport that answers command frames the way an SDS011 does, for
//! running the engine without hardware. PM levels drift in a random walk
//! around a city-air baseline.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

use crate::protocol::{
    response_checksum, FirmwareDate, ModeState, SerialTransport, COMMAND_FRAME_LEN,
    DATA_REPORT_ID, HEAD, REPLY_ID, RESPONSE_FRAME_LEN, TAIL,
};

const CMD_REPORT_MODE: u8 = 0x02;
const CMD_QUERY_DATA: u8 = 0x04;
const CMD_FIRMWARE: u8 = 0x07;

/// Junk sent ahead of every reply when noise is enabled
const NOISE: [u8; 3] = [0x42, HEAD, 0x17];

/// Simulated SDS011 on the other end of a serial line
pub struct SimulatedSensor {
    /// Bytes waiting for the host to read
    outgoing: VecDeque<u8>,
    /// Partial command frame written by the host
    incoming: Vec<u8>,
    mode: ModeState,
    firmware: FirmwareDate,
    /// Current PM2.5 level in µg/m³
    level: f64,
    noise: bool,
    timeout: Duration,
    commands: u64,
    rng: StdRng,
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSensor {
    /// Create a sensor with an entropy-seeded generator
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Create a sensor whose readings repeat for a given seed
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(mut rng: StdRng) -> Self {
        let level = rng.gen_range(8.0..25.0);
        Self {
            outgoing: VecDeque::new(),
            incoming: Vec::with_capacity(COMMAND_FRAME_LEN),
            mode: ModeState::Query,
            firmware: FirmwareDate {
                year: 15,
                month: 7,
                day: 10,
            },
            level,
            noise: false,
            timeout: Duration::from_millis(1000),
            commands: 0,
            rng,
        }
    }

    /// Start in the given report mode
    pub fn with_mode(mut self, mode: ModeState) -> Self {
        self.mode = mode;
        self
    }

    /// Prefix every reply with stray bytes
    pub fn with_noise(mut self, noise: bool) -> Self {
        self.noise = noise;
        self
    }

    /// Report mode the sensor is in
    pub fn mode(&self) -> ModeState {
        self.mode
    }

    /// Complete command frames received so far
    pub fn commands_received(&self) -> u64 {
        self.commands
    }

    /// Per-call timeout last set by the host
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn next_levels(&mut self) -> (i16, i16) {
        self.level = (self.level + self.rng.gen_range(-1.5..1.5)).clamp(1.0, 300.0);
        let coarse = self.level * self.rng.gen_range(1.3..1.8);
        let raw = |v: f64| (v * 10.0).round() as i16;
        (raw(self.level), raw(coarse))
    }

    fn queue_reply(&mut self, id: u8, payload: [u8; 6]) {
        let mut frame = [0u8; RESPONSE_FRAME_LEN];
        frame[0] = HEAD;
        frame[1] = id;
        frame[2..8].copy_from_slice(&payload);
        frame[8] = response_checksum(&frame).unwrap_or(0);
        frame[9] = TAIL;

        if self.noise {
            self.outgoing.extend(NOISE);
        }
        self.outgoing.extend(frame);
    }

    fn queue_data_report(&mut self) {
        let (pm2_5, pm10) = self.next_levels();
        let [a, b] = pm2_5.to_le_bytes();
        let [c, d] = pm10.to_le_bytes();
        self.queue_reply(DATA_REPORT_ID, [a, b, c, d, 0xFF, 0xFF]);
    }

    fn handle_command(&mut self, frame: &[u8]) {
        self.commands += 1;
        let (sub, write, value) = (frame[2], frame[3], frame[4]);
        match sub {
            CMD_REPORT_MODE => {
                if write == 1 {
                    self.mode = ModeState::from(value);
                }
                let flag = match self.mode {
                    ModeState::Active => 0,
                    ModeState::Query => 1,
                    ModeState::Unknown => value,
                };
                self.queue_reply(REPLY_ID, [CMD_REPORT_MODE, write, flag, 0x00, 0xFF, 0xFF]);
            }
            CMD_QUERY_DATA => self.queue_data_report(),
            CMD_FIRMWARE => {
                let fw = self.firmware;
                self.queue_reply(
                    REPLY_ID,
                    [CMD_FIRMWARE, fw.year, fw.month, fw.day, 0xFF, 0xFF],
                );
            }
            other => debug!("simulator: ignoring sub-command 0x{:02x}", other),
        }
    }

    fn accept(&mut self, byte: u8) {
        if self.incoming.is_empty() && byte != HEAD {
            return;
        }
        self.incoming.push(byte);
        if self.incoming.len() == COMMAND_FRAME_LEN {
            let frame = std::mem::take(&mut self.incoming);
            if frame[COMMAND_FRAME_LEN - 1] == TAIL {
                self.handle_command(&frame);
            } else {
                debug!("simulator: dropping malformed command {:02x?}", frame);
            }
        }
    }

    fn stream_if_active(&mut self) {
        if self.mode == ModeState::Active && self.outgoing.is_empty() {
            self.queue_data_report();
        }
    }
}

impl Read for SimulatedSensor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream_if_active();
        if self.outgoing.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.outgoing.len());
        for (slot, byte) in buf.iter_mut().zip(self.outgoing.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedSensor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            self.accept(byte);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialTransport for SimulatedSensor {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.stream_if_active();
        Ok(self.outgoing.len() as u32)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.outgoing.clear();
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_data, decode_firmware, decode_mode, encode, CommandName};

    fn exchange(sensor: &mut SimulatedSensor, name: CommandName) -> Vec<u8> {
        sensor.write_all(encode(name.command()).as_bytes()).unwrap();
        let mut buf = vec![0u8; 64];
        let n = sensor.read(&mut buf).unwrap();
        buf.truncate(n);
        buf
    }

    #[test]
    fn test_firmware_reply() {
        let mut sensor = SimulatedSensor::with_seed(1);
        let reply = exchange(&mut sensor, CommandName::CheckFirmware);
        let date = decode_firmware(&reply).unwrap();
        assert_eq!((date.year, date.month, date.day), (15, 7, 10));
    }

    #[test]
    fn test_mode_switch() {
        let mut sensor = SimulatedSensor::with_seed(1);
        let reply = exchange(&mut sensor, CommandName::SetQueryMode);
        assert_eq!(decode_mode(&reply), Some(ModeState::Query));

        let reply = exchange(&mut sensor, CommandName::SetActiveMode);
        assert_eq!(decode_mode(&reply), Some(ModeState::Active));
        assert_eq!(sensor.mode(), ModeState::Active);
        assert_eq!(sensor.commands_received(), 2);
    }

    #[test]
    fn test_query_data_is_plausible() {
        let mut sensor = SimulatedSensor::with_seed(7);
        for _ in 0..20 {
            let reply = exchange(&mut sensor, CommandName::QueryData);
            let reading = decode_data(&reply).unwrap();
            assert!(reading.pm2_5 >= 1.0 && reading.pm2_5 <= 300.0);
            assert!(reading.pm10 > reading.pm2_5);
            assert_eq!(response_checksum(&reply), Some(reply[8]));
        }
    }

    #[test]
    fn test_same_seed_same_readings() {
        let mut a = SimulatedSensor::with_seed(42);
        let mut b = SimulatedSensor::with_seed(42);
        assert_eq!(
            exchange(&mut a, CommandName::QueryData),
            exchange(&mut b, CommandName::QueryData)
        );
    }

    #[test]
    fn test_query_mode_is_silent() {
        let mut sensor = SimulatedSensor::with_seed(3);
        assert_eq!(sensor.bytes_to_read().unwrap(), 0);
        let mut buf = [0u8; 10];
        let err = sensor.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_active_mode_streams() {
        let mut sensor = SimulatedSensor::with_seed(3).with_mode(ModeState::Active);
        assert_eq!(sensor.bytes_to_read().unwrap(), RESPONSE_FRAME_LEN as u32);
    }

    #[test]
    fn test_records_host_timeout() {
        let mut sensor = SimulatedSensor::with_seed(3);
        assert_eq!(sensor.timeout(), Duration::from_millis(1000));
        sensor.set_timeout(Duration::from_millis(250)).unwrap();
        assert_eq!(sensor.timeout(), Duration::from_millis(250));
    }
}
