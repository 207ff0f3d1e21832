//! Reply decoding
//!
//! Interprets a collected 10-byte reply according to the command that
//! produced it. Malformed input never panics or errors; it is logged and
//! reported as `None`.
//!
//! Reply layouts:
//! - firmware: `AA C5 07 YY MM DD id id cs AB`
//! - mode ack: `AA C5 02 rw MODE 00 id id cs AB`
//! - PM data:  `AA C0 pm25_lo pm25_hi pm10_lo pm10_hi id id cs AB`

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use super::{DATA_REPORT_ID, HEAD, RESPONSE_FRAME_LEN, TAIL};

const FIRMWARE_YEAR: usize = 3;
const FIRMWARE_MONTH: usize = 4;
const FIRMWARE_DAY: usize = 5;
const MODE_FLAG: usize = 4;
const PM2_5_OFFSET: usize = 2;
const PM10_OFFSET: usize = 4;
const CHECKSUM_OFFSET: usize = 8;

/// One particulate-matter reading, in µg/m³
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParsedReading {
    /// PM2.5 concentration
    pub pm2_5: f32,
    /// PM10 concentration
    pub pm10: f32,
}

impl fmt::Display for ParsedReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pm25: {:.1} ug/m^3, pm10: {:.1} ug/m^3",
            self.pm2_5, self.pm10
        )
    }
}

/// Report mode the sensor claims to be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeState {
    /// Streaming reports continuously
    Active,
    /// Reporting only when queried
    Query,
    /// Flag byte was neither 0 nor 1
    Unknown,
}

impl From<u8> for ModeState {
    fn from(flag: u8) -> Self {
        match flag {
            0 => ModeState::Active,
            1 => ModeState::Query,
            _ => ModeState::Unknown,
        }
    }
}

/// Firmware build date, two-digit year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareDate {
    /// Years since 2000
    pub year: u8,
    /// 1-12
    pub month: u8,
    /// 1-31
    pub day: u8,
}

impl fmt::Display for FirmwareDate {
    /// `dd-mm-yy`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}-{:02}", self.day, self.month, self.year)
    }
}

/// Low byte of the sum of reply bytes 2..=7
///
/// Diagnostic only; replies are never rejected on it.
pub fn response_checksum(frame: &[u8]) -> Option<u8> {
    frame
        .get(2..CHECKSUM_OFFSET)
        .map(|data| data.iter().fold(0u8, |sum, &b| sum.wrapping_add(b)))
}

fn check_length(frame: &[u8], what: &str) -> bool {
    if frame.len() != RESPONSE_FRAME_LEN {
        warn!(
            "{} reply is {} bytes, not {}: {:02x?}",
            what,
            frame.len(),
            RESPONSE_FRAME_LEN,
            frame
        );
        return false;
    }
    true
}

fn log_checksum(frame: &[u8]) {
    if let Some(expected) = response_checksum(frame) {
        if expected != frame[CHECKSUM_OFFSET] {
            debug!(
                "reply checksum 0x{:02x} differs from computed 0x{:02x}",
                frame[CHECKSUM_OFFSET], expected
            );
        }
    }
}

/// Decode a firmware-date reply
pub fn decode_firmware(frame: &[u8]) -> Option<FirmwareDate> {
    if !check_length(frame, "firmware") {
        return None;
    }
    log_checksum(frame);
    let date = FirmwareDate {
        year: frame[FIRMWARE_YEAR],
        month: frame[FIRMWARE_MONTH],
        day: frame[FIRMWARE_DAY],
    };
    debug!("firmware date: {} (dd-mm-yy)", date);
    Some(date)
}

/// Decode a report-mode acknowledgement
pub fn decode_mode(frame: &[u8]) -> Option<ModeState> {
    if !check_length(frame, "mode") {
        return None;
    }
    log_checksum(frame);
    let mode = ModeState::from(frame[MODE_FLAG]);
    match mode {
        ModeState::Active => debug!("sensor is in active mode"),
        ModeState::Query => debug!("sensor is in query mode"),
        ModeState::Unknown => warn!("unknown report mode flag 0x{:02x}", frame[MODE_FLAG]),
    }
    Some(mode)
}

/// Decode a PM data report
///
/// Both PM fields are little-endian signed 16-bit tenths of µg/m³.
pub fn decode_data(frame: &[u8]) -> Option<ParsedReading> {
    if !check_length(frame, "data") {
        return None;
    }
    if frame[0] != HEAD {
        warn!("data reply head is 0x{:02x}, not 0x{:02x}", frame[0], HEAD);
        return None;
    }
    if frame[RESPONSE_FRAME_LEN - 1] != TAIL {
        warn!(
            "data reply tail is 0x{:02x}, not 0x{:02x}",
            frame[RESPONSE_FRAME_LEN - 1],
            TAIL
        );
        return None;
    }
    if frame[1] != DATA_REPORT_ID {
        warn!(
            "data reply id is 0x{:02x}, not 0x{:02x}",
            frame[1], DATA_REPORT_ID
        );
        return None;
    }
    log_checksum(frame);

    let pm2_5 = LittleEndian::read_i16(&frame[PM2_5_OFFSET..PM2_5_OFFSET + 2]);
    let pm10 = LittleEndian::read_i16(&frame[PM10_OFFSET..PM10_OFFSET + 2]);
    let reading = ParsedReading {
        pm2_5: f32::from(pm2_5) / 10.0,
        pm10: f32::from(pm10) / 10.0,
    };
    debug!("sds011 {}", reading);
    Some(reading)
}
