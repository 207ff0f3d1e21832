//! Poll cycles
//!
//! One cycle is a single command → reply → decode round trip:
//!
//! ```text
//! Idle --write--> AwaitingSettle --settle delay--> ReadingFrame --+--> Decoded
//!                                                                  +--> Failed
//! ```
//!
//! [`Poller`] repeats cycles until cancelled. A failed cycle is logged and
//! counted, and the next one starts after the usual interval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ReportMode;
use crate::protocol::{
    decode_data, decode_firmware, decode_mode, CommandName, Connection, FirmwareDate, ModeState,
    ParsedReading, ProtocolError, RESPONSE_FRAME_LEN,
};

/// Longest uninterrupted sleep while waiting between cycles
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Where a cycle is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollState {
    /// Nothing sent yet
    Idle,
    /// Command written, waiting for the sensor to answer
    AwaitingSettle,
    /// Collecting the reply
    ReadingFrame,
    /// Reply decoded
    Decoded,
    /// Write failed or no valid reply arrived
    Failed,
}

/// Decoded result of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// Reply to `check_firmware`
    Firmware(FirmwareDate),
    /// Reply to a mode command
    Mode(ModeState),
    /// Reply to `query_data`, or a streamed report
    Reading(ParsedReading),
}

impl Outcome {
    /// The firmware date, if this is one
    pub fn into_firmware(self) -> Option<FirmwareDate> {
        match self {
            Outcome::Firmware(date) => Some(date),
            _ => None,
        }
    }

    /// The report mode, if this is one
    pub fn into_mode(self) -> Option<ModeState> {
        match self {
            Outcome::Mode(mode) => Some(mode),
            _ => None,
        }
    }

    /// The PM reading, if this is one
    pub fn into_reading(self) -> Option<ParsedReading> {
        match self {
            Outcome::Reading(reading) => Some(reading),
            _ => None,
        }
    }
}

/// Decode a reply with the decoder matching the command that produced it
pub fn decode_reply(name: CommandName, frame: &[u8]) -> Option<Outcome> {
    match name {
        CommandName::CheckFirmware => decode_firmware(frame).map(Outcome::Firmware),
        CommandName::SetActiveMode | CommandName::SetQueryMode | CommandName::GetReportMode => {
            decode_mode(frame).map(Outcome::Mode)
        }
        CommandName::QueryData => decode_data(frame).map(Outcome::Reading),
    }
}

/// A single command round trip
#[derive(Debug, Clone)]
pub struct PollCycle {
    name: CommandName,
    state: PollState,
    history: Vec<PollState>,
}

impl PollCycle {
    /// Fresh cycle for one command
    pub fn new(name: CommandName) -> Self {
        Self {
            name,
            state: PollState::Idle,
            history: vec![PollState::Idle],
        }
    }

    /// Current state
    pub fn state(&self) -> PollState {
        self.state
    }

    /// Every state the cycle passed through, starting with `Idle`
    pub fn history(&self) -> &[PollState] {
        &self.history
    }

    fn enter(&mut self, state: PollState) {
        debug!("{}: {:?} -> {:?}", self.name, self.state, state);
        self.state = state;
        self.history.push(state);
    }

    /// Run the cycle to `Decoded` or `Failed`
    ///
    /// Transport errors are returned after entering `Failed`; an incomplete
    /// or undecodable reply ends in `Failed` with `Ok(None)`.
    pub fn run(&mut self, conn: &mut Connection) -> Result<Option<Outcome>, ProtocolError> {
        let command = self.name.command();

        if let Err(e) = conn.send_command(command) {
            self.enter(PollState::Failed);
            return Err(e);
        }
        self.enter(PollState::AwaitingSettle);
        std::thread::sleep(conn.config().settle_delay());

        self.enter(PollState::ReadingFrame);
        let deadline = conn.config().response_timeout();
        let frame = match conn.collect(command.response_id, deadline) {
            Ok(frame) => frame,
            Err(e) => {
                self.enter(PollState::Failed);
                return Err(e);
            }
        };

        if frame.len() < RESPONSE_FRAME_LEN {
            warn!("{}: no complete reply ({} bytes)", self.name, frame.len());
            self.enter(PollState::Failed);
            return Ok(None);
        }

        match decode_reply(self.name, &frame) {
            Some(outcome) => {
                self.enter(PollState::Decoded);
                Ok(Some(outcome))
            }
            None => {
                self.enter(PollState::Failed);
                Ok(None)
            }
        }
    }
}

/// A reading stamped with the time it was taken
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Decoded PM values
    pub reading: ParsedReading,
    /// When the frame was decoded
    pub taken_at: DateTime<Utc>,
}

impl Sample {
    fn now(reading: ParsedReading) -> Self {
        Self {
            reading,
            taken_at: Utc::now(),
        }
    }
}

/// Counters for a polling run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollStats {
    /// Cycles attempted
    pub cycles: u64,
    /// Cycles that produced a reading
    pub decoded: u64,
    /// Cycles that produced nothing
    pub failed: u64,
}

/// Continuous acquisition over one connection
pub struct Poller {
    conn: Connection,
    mode: ReportMode,
    cancel: Arc<AtomicBool>,
    stats: PollStats,
}

impl Poller {
    /// Poll using the report mode from the connection's config
    pub fn new(conn: Connection) -> Self {
        let mode = conn.config().report_mode;
        Self {
            conn,
            mode,
            cancel: Arc::new(AtomicBool::new(false)),
            stats: PollStats::default(),
        }
    }

    /// Override the report mode
    pub fn with_mode(mut self, mode: ReportMode) -> Self {
        self.mode = mode;
        self
    }

    /// Flag that stops the loop when set
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Counters so far
    pub fn stats(&self) -> PollStats {
        self.stats
    }

    /// The underlying connection
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Poll until cancelled
    pub fn run<F>(&mut self, sink: F) -> Result<PollStats, ProtocolError>
    where
        F: FnMut(Sample),
    {
        self.run_cycles(None, sink)
    }

    /// Poll `count` cycles, or fewer if cancelled
    pub fn run_for<F>(&mut self, count: u64, sink: F) -> Result<PollStats, ProtocolError>
    where
        F: FnMut(Sample),
    {
        self.run_cycles(Some(count), sink)
    }

    fn run_cycles<F>(&mut self, limit: Option<u64>, mut sink: F) -> Result<PollStats, ProtocolError>
    where
        F: FnMut(Sample),
    {
        info!("polling in {:?} mode", self.mode);
        let mut done = 0u64;
        while !self.is_cancelled() && limit.map_or(true, |n| done < n) {
            done += 1;
            self.stats.cycles += 1;

            match self.cycle() {
                Ok(Some(reading)) => {
                    self.stats.decoded += 1;
                    sink(Sample::now(reading));
                }
                Ok(None) => self.stats.failed += 1,
                Err(e) if e.is_fatal() => {
                    error!("polling stopped: {}", e);
                    self.stats.failed += 1;
                    return Err(e);
                }
                Err(e) => {
                    warn!("poll cycle failed: {}", e);
                    self.stats.failed += 1;
                }
            }

            if limit.map_or(true, |n| done < n) {
                self.pause();
            }
        }
        info!(
            "polling finished: {} cycles, {} decoded, {} failed",
            self.stats.cycles, self.stats.decoded, self.stats.failed
        );
        Ok(self.stats)
    }

    fn cycle(&mut self) -> Result<Option<ParsedReading>, ProtocolError> {
        match self.mode {
            ReportMode::Query => self.conn.query_data(),
            ReportMode::Active => self.conn.listen_for_data(),
        }
    }

    fn pause(&mut self) {
        let wait = match self.mode {
            ReportMode::Query => self.conn.config().poll_interval(),
            ReportMode::Active => self.conn.config().active_wait(),
        };
        self.sleep_unless_cancelled(wait);

        // Reports that piled up while sleeping are stale
        if self.mode == ReportMode::Active && !self.is_cancelled() {
            if let Err(e) = self.conn.clear_input() {
                warn!("could not clear input: {}", e);
            }
        }
    }

    fn sleep_unless_cancelled(&self, total: Duration) {
        let until = Instant::now() + total;
        loop {
            let now = Instant::now();
            if now >= until || self.is_cancelled() {
                return;
            }
            std::thread::sleep(CANCEL_CHECK_INTERVAL.min(until - now));
        }
    }
}
