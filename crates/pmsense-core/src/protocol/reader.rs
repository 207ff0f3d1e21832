//! Frame collection
//!
//! Accumulates reply bytes from a transport until a full frame has arrived
//! or a wall-clock deadline passes. Bytes that cannot start the expected
//! frame are dropped and accumulation restarts.

use std::io::ErrorKind;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{ProtocolError, SerialTransport, DEFAULT_BYTE_POLL_MS, HEAD};

/// Byte-by-byte frame accumulator
///
/// Once two bytes are buffered they must be `HEAD` followed by the expected
/// id. On a mismatch the buffer is emptied, except that a trailing `HEAD` is
/// kept because it may start the real frame.
#[derive(Debug, Clone)]
pub struct FrameAccumulator {
    buffer: Vec<u8>,
    expected_id: u8,
    target_size: usize,
    discarded: usize,
}

impl FrameAccumulator {
    /// Start an empty accumulator
    pub fn new(expected_id: u8, target_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(target_size),
            expected_id,
            target_size,
            discarded: 0,
        }
    }

    /// Feed one byte; returns true once the frame is complete
    pub fn push(&mut self, byte: u8) -> bool {
        self.buffer.push(byte);
        if self.buffer.len() >= 2 && !self.is_aligned() {
            let keep_head = self.buffer.last() == Some(&HEAD);
            self.discarded += self.buffer.len() - usize::from(keep_head);
            self.buffer.clear();
            if keep_head {
                self.buffer.push(HEAD);
            }
        }
        self.is_complete()
    }

    fn is_aligned(&self) -> bool {
        self.buffer[0] == HEAD && self.buffer[1] == self.expected_id
    }

    /// Whether the target size has been reached
    pub fn is_complete(&self) -> bool {
        self.buffer.len() >= self.target_size
    }

    /// Bytes still missing
    pub fn remaining(&self) -> usize {
        self.target_size.saturating_sub(self.buffer.len())
    }

    /// Bytes thrown away while resynchronizing
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Bytes buffered so far
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Take the buffered bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Deadline-bounded reply collector
#[derive(Debug, Clone, Copy)]
pub struct FrameReader {
    poll_interval: Duration,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_BYTE_POLL_MS))
    }
}

impl FrameReader {
    /// Create a reader that sleeps `poll_interval` while the line is idle
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Sleep between idle polls
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Collect up to `target_size` bytes of a frame carrying `expected_id`
    ///
    /// Returns whatever was accumulated when the frame completed or the
    /// deadline passed. A short result means no full frame arrived in time;
    /// that is not an error. Only hard transport failures are.
    pub fn collect<T>(
        &self,
        transport: &mut T,
        expected_id: u8,
        deadline: Duration,
        target_size: usize,
    ) -> Result<Vec<u8>, ProtocolError>
    where
        T: SerialTransport + ?Sized,
    {
        let deadline_at = Instant::now() + deadline;
        let mut acc = FrameAccumulator::new(expected_id, target_size);
        let mut chunk = vec![0u8; target_size.max(1)];

        while !acc.is_complete() {
            let now = Instant::now();
            if now >= deadline_at {
                break;
            }

            let available = transport
                .bytes_to_read()
                .map_err(|e| ProtocolError::TransportRead(e.to_string()))?
                as usize;
            if available == 0 {
                std::thread::sleep(self.poll_interval.min(deadline_at - now));
                continue;
            }

            // Never take more than the frame still needs; the rest stays
            // queued for the next exchange.
            let want = available.min(acc.remaining());
            match transport.read(&mut chunk[..want]) {
                Ok(0) => std::thread::sleep(self.poll_interval.min(deadline_at - now)),
                Ok(n) => {
                    for &byte in &chunk[..n] {
                        acc.push(byte);
                    }
                }
                Err(ref e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    std::thread::sleep(self.poll_interval.min(deadline_at - now))
                }
                Err(e) => return Err(ProtocolError::TransportRead(e.to_string())),
            }
        }

        debug!("serial packet: {:02x?}", acc.as_bytes());
        if !acc.is_complete() {
            warn!(
                "frame 0x{:02x} incomplete after {}ms: {} of {} bytes, {} discarded",
                expected_id,
                deadline.as_millis(),
                acc.as_bytes().len(),
                target_size,
                acc.discarded()
            );
        } else if acc.discarded() > 0 {
            debug!("resynchronized past {} stray bytes", acc.discarded());
        }
        Ok(acc.into_bytes())
    }
}
