//! # pmsense core library
//!
//! Command/response protocol engine for SDS011-class laser particulate
//! sensors on a serial line.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - The fixed command catalog and 19-byte command frame encoding
//! - Deadline-bounded, resynchronizing reply collection
//! - Decoding of firmware date, report mode and PM2.5/PM10 replies
//! - Single poll cycles and continuous query/active acquisition
//! - A simulated sensor for running without hardware
//!
//! ## Example
//!
//! ```rust,no_run
//! use pmsense_core::prelude::*;
//!
//! let mut conn = Connection::new(SensorConfig::for_port("/dev/ttyUSB0"));
//! conn.open()?;
//! conn.warm_up();
//! conn.set_query_mode()?;
//! if let Some(reading) = conn.query_data()? {
//!     println!("{}", reading);
//! }
//! # Ok::<(), ProtocolError>(())
//! ```

pub mod config;
pub mod poll;
pub mod protocol;
pub mod simulator;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ReportMode, SensorConfig};
    pub use crate::poll::{Outcome, PollCycle, PollState, PollStats, Poller, Sample};
    pub use crate::protocol::{
        CommandName, Connection, ConnectionState, FirmwareDate, ModeState, ParsedReading,
        ProtocolError, SerialTransport,
    };
    pub use crate::simulator::SimulatedSensor;
}
