//! Protocol commands
//!
//! The fixed catalog of commands the sensor understands, with their
//! pre-tabulated wire encodings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{ProtocolError, DATA_REPORT_ID, REPLY_ID};

/// Named sensor commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandName {
    /// Switch the sensor to streaming reports
    SetActiveMode,
    /// Switch the sensor to reporting only when asked
    SetQueryMode,
    /// Ask which report mode is active
    GetReportMode,
    /// Ask for one PM2.5/PM10 reading
    QueryData,
    /// Ask for the firmware build date
    CheckFirmware,
}

impl CommandName {
    /// All command names, in catalog order
    pub const ALL: [CommandName; 5] = [
        CommandName::SetActiveMode,
        CommandName::SetQueryMode,
        CommandName::GetReportMode,
        CommandName::QueryData,
        CommandName::CheckFirmware,
    ];

    /// Wire-level name used in the catalog
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::SetActiveMode => "set_active_mode",
            CommandName::SetQueryMode => "set_query_mode",
            CommandName::GetReportMode => "get_report_mode",
            CommandName::QueryData => "query_data",
            CommandName::CheckFirmware => "check_firmware",
        }
    }

    /// Catalog entry for this command
    pub fn command(&self) -> &'static Command {
        &CATALOG[*self as usize]
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownCommand(s.to_string()))
    }
}

/// One catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// Name of the command
    pub name: CommandName,
    /// Head, command id, sub-command and mode bytes
    pub header: [u8; 5],
    /// Id byte the reply must carry
    pub response_id: u8,
    /// Checksum byte sent with the frame
    ///
    /// Tabulated, not computed from the payload.
    pub checksum: u8,
}

/// The command catalog
///
/// Indexed by `CommandName as usize`; keep the order in sync with
/// `CommandName::ALL`.
pub static CATALOG: [Command; 5] = [
    Command {
        name: CommandName::SetActiveMode,
        header: [0xAA, 0xB4, 0x02, 0x01, 0x00],
        response_id: REPLY_ID,
        checksum: 0x01,
    },
    Command {
        name: CommandName::SetQueryMode,
        header: [0xAA, 0xB4, 0x02, 0x01, 0x01],
        response_id: REPLY_ID,
        checksum: 0x02,
    },
    Command {
        name: CommandName::GetReportMode,
        header: [0xAA, 0xB4, 0x02, 0x00, 0x00],
        response_id: REPLY_ID,
        checksum: 0x00,
    },
    Command {
        name: CommandName::QueryData,
        header: [0xAA, 0xB4, 0x04, 0x00, 0x00],
        response_id: DATA_REPORT_ID,
        checksum: 0x02,
    },
    Command {
        name: CommandName::CheckFirmware,
        header: [0xAA, 0xB4, 0x07, 0x00, 0x00],
        response_id: REPLY_ID,
        checksum: 0x05,
    },
];

/// Look up a command by its wire-level name
pub fn lookup(name: &str) -> Result<&'static Command, ProtocolError> {
    name.parse::<CommandName>().map(|n| n.command())
}
