//! Motor controller status byte decoding.

use std::fmt;

use serde::{Serialize, Serializer};

/// Decoded status byte reported by a motor controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Command acknowledged (`0x55`).
    Ack,
    /// Command rejected (`0xAB`).
    Err,
    /// Upper travel limit reached (`0xE1`).
    MaxLimit,
    /// Lower travel limit reached (`0xE0`).
    MinLimit,
    /// Controller finished booting (`0xEE`).
    SysRdy,
    /// Any byte outside the table.
    Unknown(u8),
}

impl StatusCode {
    /// Decode a raw status byte.
    pub const fn decode(byte: u8) -> Self {
        match byte {
            0x55 => StatusCode::Ack,
            0xAB => StatusCode::Err,
            0xE1 => StatusCode::MaxLimit,
            0xE0 => StatusCode::MinLimit,
            0xEE => StatusCode::SysRdy,
            other => StatusCode::Unknown(other),
        }
    }

    /// The raw byte this status was decoded from.
    pub const fn byte(&self) -> u8 {
        match self {
            StatusCode::Ack => 0x55,
            StatusCode::Err => 0xAB,
            StatusCode::MaxLimit => 0xE1,
            StatusCode::MinLimit => 0xE0,
            StatusCode::SysRdy => 0xEE,
            StatusCode::Unknown(b) => *b,
        }
    }

    /// Symbolic name, or `None` for unmapped bytes.
    pub const fn symbol(&self) -> Option<&'static str> {
        match self {
            StatusCode::Ack => Some("ACK"),
            StatusCode::Err => Some("ERR"),
            StatusCode::MaxLimit => Some("MAX LIMIT"),
            StatusCode::MinLimit => Some("MIN LIMIT"),
            StatusCode::SysRdy => Some("SYS RDY"),
            StatusCode::Unknown(_) => None,
        }
    }
}

impl From<u8> for StatusCode {
    fn from(byte: u8) -> Self {
        StatusCode::decode(byte)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.symbol() {
            Some(symbol) => f.write_str(symbol),
            None => write!(f, "0x{:02X}", self.byte()),
        }
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Decode a status byte into its display form.
pub fn decode(byte: u8) -> String {
    StatusCode::decode(byte).to_string()
}
