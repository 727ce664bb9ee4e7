//! ---
//! uev_section: "02-messaging-wire-protocol"
//! uev_subsection: "module"
//! uev_type: "source"
//! uev_scope: "code"
//! uev_description: "Digital line identifiers and levels."
//! uev_version: "v0.1.0"
//! uev_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

/// Zero-based digital I/O line identifier.
///
/// The soft channel carries the value unchanged; the real channel expects
/// 1-based numbering, so line 255 goes out as `256` there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineNumber(u8);

impl LineNumber {
    /// Wrap a zero-based line.
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// Zero-based line.
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Byte placed at offset 9 of a TTL frame.
    pub const fn soft_wire(self) -> u8 {
        self.0
    }

    /// Number written into `TTL Line=<n>` on the real channel.
    pub const fn real_wire(self) -> u16 {
        self.0 as u16 + 1
    }
}

impl From<u8> for LineNumber {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl fmt::Display for LineNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical level of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "bool", into = "bool")]
pub enum LineState {
    /// Line off, `0` on the wire.
    Low,
    /// Line on, `1` on the wire.
    High,
}

impl LineState {
    /// Byte placed at offset 10 of a TTL frame and in `State=<n>`.
    pub const fn wire(self) -> u8 {
        match self {
            LineState::Low => 0,
            LineState::High => 1,
        }
    }

    /// Any nonzero byte reads as `High`.
    pub const fn from_wire(byte: u8) -> Self {
        if byte == 0 {
            LineState::Low
        } else {
            LineState::High
        }
    }

    /// Whether the line is on.
    pub const fn is_high(self) -> bool {
        matches!(self, LineState::High)
    }

    /// The opposite level.
    pub const fn toggled(self) -> Self {
        match self {
            LineState::Low => LineState::High,
            LineState::High => LineState::Low,
        }
    }
}

impl From<bool> for LineState {
    fn from(value: bool) -> Self {
        if value {
            LineState::High
        } else {
            LineState::Low
        }
    }
}

impl From<LineState> for bool {
    fn from(value: LineState) -> Self {
        value.is_high()
    }
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_wire_is_one_based_and_widened() {
        assert_eq!(LineNumber::new(0).real_wire(), 1);
        assert_eq!(LineNumber::new(3).real_wire(), 4);
        assert_eq!(LineNumber::new(255).real_wire(), 256);
        assert_eq!(LineNumber::new(3).soft_wire(), 3);
    }

    #[test]
    fn state_wire_and_display() {
        assert_eq!(LineState::High.wire(), 1);
        assert_eq!(LineState::Low.to_string(), "0");
        assert_eq!(LineState::from_wire(7), LineState::High);
        assert_eq!(LineState::from(false), LineState::Low);
        assert_eq!(LineState::Low.toggled(), LineState::High);
    }

    #[test]
    fn state_serializes_as_bool() {
        let json = serde_json::to_string(&LineState::High).expect("serialize");
        assert_eq!(json, "true");
        let state: LineState = serde_json::from_str("false").expect("deserialize");
        assert_eq!(state, LineState::Low);
    }
}
