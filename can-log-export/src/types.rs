//! Core types for the CAN log export library
//!
//! This module defines the frame representation consumed by the export pipeline,
//! the decoded signal values it accumulates, and the error types shared by all
//! modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Timestamp type used throughout the library
pub type Timestamp = DateTime<Utc>;

/// Result type for export operations
pub type Result<T> = std::result::Result<T, ExportError>;

/// Decoded signal values of a single frame, keyed by signal name
pub type DecodedValues = HashMap<String, SignalValue>;

/// Raw CAN frame from a log file
///
/// Frames are produced once by a frame source and consumed once by the export
/// pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Timestamp in nanoseconds since epoch
    pub timestamp_ns: u64,
    /// CAN channel number (0-based)
    pub channel: u8,
    /// CAN message ID (11-bit or 29-bit)
    pub can_id: u32,
    /// Data length as declared by the frame (may differ from `data.len()`)
    pub dlc: usize,
    /// Frame data bytes (0-8 bytes for classic CAN, up to 64 for CAN-FD)
    pub data: Vec<u8>,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
    /// True if this is a CAN-FD frame
    pub is_fd: bool,
}

impl Frame {
    /// Create a classic CAN frame whose declared length matches its payload
    pub fn new(timestamp_ns: u64, channel: u8, can_id: u32, data: Vec<u8>) -> Self {
        Self {
            timestamp_ns,
            channel,
            can_id,
            dlc: data.len(),
            data,
            is_extended: can_id > 0x7FF,
            is_fd: false,
        }
    }

    /// Create a frame from a timestamp expressed in seconds since epoch
    pub fn from_secs(secs: f64, channel: u8, can_id: u32, data: Vec<u8>) -> Self {
        let timestamp_ns = if secs.is_finite() && secs > 0.0 {
            let whole = secs.trunc() as u64;
            let nanos = (secs.fract() * 1_000_000_000.0).round() as u64;
            whole * 1_000_000_000 + nanos
        } else {
            0
        };
        Self::new(timestamp_ns, channel, can_id, data)
    }

    /// Builder method: override the declared data length
    pub fn with_dlc(mut self, dlc: usize) -> Self {
        self.dlc = dlc;
        self
    }

    /// Convert timestamp from nanoseconds to DateTime<Utc>
    pub fn timestamp(&self) -> Timestamp {
        let secs = (self.timestamp_ns / 1_000_000_000) as i64;
        let nsecs = (self.timestamp_ns % 1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nsecs).unwrap_or_default()
    }
}

/// Errors that can occur while loading inputs or writing outputs
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Failed to parse log file: {0}")]
    LogParseError(String),

    #[error("Failed to parse DBC file: {0}")]
    DbcParseError(String),

    #[error("Invalid signal definition: {0}")]
    InvalidSignalDefinition(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to write report: {0}")]
    ReportError(#[from] serde_json::Error),

    #[error("Failed to create archive: {0}")]
    ArchiveError(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Signal value types produced by payload decoding
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    /// Signed integer value
    Integer(i64),
    /// Floating-point value (after scaling/offset)
    Float(f64),
    /// Boolean value (single bit, no scaling)
    Boolean(bool),
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalValue::Integer(v) => write!(f, "{}", v),
            SignalValue::Float(v) => write!(f, "{}", v),
            SignalValue::Boolean(v) => write!(f, "{}", if *v { 1 } else { 0 }),
        }
    }
}

impl SignalValue {
    /// Convert signal value to f64
    pub fn as_f64(&self) -> f64 {
        match self {
            SignalValue::Integer(v) => *v as f64,
            SignalValue::Float(v) => *v,
            SignalValue::Boolean(v) => if *v { 1.0 } else { 0.0 },
        }
    }

    /// Convert signal value to i64 if possible
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SignalValue::Integer(v) => Some(*v),
            SignalValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            SignalValue::Float(_) => None,
            SignalValue::Boolean(v) => Some(if *v { 1 } else { 0 }),
        }
    }

    /// Interpret the value as a multiplexer selector value
    pub fn as_selector(&self) -> Option<u64> {
        self.as_i64().and_then(|v| u64::try_from(v).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_value_conversions() {
        let int_val = SignalValue::Integer(42);
        assert_eq!(int_val.as_f64(), 42.0);
        assert_eq!(int_val.as_i64(), Some(42));
        assert_eq!(int_val.as_selector(), Some(42));

        let float_val = SignalValue::Float(3.5);
        assert_eq!(float_val.as_f64(), 3.5);
        assert_eq!(float_val.as_i64(), None);
        assert_eq!(SignalValue::Float(3.0).as_i64(), Some(3));

        let bool_val = SignalValue::Boolean(true);
        assert_eq!(bool_val.as_f64(), 1.0);
        assert_eq!(bool_val.as_selector(), Some(1));

        assert_eq!(SignalValue::Integer(-1).as_selector(), None);
    }

    #[test]
    fn test_signal_value_display() {
        assert_eq!(format!("{}", SignalValue::Integer(42)), "42");
        assert_eq!(format!("{}", SignalValue::Float(3.14159)), "3.14159");
        assert_eq!(format!("{}", SignalValue::Boolean(true)), "1");
    }

    #[test]
    fn test_frame_timestamp_from_secs() {
        let frame = Frame::from_secs(1_700_000_000.25, 0, 0x123, vec![0; 8]);
        assert_eq!(frame.timestamp_ns, 1_700_000_000_250_000_000);
        assert_eq!(frame.timestamp().timestamp(), 1_700_000_000);
        assert_eq!(frame.timestamp().timestamp_subsec_millis(), 250);
        assert_eq!(frame.dlc, 8);
        assert!(!frame.is_extended);
    }

    #[test]
    fn test_frame_declared_length_override() {
        let frame = Frame::new(0, 1, 0x18FEF100, vec![1, 2]).with_dlc(8);
        assert_eq!(frame.dlc, 8);
        assert_eq!(frame.data.len(), 2);
        assert!(frame.is_extended);
    }
}
