//! Frame timestamp tracking
//!
//! Frames may arrive out of timestamp order; the recorder keeps the true
//! extremes so relative timestamps are measured from the earliest frame.

use crate::types::{Frame, Timestamp};
use chrono::TimeDelta;
use serde::Serialize;
use std::fmt;

/// A timestamp as written to an exported table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FormattedTime {
    /// Absolute point in time (UTC)
    Absolute(Timestamp),
    /// Time elapsed since the earliest recorded frame
    Relative(TimeDelta),
}

impl fmt::Display for FormattedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormattedTime::Absolute(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.6f")),
            FormattedTime::Relative(delta) => {
                let micros = delta.num_microseconds().unwrap_or(i64::MAX);
                let sign = if micros < 0 { "-" } else { "" };
                let micros = micros.unsigned_abs();
                write!(f, "{}{}.{:06}", sign, micros / 1_000_000, micros % 1_000_000)
            }
        }
    }
}

/// Observed time range of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

/// Tracks the minimum and maximum frame time of a run
#[derive(Debug, Clone, Default)]
pub struct TimestampRecorder {
    min: Option<Timestamp>,
    max: Option<Timestamp>,
    relative: bool,
}

impl TimestampRecorder {
    pub fn new(relative: bool) -> Self {
        Self {
            min: None,
            max: None,
            relative,
        }
    }

    /// Record a frame's time and return it as an absolute timestamp
    pub fn record(&mut self, frame: &Frame) -> Timestamp {
        let timestamp = frame.timestamp();
        if self.min.map_or(true, |min| timestamp < min) {
            self.min = Some(timestamp);
        }
        if self.max.map_or(true, |max| timestamp > max) {
            self.max = Some(timestamp);
        }
        timestamp
    }

    /// Render a recorded timestamp as absolute or relative time
    ///
    /// Relative times are measured from the earliest frame recorded so far.
    pub fn format(&self, timestamp: Timestamp) -> FormattedTime {
        match (self.relative, self.min) {
            (true, Some(min)) => FormattedTime::Relative(timestamp - min),
            (true, None) => FormattedTime::Relative(TimeDelta::zero()),
            (false, _) => FormattedTime::Absolute(timestamp),
        }
    }

    pub fn min(&self) -> Option<Timestamp> {
        self.min
    }

    pub fn max(&self) -> Option<Timestamp> {
        self.max
    }

    /// Time range covered by the recorded frames, if any
    pub fn range(&self) -> Option<TimeRange> {
        Some(TimeRange {
            start: self.min?,
            end: self.max?,
        })
    }
}
