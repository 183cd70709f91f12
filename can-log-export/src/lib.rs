//! CAN Log Export Library
//!
//! Turns recorded CAN traffic into time-aligned signal tables, using signal
//! definitions from DBC files, and flags integrity problems in the recording.
//!
//! # Architecture
//!
//! One export run is driven by [`LogExport`]:
//! - Frames come from a [`FrameSource`] (Vector ASC logs) and are resolved
//!   against a [`MessageCatalog`]
//! - A [`ChannelAnalyzer`] tracks declared-length mismatches per channel, to
//!   guess which channel carries the intended traffic
//! - Decoded values pass the [`AcceptanceFilter`] and are routed into signal
//!   groups, either one flat table or one table per message and multiplexor value
//! - Stream validators (checksum, multiplexor, rolling counter) observe every
//!   decoded frame and write JSON reports when they find anomalies
//!
//! The library does NOT:
//! - Correct malformed input (anomalies are detected and reported only)
//! - Talk to a live bus
//!
//! Command-line handling lives in the application layer (can-log-export-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use can_log_export::{
//!     open_log, AcceptanceFilter, ChannelSelection, ExportConfig, GroupingMode, LogExport,
//!     SignalDatabase,
//! };
//! use std::path::Path;
//!
//! // Load signal definitions
//! let mut catalog = SignalDatabase::new();
//! catalog.add_dbc(Path::new("powertrain.dbc")).unwrap();
//!
//! // Configure the run
//! let config = ExportConfig::new()
//!     .with_channel(ChannelSelection::AutoDetect)
//!     .with_grouping(GroupingMode::Tree)
//!     .with_relative_time(true);
//!
//! let mut export = LogExport::new(&catalog, AcceptanceFilter::accept_all(), config)
//!     .with_default_validators();
//!
//! // Process the log and write tables and reports
//! export.process_frames(open_log(Path::new("trace.asc")).unwrap()).unwrap();
//! export.write_outputs(Path::new("trace")).unwrap();
//! export.write_reports(Path::new(".")).unwrap();
//! ```

// Public modules
pub mod catalog;
pub mod channel;
pub mod config;
pub mod export;
pub mod filter;
pub mod formats;
pub mod groups;
pub mod output;
pub mod timestamp;
pub mod types;
pub mod validators;

// Re-export main types for convenience
pub use catalog::{DatabaseStats, DecodeError, MessageCatalog, MessageDefinition, SignalDatabase};
pub use channel::{ChannelAnalyzer, ChannelStats};
pub use config::{
    ChannelSelection, ChecksumAlgorithm, ChecksumConfig, CounterScope, ExportConfig,
    FieldNaming, GroupingMode, RollingCounterConfig, ValidatorsConfig,
};
pub use export::{ExportOutput, ExportSummary, LogExport};
pub use filter::AcceptanceFilter;
pub use formats::{open_log, FrameSource, FrameStream};
pub use groups::{FlatTable, MuxTree, SignalGroup, SignalGroupModel};
pub use output::{read_table, split_table, write_split_tables, TableData};
pub use timestamp::{FormattedTime, TimestampRecorder};
pub use types::{DecodedValues, ExportError, Frame, Result, SignalValue, Timestamp};
pub use validators::{
    ChecksumVerifier, FrameContext, MultiplexorVerifier, RollingCounterVerifier, StreamValidator,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: an empty catalog resolves nothing
        let catalog = SignalDatabase::new();
        assert_eq!(catalog.stats().num_messages, 0);
        assert!(catalog.message(0x123).is_none());
        assert!(!VERSION.is_empty());
    }
}
