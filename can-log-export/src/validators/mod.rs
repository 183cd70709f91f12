//! Stream validators
//!
//! Validators observe every decoded frame of the exported channel, before the
//! acceptance filter is applied, and accumulate integrity statistics. They never
//! fail a run: anomalies are only counted and reported at the end.

mod checksum;
mod multiplexor;
mod rolling_counter;

pub use checksum::ChecksumVerifier;
pub use multiplexor::MultiplexorVerifier;
pub use rolling_counter::RollingCounterVerifier;

use crate::catalog::{DecodeError, MessageDefinition};
use crate::config::ValidatorsConfig;
use crate::types::{DecodedValues, Frame, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Everything a validator may inspect about one frame
#[derive(Debug, Clone, Copy)]
pub struct FrameContext<'a> {
    pub frame: &'a Frame,
    pub message: &'a MessageDefinition,
    /// Decoded values; empty if decoding failed
    pub values: &'a DecodedValues,
    /// Decode failure of this frame, if any
    pub error: Option<&'a DecodeError>,
}

/// An observer of decoded frames that reports integrity anomalies
pub trait StreamValidator {
    /// Short human-readable name, used in diagnostics
    fn name(&self) -> &'static str;

    /// Inspect one frame
    fn on_frame(&mut self, ctx: &FrameContext<'_>);

    /// Number of frames found anomalous so far
    fn anomaly_count(&self) -> usize;

    /// File name of the JSON report
    fn report_file_name(&self) -> &str;

    /// Report document: an array of per-message entries
    fn report(&self) -> serde_json::Result<serde_json::Value>;

    /// Write the report into `output_dir` if at least one anomaly was found
    fn write_report_if_any(&self, output_dir: &Path) -> Result<Option<PathBuf>> {
        let count = self.anomaly_count();
        if count == 0 {
            return Ok(None);
        }

        log::warn!("{}: detected {} anomalous frame(s)", self.name(), count);

        let path = output_dir.join(self.report_file_name());
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, &self.report()?)?;
        writer.flush()?;

        log::info!("{} report written to: {:?}", self.name(), path);
        Ok(Some(path))
    }
}

/// Build the validators enabled by the configuration, in registration order
pub fn default_validators(config: &ValidatorsConfig) -> Vec<Box<dyn StreamValidator>> {
    let mut validators: Vec<Box<dyn StreamValidator>> = Vec::new();

    if let Some(checksum) = &config.checksum {
        validators.push(Box::new(ChecksumVerifier::new(checksum.clone())));
    }
    if config.multiplexor {
        validators.push(Box::new(MultiplexorVerifier::new()));
    }
    if let Some(counter) = &config.rolling_counter {
        validators.push(Box::new(RollingCounterVerifier::new(counter.clone())));
    }

    validators
}
