//! Export orchestration
//!
//! [`LogExport`] drives the per-frame pipeline of one run: it resolves each
//! frame against the catalog, feeds the channel analyzer and the timestamp
//! recorder, decodes the payload, notifies the stream validators and routes the
//! accepted values into the signal group model of the frame's channel. After the
//! stream ends it resolves the output channel and writes tables and reports.
//!
//! # Example
//! ```no_run
//! use can_log_export::{open_log, AcceptanceFilter, ExportConfig, LogExport, SignalDatabase};
//! use std::path::Path;
//!
//! let catalog = SignalDatabase::from_dbc(Path::new("powertrain.dbc")).unwrap();
//! let mut export = LogExport::new(&catalog, AcceptanceFilter::accept_all(), ExportConfig::new())
//!     .with_default_validators();
//!
//! export.process_frames(open_log(Path::new("trace.asc")).unwrap()).unwrap();
//! export.write_outputs(Path::new("trace")).unwrap();
//! export.write_reports(Path::new(".")).unwrap();
//! ```

use crate::catalog::{DecodeError, MessageCatalog};
use crate::channel::{ChannelAnalyzer, ChannelStats};
use crate::config::{ChannelSelection, ExportConfig};
use crate::filter::AcceptanceFilter;
use crate::groups::{new_model, SignalGroup, SignalGroupModel, TIMESTAMP_FIELD};
use crate::output;
use crate::timestamp::{TimeRange, TimestampRecorder};
use crate::types::{DecodedValues, Frame, Result};
use crate::validators::{default_validators, FrameContext, StreamValidator};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

/// What [`LogExport::write_outputs`] produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutput {
    /// No group received any row
    Nothing,
    /// A single group, written as one table
    Table(PathBuf),
    /// Several groups, one table each in `directory`, bundled into `archive`
    Archive { directory: PathBuf, archive: PathBuf },
}

/// End-of-run statistics
#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub total_frames: usize,
    /// Frames whose identifier is known to the catalog
    pub listed_frames: usize,
    /// Frames on the exported channel whose message passed the filter
    pub accepted_frames: usize,
    pub decode_failures: usize,
    pub last_decode_error: Option<String>,
    pub time_range: Option<TimeRange>,
    pub channel_selection: String,
    pub guessed_channel: Option<u8>,
    pub exported_channel: Option<u8>,
    pub channels: Vec<ChannelStats>,
    /// Validator name → anomalous frames
    pub anomalies: BTreeMap<String, usize>,
    pub routing_errors: usize,
}

impl fmt::Display for ExportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.time_range {
            Some(range) => writeln!(
                f,
                "Time range of the frames is from {} to {}",
                range.start, range.end
            )?,
            None => writeln!(f, "No frame was processed on the selected channel")?,
        }

        let guessed = self
            .guessed_channel
            .map_or_else(|| "none".to_string(), |c| c.to_string());
        writeln!(
            f,
            "Channel specified: {} / Most likely: Channel {}",
            self.channel_selection, guessed
        )?;
        writeln!(
            f,
            "Extracted {}/{} frames based on the DBC",
            self.listed_frames, self.total_frames
        )?;
        write!(f, "Accepted frame count: {}", self.accepted_frames)?;

        if let Some(error) = &self.last_decode_error {
            write!(
                f,
                "\nEncountered {} decoding error(s), last: {}",
                self.decode_failures, error
            )?;
        }
        for (validator, count) in self.anomalies.iter().filter(|(_, c)| **c > 0) {
            write!(f, "\n{}: {} anomalous frame(s)", validator, count)?;
        }
        if self.routing_errors > 0 {
            write!(f, "\nDropped {} value set(s) without a group", self.routing_errors)?;
        }
        Ok(())
    }
}

/// One export run over a stream of frames
pub struct LogExport<C: MessageCatalog> {
    catalog: C,
    filter: AcceptanceFilter,
    config: ExportConfig,
    analyzer: ChannelAnalyzer,
    timestamps: TimestampRecorder,
    validators: Vec<Box<dyn StreamValidator>>,
    /// Group model per channel, created on the channel's first accepted frame
    models: BTreeMap<u8, Box<dyn SignalGroupModel>>,
    total_frames: usize,
    listed_frames: usize,
    accepted_frames: BTreeMap<u8, usize>,
    decode_failures: usize,
    last_decode_error: Option<DecodeError>,
}

impl<C: MessageCatalog> LogExport<C> {
    /// Create a run without validators
    pub fn new(catalog: C, filter: AcceptanceFilter, config: ExportConfig) -> Self {
        Self {
            catalog,
            filter,
            timestamps: TimestampRecorder::new(config.relative_time),
            config,
            analyzer: ChannelAnalyzer::new(),
            validators: Vec::new(),
            models: BTreeMap::new(),
            total_frames: 0,
            listed_frames: 0,
            accepted_frames: BTreeMap::new(),
            decode_failures: 0,
            last_decode_error: None,
        }
    }

    /// Builder method: register a validator; validators run in registration order
    pub fn with_validator(mut self, validator: Box<dyn StreamValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Builder method: register the validators enabled by the configuration
    pub fn with_default_validators(mut self) -> Self {
        let validators = default_validators(&self.config.validators);
        self.validators.extend(validators);
        self
    }

    /// Process one frame
    pub fn process_frame(&mut self, frame: &Frame) {
        self.total_frames += 1;

        let Some(message) = self.catalog.message(frame.can_id) else {
            log::trace!("Unknown CAN ID: 0x{:X}", frame.can_id);
            return;
        };

        self.listed_frames += 1;
        self.analyzer.observe(frame, message);

        if !self.config.channel.matches(frame.channel) {
            return;
        }

        let timestamp = self.timestamps.record(frame);

        let decoded = self
            .catalog
            .decode(message, &frame.data, self.config.allow_truncated);
        let (values, error) = match decoded {
            Ok(values) => (values, None),
            Err(e) => {
                log::debug!(
                    "Failed to decode message {} (ID 0x{:X}): {}",
                    message.name,
                    frame.can_id,
                    e
                );
                self.decode_failures += 1;
                (DecodedValues::new(), Some(e))
            }
        };

        let ctx = FrameContext {
            frame,
            message,
            values: &values,
            error: error.as_ref(),
        };
        for validator in &mut self.validators {
            validator.on_frame(&ctx);
        }

        if error.is_some() {
            self.last_decode_error = error;
        }

        if !self.filter.is_accepted(message) {
            return;
        }
        *self.accepted_frames.entry(frame.channel).or_insert(0) += 1;

        let accepted = self.filter.keep_accepted(message, &values);
        let mux_value = message.selector_value(&values);
        let model = self
            .models
            .entry(frame.channel)
            .or_insert_with(|| new_model(&self.config));
        model.create_fields(message);
        model.add_field_values(message, &accepted, mux_value, self.timestamps.format(timestamp));
    }

    /// Process a stream of frames
    ///
    /// Stops early once the configured frame limit is reached. A source error
    /// ends the run and is returned; everything processed before it is kept.
    pub fn process_frames<I>(&mut self, frames: I) -> Result<()>
    where
        I: IntoIterator<Item = Result<Frame>>,
    {
        for frame in frames {
            if let Some(max_frames) = self.config.max_frames {
                if self.total_frames >= max_frames {
                    log::info!("Reached frame limit of {}, stopping", max_frames);
                    break;
                }
            }
            self.process_frame(&frame?);
        }

        for line in self.summary().to_string().lines() {
            log::info!("{}", line);
        }
        Ok(())
    }

    /// The channel whose groups are exported
    ///
    /// With automatic selection, the channel analyzer's guess; `None` if no
    /// frame was observed.
    pub fn resolve_channel(&self) -> Option<u8> {
        match self.config.channel {
            ChannelSelection::Fixed(channel) => Some(channel),
            ChannelSelection::AutoDetect => self.analyzer.guess_channel(),
        }
    }

    /// Prune the groups of the exported channel and return those with rows
    pub fn finalize(&mut self) -> Vec<&SignalGroup> {
        let Some(channel) = self.resolve_channel() else {
            return Vec::new();
        };
        let Some(model) = self.models.get_mut(&channel) else {
            return Vec::new();
        };

        for group in model.groups_mut() {
            group.prune_empty_fields();
        }
        model.groups().into_iter().filter(|g| !g.is_empty()).collect()
    }

    /// Write the exported groups next to `base_path`
    ///
    /// One group is written to `<base>.csv` with the table delimiter. Several
    /// groups are written to `<base>_groups/<group>.csv` with the group
    /// delimiter and archived into `<base>.zip`.
    pub fn write_outputs(&mut self, base_path: &Path) -> Result<ExportOutput> {
        let table_delimiter = self.config.table_delimiter;
        let group_delimiter = self.config.group_delimiter;

        if self.config.channel == ChannelSelection::AutoDetect {
            match self.resolve_channel() {
                Some(channel) => log::info!("AutoChannel selection result: Channel {}", channel),
                None => log::info!("AutoChannel selection found no channel"),
            }
        }

        let groups = self.finalize();
        match groups.as_slice() {
            [] => {
                log::info!("No signal group received any value, nothing written");
                Ok(ExportOutput::Nothing)
            }
            [group] => {
                let path = append_to_path(base_path, ".csv");
                write_group(group, &path, table_delimiter)?;
                Ok(ExportOutput::Table(path))
            }
            _ => {
                let directory = append_to_path(base_path, "_groups");
                let archive = append_to_path(base_path, ".zip");
                for group in &groups {
                    log::info!("Writing table for group {}", group.name());
                }
                let files = output::write_group_tables(&groups, &directory, group_delimiter)?;
                output::create_archive(&files, &archive)?;
                Ok(ExportOutput::Archive { directory, archive })
            }
        }
    }

    /// Write the report of every validator that found at least one anomaly
    pub fn write_reports(&self, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for validator in &self.validators {
            if let Some(path) = validator.write_report_if_any(output_dir)? {
                written.push(path);
            }
        }
        Ok(written)
    }

    /// Sorted names of every field that received a value on the exported channel
    pub fn exported_fields(&self) -> Vec<String> {
        let fields: BTreeSet<String> = self
            .groups()
            .into_iter()
            .flat_map(|group| {
                group
                    .fieldnames()
                    .iter()
                    .filter(|f| f.as_str() != TIMESTAMP_FIELD && group.field_count(f) > 0)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        fields.into_iter().collect()
    }

    /// Write [`exported_fields`](Self::exported_fields) as a JSON array
    pub fn write_field_catalog(&self, path: &Path) -> Result<()> {
        output::write_field_catalog(&self.exported_fields(), path)
    }

    /// Statistics of the run so far
    pub fn summary(&self) -> ExportSummary {
        let exported_channel = self.resolve_channel();
        ExportSummary {
            total_frames: self.total_frames,
            listed_frames: self.listed_frames,
            accepted_frames: self.accepted_frame_count(),
            decode_failures: self.decode_failures,
            last_decode_error: self.last_decode_error.as_ref().map(ToString::to_string),
            time_range: self.timestamps.range(),
            channel_selection: self.config.channel.to_string(),
            guessed_channel: self.analyzer.guess_channel(),
            exported_channel,
            channels: self.analyzer.channels().to_vec(),
            anomalies: self
                .validators
                .iter()
                .map(|v| (v.name().to_string(), v.anomaly_count()))
                .collect(),
            routing_errors: exported_channel
                .and_then(|c| self.models.get(&c))
                .map_or(0, |model| model.routing_errors()),
        }
    }

    /// Groups of the exported channel, unpruned
    pub fn groups(&self) -> Vec<&SignalGroup> {
        self.resolve_channel()
            .and_then(|channel| self.models.get(&channel))
            .map_or_else(Vec::new, |model| model.groups())
    }

    pub fn total_frame_count(&self) -> usize {
        self.total_frames
    }

    pub fn listed_frame_count(&self) -> usize {
        self.listed_frames
    }

    /// Accepted frames of the exported channel
    pub fn accepted_frame_count(&self) -> usize {
        self.resolve_channel()
            .and_then(|channel| self.accepted_frames.get(&channel))
            .copied()
            .unwrap_or(0)
    }

    pub fn decode_failure_count(&self) -> usize {
        self.decode_failures
    }

    pub fn last_decode_error(&self) -> Option<&DecodeError> {
        self.last_decode_error.as_ref()
    }

    pub fn channel_analyzer(&self) -> &ChannelAnalyzer {
        &self.analyzer
    }

    pub fn timestamps(&self) -> &TimestampRecorder {
        &self.timestamps
    }

    pub fn validators(&self) -> &[Box<dyn StreamValidator>] {
        &self.validators
    }
}

fn write_group(group: &SignalGroup, path: &Path, delimiter: char) -> Result<()> {
    log::info!("Writing table for group {} to {:?}", group.name(), path);
    output::write_table(group, path, delimiter)
}

/// `trace` + `.csv` → `trace.csv`, keeping any existing extension-like suffix
fn append_to_path(base: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(base.as_os_str());
    path.push(suffix);
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{
        ByteOrder, LayoutElement, MessageDefinition, MultiplexedGroup, SignalDatabase,
        SignalDefinition, SignalDescriptor, ValueType,
    };
    use crate::config::GroupingMode;
    use crate::types::SignalValue;

    fn signal(
        name: &str,
        start_bit: u16,
        unit: Option<&str>,
        mux: Option<u64>,
    ) -> SignalDefinition {
        SignalDefinition {
            name: name.to_string(),
            start_bit,
            length: 8,
            byte_order: ByteOrder::LittleEndian,
            value_type: ValueType::Unsigned,
            factor: 1.0,
            offset: 0.0,
            unit: unit.map(str::to_string),
            multiplexer_value: mux,
        }
    }

    /// `Status` (0x100): NCounter, Speed [km/h]; `Muxed` (0x200): Mode selecting A or B
    fn catalog() -> SignalDatabase {
        let mut db = SignalDatabase::new();
        db.add_message(MessageDefinition {
            id: 0x100,
            name: "Status".to_string(),
            size: 2,
            sender: None,
            signals: vec![
                signal("NCounter", 0, None, None),
                signal("Speed", 8, Some("km/h"), None),
            ],
            layout: vec![
                LayoutElement::Plain(SignalDescriptor::new("NCounter", None)),
                LayoutElement::Plain(SignalDescriptor::new("Speed", Some("km/h"))),
            ],
            source: "test.dbc".to_string(),
        });

        let mut branches = BTreeMap::new();
        branches.insert(1, vec![SignalDescriptor::new("A", None)]);
        branches.insert(2, vec![SignalDescriptor::new("B", None)]);
        db.add_message(MessageDefinition {
            id: 0x200,
            name: "Muxed".to_string(),
            size: 2,
            sender: None,
            signals: vec![
                signal("Mode", 0, None, None),
                signal("A", 8, None, Some(1)),
                signal("B", 8, None, Some(2)),
            ],
            layout: vec![LayoutElement::Multiplexed(MultiplexedGroup {
                selector: SignalDescriptor::new("Mode", None),
                branches,
            })],
            source: "test.dbc".to_string(),
        });
        db
    }

    fn frame(millis: u64, channel: u8, can_id: u32, data: &[u8]) -> Frame {
        Frame::new(1_700_000_000_000_000_000 + millis * 1_000_000, channel, can_id, data.to_vec())
    }

    #[test]
    fn test_counters_and_routing() {
        let db = catalog();
        let mut export = LogExport::new(&db, AcceptanceFilter::accept_all(), ExportConfig::new())
            .with_default_validators();

        export.process_frame(&frame(0, 0, 0x100, &[1, 50]));
        export.process_frame(&frame(1, 0, 0x7FF, &[0]));
        export.process_frame(&frame(2, 1, 0x100, &[2, 60]));
        export.process_frame(&frame(3, 0, 0x200, &[1, 9]));

        assert_eq!(export.total_frame_count(), 4);
        assert_eq!(export.listed_frame_count(), 3);
        assert_eq!(export.accepted_frame_count(), 2);
        assert_eq!(export.decode_failure_count(), 0);

        let groups = export.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].rows().len(), 2);
        assert_eq!(export.exported_fields(), ["A", "Mode", "NCounter", "Speed"]);
    }

    #[test]
    fn test_decode_failure_reaches_validators() {
        let db = catalog();
        let mut export = LogExport::new(&db, AcceptanceFilter::accept_all(), ExportConfig::new())
            .with_default_validators();

        export.process_frame(&frame(0, 0, 0x200, &[7, 0]));

        assert_eq!(export.decode_failure_count(), 1);
        assert_eq!(
            export.last_decode_error().map(ToString::to_string).as_deref(),
            Some("expected multiplexer id 1 or 2, but got 7")
        );
        let anomalies = export.summary().anomalies;
        assert_eq!(anomalies["Multiplexor verification"], 1);
        assert_eq!(anomalies["Rolling counter verification"], 0);
    }

    #[test]
    fn test_validators_ignore_the_filter() {
        let db = catalog();
        let filter = AcceptanceFilter::new().fully_accept("Muxed");
        let mut export = LogExport::new(&db, filter, ExportConfig::new()).with_default_validators();

        for millis in 0..3 {
            export.process_frame(&frame(millis, 0, 0x100, &[4, 0]));
        }

        assert_eq!(export.accepted_frame_count(), 0);
        assert_eq!(export.summary().anomalies["Rolling counter verification"], 2);
        assert!(export.groups().is_empty());
    }

    #[test]
    fn test_auto_channel_exports_guessed_channel() {
        let db = catalog();
        let config = ExportConfig::new().with_channel(ChannelSelection::AutoDetect);
        let mut export = LogExport::new(&db, AcceptanceFilter::accept_all(), config);

        // Channel 0 carries frames shorter than declared
        export.process_frame(&frame(0, 0, 0x100, &[1]));
        export.process_frame(&frame(1, 2, 0x100, &[1, 10]));
        export.process_frame(&frame(2, 2, 0x100, &[2, 20]));

        assert_eq!(export.resolve_channel(), Some(2));
        assert_eq!(export.accepted_frame_count(), 2);

        let summary = export.summary();
        assert_eq!(summary.channel_selection, "auto");
        assert_eq!(summary.exported_channel, Some(2));
        assert_eq!(summary.channels.len(), 2);
    }

    #[test]
    fn test_tree_outputs_archive() {
        let dir = tempfile::tempdir().unwrap();
        let db = catalog();
        let config = ExportConfig::new()
            .with_grouping(GroupingMode::Tree)
            .with_relative_time(true);
        let mut export = LogExport::new(&db, AcceptanceFilter::accept_all(), config);

        export.process_frame(&frame(0, 0, 0x100, &[1, 50]));
        export.process_frame(&frame(500, 0, 0x200, &[2, 8]));

        let base = dir.path().join("trace");
        let output = export.write_outputs(&base).unwrap();

        // Muxed.Mux1 never received a row and is left out
        let directory = dir.path().join("trace_groups");
        let archive = dir.path().join("trace.zip");
        assert_eq!(
            output,
            ExportOutput::Archive {
                directory: directory.clone(),
                archive: archive.clone(),
            }
        );
        assert!(directory.join("Status.csv").exists());
        assert!(directory.join("Muxed.csv").exists());
        assert!(directory.join("Muxed.Mux2.csv").exists());
        assert!(!directory.join("Muxed.Mux1.csv").exists());
        assert!(archive.exists());

        let table = output::read_table(&directory.join("Muxed.Mux2.csv"), ',').unwrap();
        assert_eq!(table.fieldnames, ["timestamp", "B"]);
        assert_eq!(table.rows, vec![vec!["0.500000".to_string(), "8".to_string()]]);
    }

    #[test]
    fn test_tree_routes_branch_when_selector_is_filtered_out() {
        let db = catalog();
        let filter = AcceptanceFilter::new().partly_accept("Muxed", ["A"]);
        let config = ExportConfig::new().with_grouping(GroupingMode::Tree);
        let mut export = LogExport::new(&db, filter, config);

        export.process_frame(&frame(0, 0, 0x200, &[1, 42]));

        let groups = export.groups();
        let rows: Vec<(&str, usize)> = groups.iter().map(|g| (g.name(), g.rows().len())).collect();
        assert_eq!(rows, vec![("Muxed", 0), ("Muxed.Mux1", 1), ("Muxed.Mux2", 0)]);
        assert_eq!(groups[1].rows()[0].values.get("A"), Some(&SignalValue::Integer(42)));
        assert_eq!(export.summary().routing_errors, 0);
    }

    #[test]
    fn test_single_group_output_and_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let db = catalog();
        let filter = AcceptanceFilter::new().partly_accept("Status", ["Speed"]);
        let mut export = LogExport::new(&db, filter, ExportConfig::new());

        export.process_frame(&frame(0, 0, 0x100, &[1, 50]));

        let base = dir.path().join("trace");
        let output = export.write_outputs(&base).unwrap();
        assert_eq!(output, ExportOutput::Table(dir.path().join("trace.csv")));

        let table = output::read_table(&dir.path().join("trace.csv"), ';').unwrap();
        assert_eq!(table.fieldnames, ["timestamp", "Speed"]);
        assert_eq!(table.units, Some(vec![String::new(), "km/h".to_string()]));
        assert_eq!(table.rows[0][0], "2023-11-14 22:13:20.000000");
        assert_eq!(table.rows[0][1], SignalValue::Integer(50).to_string());
    }

    #[test]
    fn test_nothing_written_without_groups() {
        let dir = tempfile::tempdir().unwrap();
        let db = catalog();
        let mut export = LogExport::new(&db, AcceptanceFilter::new(), ExportConfig::new());
        export.process_frame(&frame(0, 0, 0x100, &[1, 50]));

        let output = export.write_outputs(&dir.path().join("trace")).unwrap();
        assert_eq!(output, ExportOutput::Nothing);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_frame_limit() {
        let db = catalog();
        let config = ExportConfig::new().with_max_frames(2);
        let mut export = LogExport::new(&db, AcceptanceFilter::accept_all(), config);

        let frames = (0..5).map(|millis| Ok(frame(millis, 0, 0x100, &[millis as u8, 0])));
        export.process_frames(frames).unwrap();
        assert_eq!(export.total_frame_count(), 2);
    }

    #[test]
    fn test_source_error_is_propagated() {
        let db = catalog();
        let mut export = LogExport::new(&db, AcceptanceFilter::accept_all(), ExportConfig::new());

        let frames = vec![
            Ok(frame(0, 0, 0x100, &[1, 0])),
            Err(crate::types::ExportError::LogParseError("broken".to_string())),
            Ok(frame(2, 0, 0x100, &[2, 0])),
        ];
        assert!(export.process_frames(frames).is_err());
        assert_eq!(export.total_frame_count(), 1);
    }

    #[test]
    fn test_append_to_path() {
        assert_eq!(
            append_to_path(Path::new("out/trace.asc"), ".csv"),
            PathBuf::from("out/trace.asc.csv")
        );
        assert_eq!(
            append_to_path(Path::new("trace"), "_groups"),
            PathBuf::from("trace_groups")
        );
    }
}
