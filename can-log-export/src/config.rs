//! Export configuration types
//!
//! This module defines the configuration of an export run: which channel is
//! exported, how signals are grouped into tables, how timestamps and field
//! names are rendered, and which stream validators observe the frames.

use crate::types::ExportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Configuration for an export run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Channel whose frames are exported
    #[serde(default)]
    pub channel: ChannelSelection,

    /// Grouping strategy for the exported tables
    #[serde(default)]
    pub grouping: GroupingMode,

    /// Fill fields missing from a row with the previous row's values (table grouping only)
    #[serde(default)]
    pub sample_and_hold: bool,

    /// Write timestamps relative to the earliest frame instead of absolute
    #[serde(default)]
    pub relative_time: bool,

    /// Decode payloads shorter than the declared message size as far as they go
    #[serde(default)]
    pub allow_truncated: bool,

    /// How signal names become field (column) names
    #[serde(default)]
    pub naming: FieldNaming,

    /// Delimiter of the primary (single group) table
    #[serde(default = "default_table_delimiter")]
    pub table_delimiter: char,

    /// Delimiter of the per-group tables placed in the archive
    #[serde(default = "default_group_delimiter")]
    pub group_delimiter: char,

    /// Optional: stop after this many frames
    #[serde(default)]
    pub max_frames: Option<usize>,

    /// Stream validators to register
    #[serde(default)]
    pub validators: ValidatorsConfig,
}

fn default_table_delimiter() -> char {
    ';'
}

fn default_group_delimiter() -> char {
    ','
}

fn default_true() -> bool {
    true
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            channel: ChannelSelection::default(),
            grouping: GroupingMode::default(),
            sample_and_hold: false,
            relative_time: false,
            allow_truncated: false,
            naming: FieldNaming::default(),
            table_delimiter: default_table_delimiter(),
            group_delimiter: default_group_delimiter(),
            max_frames: None,
            validators: ValidatorsConfig::default(),
        }
    }
}

impl ExportConfig {
    /// Create a new export configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: select the exported channel
    pub fn with_channel(mut self, channel: ChannelSelection) -> Self {
        self.channel = channel;
        self
    }

    /// Builder method: select the grouping strategy
    pub fn with_grouping(mut self, grouping: GroupingMode) -> Self {
        self.grouping = grouping;
        self
    }

    /// Builder method: enable or disable sample-and-hold
    pub fn with_sample_and_hold(mut self, enabled: bool) -> Self {
        self.sample_and_hold = enabled;
        self
    }

    /// Builder method: enable or disable relative timestamps
    pub fn with_relative_time(mut self, enabled: bool) -> Self {
        self.relative_time = enabled;
        self
    }

    /// Builder method: enable or disable decoding of truncated payloads
    pub fn with_allow_truncated(mut self, enabled: bool) -> Self {
        self.allow_truncated = enabled;
        self
    }

    /// Builder method: set the field naming style
    pub fn with_naming(mut self, naming: FieldNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Builder method: limit the number of processed frames
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = Some(max_frames);
        self
    }

    /// Builder method: set the validator configuration
    pub fn with_validators(mut self, validators: ValidatorsConfig) -> Self {
        self.validators = validators;
        self
    }
}

/// Which channel's frames are exported
///
/// `AutoDetect` is resolved once, after the whole log has been processed,
/// through the channel analyzer's guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChannelRepr", into = "ChannelRepr")]
pub enum ChannelSelection {
    Fixed(u8),
    AutoDetect,
}

impl Default for ChannelSelection {
    fn default() -> Self {
        ChannelSelection::Fixed(0)
    }
}

impl ChannelSelection {
    /// True if frames of `channel` must be processed during the run
    pub fn matches(&self, channel: u8) -> bool {
        match self {
            ChannelSelection::Fixed(target) => *target == channel,
            ChannelSelection::AutoDetect => true,
        }
    }
}

impl fmt::Display for ChannelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelSelection::Fixed(channel) => write!(f, "{}", channel),
            ChannelSelection::AutoDetect => write!(f, "auto"),
        }
    }
}

impl FromStr for ChannelSelection {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(ChannelSelection::AutoDetect);
        }
        s.parse::<u8>()
            .map(ChannelSelection::Fixed)
            .map_err(|_| ExportError::InvalidConfig(format!("Invalid channel: '{}'", s)))
    }
}

/// Serialized form of a channel selection: a number or "auto"
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ChannelRepr {
    Number(u8),
    Name(String),
}

impl TryFrom<ChannelRepr> for ChannelSelection {
    type Error = ExportError;

    fn try_from(repr: ChannelRepr) -> Result<Self, Self::Error> {
        match repr {
            ChannelRepr::Number(channel) => Ok(ChannelSelection::Fixed(channel)),
            ChannelRepr::Name(name) => name.parse(),
        }
    }
}

impl From<ChannelSelection> for ChannelRepr {
    fn from(selection: ChannelSelection) -> Self {
        match selection {
            ChannelSelection::Fixed(channel) => ChannelRepr::Number(channel),
            ChannelSelection::AutoDetect => ChannelRepr::Name("auto".to_string()),
        }
    }
}

/// Grouping strategy of the signal group model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingMode {
    /// A single table holding every field
    #[default]
    Table,
    /// One table per message, plus one per multiplexor value
    Tree,
}

/// How a (message, signal) pair is turned into a field name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "style")]
pub enum FieldNaming {
    /// The signal name as-is
    #[default]
    Signal,
    /// `"{message}::{signal}"`, with an optional prefix removed from the message name
    Qualified {
        #[serde(default)]
        strip_prefix: Option<String>,
    },
}

impl FieldNaming {
    /// Field name of a signal in a message
    pub fn field_name(&self, message_name: &str, signal_name: &str) -> String {
        match self {
            FieldNaming::Signal => signal_name.to_string(),
            FieldNaming::Qualified { strip_prefix } => {
                let message_name = strip_prefix
                    .as_deref()
                    .and_then(|prefix| message_name.strip_prefix(prefix))
                    .unwrap_or(message_name);
                format!("{}::{}", message_name, signal_name)
            }
        }
    }
}

/// Which stream validators are registered, and how they are set up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorsConfig {
    /// Detect frames carrying an undeclared multiplexor value
    #[serde(default = "default_true")]
    pub multiplexor: bool,

    /// Detect rolling counters that fail to advance
    #[serde(default = "default_rolling_counter")]
    pub rolling_counter: Option<RollingCounterConfig>,

    /// Recompute and compare frame checksums
    #[serde(default)]
    pub checksum: Option<ChecksumConfig>,
}

fn default_rolling_counter() -> Option<RollingCounterConfig> {
    Some(RollingCounterConfig::default())
}

impl Default for ValidatorsConfig {
    fn default() -> Self {
        Self {
            multiplexor: true,
            rolling_counter: default_rolling_counter(),
            checksum: None,
        }
    }
}

/// Rolling counter validator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingCounterConfig {
    /// Name of the counter signal
    #[serde(default = "default_counter_signal")]
    pub signal: String,

    /// Whether one tracker is shared by all messages or kept per message
    #[serde(default)]
    pub scope: CounterScope,
}

fn default_counter_signal() -> String {
    "NCounter".to_string()
}

impl Default for RollingCounterConfig {
    fn default() -> Self {
        Self {
            signal: default_counter_signal(),
            scope: CounterScope::default(),
        }
    }
}

/// Scope of the rolling counter state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterScope {
    /// A single tracker for every message and channel
    #[default]
    Global,
    /// One tracker per (channel, message)
    PerMessage,
}

/// Checksum validator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumConfig {
    /// Name of the checksum signal
    #[serde(default = "default_checksum_signal")]
    pub signal: String,

    /// Algorithm used to recompute the checksum
    #[serde(default)]
    pub algorithm: ChecksumAlgorithm,
}

fn default_checksum_signal() -> String {
    "Checksum".to_string()
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            signal: default_checksum_signal(),
            algorithm: ChecksumAlgorithm::default(),
        }
    }
}

/// Checksum algorithms, computed over the payload bytes not holding the checksum
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumAlgorithm {
    /// XOR of all bytes
    #[default]
    Xor,
    /// Sum of all bytes, modulo 256
    Sum,
    /// CRC-8 SAE J1850 (poly 0x1D, init 0xFF, final XOR 0xFF)
    Crc8SaeJ1850,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_config_builder() {
        let config = ExportConfig::new()
            .with_channel(ChannelSelection::AutoDetect)
            .with_grouping(GroupingMode::Tree)
            .with_sample_and_hold(true)
            .with_relative_time(true)
            .with_allow_truncated(true)
            .with_max_frames(100);

        assert_eq!(config.channel, ChannelSelection::AutoDetect);
        assert_eq!(config.grouping, GroupingMode::Tree);
        assert!(config.sample_and_hold);
        assert!(config.relative_time);
        assert!(config.allow_truncated);
        assert_eq!(config.max_frames, Some(100));
        assert_eq!(config.table_delimiter, ';');
        assert_eq!(config.group_delimiter, ',');
    }

    #[test]
    fn test_channel_selection() {
        assert_eq!("auto".parse::<ChannelSelection>().unwrap(), ChannelSelection::AutoDetect);
        assert_eq!("AUTO".parse::<ChannelSelection>().unwrap(), ChannelSelection::AutoDetect);
        assert_eq!("2".parse::<ChannelSelection>().unwrap(), ChannelSelection::Fixed(2));
        assert!("bus".parse::<ChannelSelection>().is_err());

        assert!(ChannelSelection::Fixed(1).matches(1));
        assert!(!ChannelSelection::Fixed(1).matches(0));
        assert!(ChannelSelection::AutoDetect.matches(7));
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: ExportConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.channel, ChannelSelection::Fixed(0));
        assert_eq!(config.grouping, GroupingMode::Table);
        assert_eq!(config.table_delimiter, ';');
        assert!(config.validators.multiplexor);
        assert_eq!(
            config.validators.rolling_counter,
            Some(RollingCounterConfig::default())
        );
        assert!(config.validators.checksum.is_none());
    }

    #[test]
    fn test_deserialize_channel_and_naming() {
        let json = r#"{
            "channel": "auto",
            "grouping": "tree",
            "naming": { "style": "qualified", "strip_prefix": "Dcdc" },
            "validators": { "checksum": { "algorithm": "crc8_sae_j1850" } }
        }"#;
        let config: ExportConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.channel, ChannelSelection::AutoDetect);
        assert_eq!(config.grouping, GroupingMode::Tree);
        assert_eq!(config.naming.field_name("DcdcStatus", "Voltage"), "Status::Voltage");

        let checksum = config.validators.checksum.unwrap();
        assert_eq!(checksum.signal, "Checksum");
        assert_eq!(checksum.algorithm, ChecksumAlgorithm::Crc8SaeJ1850);

        let config: ExportConfig = serde_json::from_str(r#"{ "channel": 3 }"#).unwrap();
        assert_eq!(config.channel, ChannelSelection::Fixed(3));
    }

    #[test]
    fn test_field_naming() {
        assert_eq!(FieldNaming::Signal.field_name("Msg", "Sig"), "Sig");
        let qualified = FieldNaming::Qualified { strip_prefix: None };
        assert_eq!(qualified.field_name("Msg", "Sig"), "Msg::Sig");
    }
}
