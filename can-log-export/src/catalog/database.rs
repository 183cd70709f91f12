//! Unified message catalog
//!
//! Combines message definitions from one or more DBC files into a single
//! queryable database keyed by CAN ID.

use crate::types::DecodedValues;
use std::collections::{BTreeMap, HashMap};

/// A complete CAN message definition
#[derive(Debug, Clone)]
pub struct MessageDefinition {
    /// CAN message ID (without the extended-frame flag)
    pub id: u32,
    /// Message name, unique within a catalog
    pub name: String,
    /// Declared message size in bytes
    pub size: usize,
    /// Sender ECU name (optional)
    pub sender: Option<String>,
    /// All signals in this message, in definition order
    pub signals: Vec<SignalDefinition>,
    /// Signal layout: plain signals and at most one multiplexed group
    pub layout: Vec<LayoutElement>,
    /// Source file (DBC filename)
    pub source: String,
}

impl MessageDefinition {
    /// Find a signal definition by name
    pub fn signal(&self, name: &str) -> Option<&SignalDefinition> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// The multiplexed group of this message, if any
    pub fn multiplexed_group(&self) -> Option<&MultiplexedGroup> {
        self.layout.iter().find_map(|element| match element {
            LayoutElement::Multiplexed(group) => Some(group),
            LayoutElement::Plain(_) => None,
        })
    }

    /// True if this message has a multiplexor signal
    pub fn is_multiplexed(&self) -> bool {
        self.multiplexed_group().is_some()
    }

    /// Multiplexor value of one frame, read from its decoded values
    pub fn selector_value(&self, values: &DecodedValues) -> Option<u64> {
        let group = self.multiplexed_group()?;
        values.get(&group.selector.name)?.as_selector()
    }
}

/// A CAN signal definition
#[derive(Debug, Clone)]
pub struct SignalDefinition {
    /// Signal name
    pub name: String,
    /// Start bit in the CAN frame (DBC numbering)
    pub start_bit: u16,
    /// Length in bits
    pub length: u16,
    /// Byte order
    pub byte_order: ByteOrder,
    /// Value type (signed/unsigned)
    pub value_type: ValueType,
    /// Scale factor to convert raw value to physical value
    pub factor: f64,
    /// Offset to add after scaling
    pub offset: f64,
    /// Engineering unit (e.g., "km/h", "°C", "V")
    pub unit: Option<String>,
    /// Selector value this signal belongs to (None if not multiplexed)
    pub multiplexer_value: Option<u64>,
}

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian (Intel format)
    LittleEndian,
    /// Big-endian (Motorola format)
    BigEndian,
}

/// Value type for signal interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Signed integer
    Signed,
    /// Unsigned integer
    Unsigned,
}

/// Name and unit of a signal as it appears in a message layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalDescriptor {
    pub name: String,
    pub unit: Option<String>,
}

impl SignalDescriptor {
    pub fn new(name: impl Into<String>, unit: Option<&str>) -> Self {
        Self {
            name: name.into(),
            unit: unit.filter(|u| !u.is_empty()).map(str::to_string),
        }
    }
}

/// Signals that share a frame identity but are selected by a multiplexor value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiplexedGroup {
    /// The multiplexor (selector) signal
    pub selector: SignalDescriptor,
    /// Selector value → signals present when the selector has that value
    pub branches: BTreeMap<u64, Vec<SignalDescriptor>>,
}

impl MultiplexedGroup {
    /// Declared selector values, in ascending order
    pub fn selector_values(&self) -> Vec<u64> {
        self.branches.keys().copied().collect()
    }
}

/// One element of a message's signal layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutElement {
    /// A signal that is present in every frame of the message
    Plain(SignalDescriptor),
    /// The multiplexor and its selector-keyed signal sets
    Multiplexed(MultiplexedGroup),
}

/// The unified signal database
pub struct SignalDatabase {
    /// All message definitions by CAN ID
    messages: HashMap<u32, MessageDefinition>,
}

impl SignalDatabase {
    /// Create a new empty signal database
    pub fn new() -> Self {
        Self {
            messages: HashMap::new(),
        }
    }

    /// Add a message definition to the database
    ///
    /// A later definition with the same CAN ID replaces the earlier one.
    pub fn add_message(&mut self, message: MessageDefinition) {
        if let Some(previous) = self.messages.get(&message.id) {
            log::warn!(
                "Message 0x{:X} ({}) from {} replaces {} from {}",
                message.id,
                message.name,
                message.source,
                previous.name,
                previous.source
            );
        }
        self.messages.insert(message.id, message);
    }

    /// Get the message definition for a CAN ID
    pub fn get_message(&self, can_id: u32) -> Option<&MessageDefinition> {
        self.messages.get(&can_id)
    }

    /// Get database statistics
    pub fn stats(&self) -> DatabaseStats {
        let num_messages = self.messages.len();
        let num_signals = self.messages.values().map(|msg| msg.signals.len()).sum();
        let num_multiplexed = self.messages.values().filter(|msg| msg.is_multiplexed()).count();

        DatabaseStats {
            num_messages,
            num_signals,
            num_multiplexed,
        }
    }

    /// Get all unique CAN IDs in the database
    pub fn get_all_can_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.messages.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Database statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Total number of message definitions
    pub num_messages: usize,
    /// Total number of signal definitions
    pub num_signals: usize,
    /// Number of messages with a multiplexor
    pub num_multiplexed: usize,
}

impl Default for SignalDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_speed() -> SignalDefinition {
        SignalDefinition {
            name: "EngineSpeed".to_string(),
            start_bit: 0,
            length: 16,
            byte_order: ByteOrder::LittleEndian,
            value_type: ValueType::Unsigned,
            factor: 1.0,
            offset: 0.0,
            unit: Some("rpm".to_string()),
            multiplexer_value: None,
        }
    }

    #[test]
    fn test_empty_database() {
        let db = SignalDatabase::new();
        let stats = db.stats();
        assert_eq!(stats.num_messages, 0);
        assert_eq!(stats.num_signals, 0);
        assert_eq!(stats.num_multiplexed, 0);
    }

    #[test]
    fn test_add_message() {
        let mut db = SignalDatabase::new();

        let message = MessageDefinition {
            id: 0x123,
            name: "EngineData".to_string(),
            size: 8,
            sender: Some("ECU1".to_string()),
            signals: vec![engine_speed()],
            layout: vec![LayoutElement::Plain(SignalDescriptor::new("EngineSpeed", Some("rpm")))],
            source: "test.dbc".to_string(),
        };

        db.add_message(message);

        let stats = db.stats();
        assert_eq!(stats.num_messages, 1);
        assert_eq!(stats.num_signals, 1);

        let msg = db.get_message(0x123).unwrap();
        assert_eq!(msg.name, "EngineData");
        assert_eq!(msg.signal("EngineSpeed").unwrap().unit.as_deref(), Some("rpm"));
        assert!(!msg.is_multiplexed());

        assert_eq!(db.get_all_can_ids(), vec![0x123]);
    }

    #[test]
    fn test_later_definition_replaces_earlier() {
        let mut db = SignalDatabase::new();
        for name in ["Old", "New"] {
            db.add_message(MessageDefinition {
                id: 0x10,
                name: name.to_string(),
                size: 8,
                sender: None,
                signals: Vec::new(),
                layout: Vec::new(),
                source: "test.dbc".to_string(),
            });
        }

        assert_eq!(db.stats().num_messages, 1);
        assert_eq!(db.get_message(0x10).unwrap().name, "New");
    }

    #[test]
    fn test_descriptor_drops_empty_unit() {
        assert_eq!(SignalDescriptor::new("A", Some("")).unit, None);
        assert_eq!(SignalDescriptor::new("A", Some("V")).unit.as_deref(), Some("V"));
    }
}
