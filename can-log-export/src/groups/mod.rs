//! Signal grouping model
//!
//! Reassembles per-frame decoded values into time-aligned tables. Two
//! strategies share the [`SignalGroupModel`] contract:
//!
//! - [`FlatTable`]: a single table holding every field of every message
//! - [`MuxTree`]: one table per message, plus one per multiplexor value, so
//!   mutually exclusive signal sets never share a table

mod group;
mod table;
mod tree;

pub use group::{Row, SignalGroup, TIMESTAMP_FIELD};
pub use table::FlatTable;
pub use tree::MuxTree;

use crate::catalog::MessageDefinition;
use crate::config::{ExportConfig, GroupingMode};
use crate::timestamp::FormattedTime;
use crate::types::DecodedValues;

/// Accumulates decoded values into signal groups
pub trait SignalGroupModel {
    /// Register the fields of a message; no-op if the message was seen before
    fn create_fields(&mut self, message: &MessageDefinition);

    /// Route the values of one frame into the groups
    ///
    /// `mux_value` is the frame's decoded multiplexor value. It is passed
    /// separately because `values` may no longer contain the multiplexor.
    fn add_field_values(
        &mut self,
        message: &MessageDefinition,
        values: &DecodedValues,
        mux_value: Option<u64>,
        timestamp: FormattedTime,
    );

    /// All groups, in creation order
    fn groups(&self) -> Vec<&SignalGroup>;

    /// All groups, mutably, in creation order
    fn groups_mut(&mut self) -> Vec<&mut SignalGroup>;

    /// Number of value sets dropped because no group could take them
    fn routing_errors(&self) -> usize {
        0
    }
}

/// Name of a message's group, or of one of its multiplexor value groups
pub fn group_name(message_name: &str, mux_value: Option<u64>) -> String {
    match mux_value {
        Some(value) => format!("{}.Mux{}", message_name, value),
        None => message_name.to_string(),
    }
}

/// Create the grouping strategy selected by the configuration
pub fn new_model(config: &ExportConfig) -> Box<dyn SignalGroupModel> {
    match config.grouping {
        GroupingMode::Table => Box::new(FlatTable::new(
            config.naming.clone(),
            config.sample_and_hold,
        )),
        GroupingMode::Tree => {
            if config.sample_and_hold {
                log::warn!("Sample-and-hold only applies to table grouping, ignoring it");
            }
            Box::new(MuxTree::new(config.naming.clone()))
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::catalog::{
        ByteOrder, LayoutElement, MessageDefinition, MultiplexedGroup, SignalDefinition,
        SignalDescriptor, ValueType,
    };
    use crate::timestamp::FormattedTime;
    use crate::types::{DecodedValues, SignalValue};
    use chrono::TimeDelta;
    use std::collections::BTreeMap;

    fn signal(name: &str, multiplexer_value: Option<u64>) -> SignalDefinition {
        SignalDefinition {
            name: name.to_string(),
            start_bit: 0,
            length: 8,
            byte_order: ByteOrder::LittleEndian,
            value_type: ValueType::Unsigned,
            factor: 1.0,
            offset: 0.0,
            unit: None,
            multiplexer_value,
        }
    }

    /// `Plain(Speed [km/h])`, then `S` selecting `{1: [A], 2: [B [V]]}`
    pub fn muxed_message() -> MessageDefinition {
        let mut branches = BTreeMap::new();
        branches.insert(1, vec![SignalDescriptor::new("A", None)]);
        branches.insert(2, vec![SignalDescriptor::new("B", Some("V"))]);

        MessageDefinition {
            id: 0x300,
            name: "Muxed".to_string(),
            size: 8,
            sender: None,
            signals: vec![
                signal("Speed", None),
                signal("S", None),
                signal("A", Some(1)),
                signal("B", Some(2)),
            ],
            layout: vec![
                LayoutElement::Plain(SignalDescriptor::new("Speed", Some("km/h"))),
                LayoutElement::Multiplexed(MultiplexedGroup {
                    selector: SignalDescriptor::new("S", None),
                    branches,
                }),
            ],
            source: "test.dbc".to_string(),
        }
    }

    pub fn plain_message(name: &str, signals: &[&str]) -> MessageDefinition {
        MessageDefinition {
            id: 0x100,
            name: name.to_string(),
            size: 8,
            sender: None,
            signals: signals.iter().map(|s| signal(s, None)).collect(),
            layout: signals
                .iter()
                .map(|s| LayoutElement::Plain(SignalDescriptor::new(*s, None)))
                .collect(),
            source: "test.dbc".to_string(),
        }
    }

    pub fn values(pairs: &[(&str, i64)]) -> DecodedValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), SignalValue::Integer(*v)))
            .collect()
    }

    pub fn at(secs: i64) -> FormattedTime {
        FormattedTime::Relative(TimeDelta::seconds(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_name() {
        assert_eq!(group_name("Status", None), "Status");
        assert_eq!(group_name("Status", Some(3)), "Status.Mux3");
    }

    #[test]
    fn test_new_model_follows_config() {
        let mut model = new_model(&ExportConfig::new().with_grouping(GroupingMode::Tree));
        model.create_fields(&test_support::muxed_message());
        assert_eq!(model.groups().len(), 3);

        let mut model = new_model(&ExportConfig::new());
        model.create_fields(&test_support::muxed_message());
        assert_eq!(model.groups().len(), 1);
    }
}
