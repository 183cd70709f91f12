//! Flat table strategy: every field of every message in one group

use crate::catalog::{LayoutElement, MessageDefinition};
use crate::config::FieldNaming;
use crate::groups::group::{Row, SignalGroup};
use crate::groups::SignalGroupModel;
use crate::timestamp::FormattedTime;
use crate::types::DecodedValues;
use std::collections::HashSet;

const DEFAULT_GROUP_NAME: &str = "Default Group";

/// A single implicit group holding all fields
///
/// Fields of mutually exclusive multiplexor branches share the table, so a row
/// only populates the branch that was active in its frame.
pub struct FlatTable {
    naming: FieldNaming,
    sample_and_hold: bool,
    registered: HashSet<String>,
    group: SignalGroup,
}

impl FlatTable {
    pub fn new(naming: FieldNaming, sample_and_hold: bool) -> Self {
        Self {
            naming,
            sample_and_hold,
            registered: HashSet::new(),
            group: SignalGroup::new(DEFAULT_GROUP_NAME),
        }
    }

    fn add_field(&mut self, message: &MessageDefinition, signal_name: &str, unit: Option<&str>) {
        let fieldname = self.naming.field_name(&message.name, signal_name);
        if !self.group.add_field(fieldname, unit) {
            log::debug!(
                "Signal {} of {} shares a field name already in the table",
                signal_name,
                message.name
            );
        }
    }
}

impl SignalGroupModel for FlatTable {
    fn create_fields(&mut self, message: &MessageDefinition) {
        if !self.registered.insert(message.name.clone()) {
            return;
        }

        for element in &message.layout {
            match element {
                LayoutElement::Plain(signal) => {
                    self.add_field(message, &signal.name, signal.unit.as_deref());
                }
                LayoutElement::Multiplexed(mux) => {
                    self.add_field(message, &mux.selector.name, mux.selector.unit.as_deref());
                    for signals in mux.branches.values() {
                        for signal in signals {
                            self.add_field(message, &signal.name, signal.unit.as_deref());
                        }
                    }
                }
            }
        }
    }

    fn add_field_values(
        &mut self,
        message: &MessageDefinition,
        values: &DecodedValues,
        _mux_value: Option<u64>,
        timestamp: FormattedTime,
    ) {
        if values.is_empty() {
            return;
        }

        let row = Row {
            timestamp,
            values: values
                .iter()
                .map(|(signal, value)| (self.naming.field_name(&message.name, signal), *value))
                .collect(),
        };

        self.group.push_row(row);
        if self.sample_and_hold {
            self.group.sample_and_hold();
        }
    }

    fn groups(&self) -> Vec<&SignalGroup> {
        vec![&self.group]
    }

    fn groups_mut(&mut self) -> Vec<&mut SignalGroup> {
        vec![&mut self.group]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::test_support::{at, muxed_message, plain_message, values};
    use crate::types::SignalValue;

    #[test]
    fn test_create_fields_registers_every_branch() {
        let mut table = FlatTable::new(FieldNaming::Signal, false);
        table.create_fields(&muxed_message());

        let groups = table.groups();
        let group = groups[0];
        assert_eq!(group.name(), "Default Group");
        assert_eq!(group.fieldnames(), ["timestamp", "Speed", "S", "A", "B"]);
        assert_eq!(group.units().len(), 2);
    }

    #[test]
    fn test_create_fields_is_idempotent() {
        let mut table = FlatTable::new(FieldNaming::Signal, false);
        table.create_fields(&muxed_message());
        table.create_fields(&muxed_message());
        let groups = table.groups();
        assert_eq!(groups[0].fieldnames().len(), 5);
    }

    #[test]
    fn test_one_row_per_frame() {
        let mut table = FlatTable::new(FieldNaming::Signal, false);
        let message = muxed_message();
        table.create_fields(&message);

        table.add_field_values(&message, &values(&[("S", 1), ("A", 10)]), None, at(0));
        table.add_field_values(&message, &values(&[("S", 2), ("B", 20)]), None, at(1));
        table.add_field_values(&message, &values(&[]), None, at(2));

        let groups = table.groups();
        let group = groups[0];
        assert_eq!(group.rows().len(), 2);
        assert!(!group.rows()[1].values.contains_key("A"));
    }

    #[test]
    fn test_sample_and_hold_across_messages() {
        let mut table = FlatTable::new(FieldNaming::Signal, true);
        let fast = plain_message("Fast", &["a"]);
        let slow = plain_message("Slow", &["b"]);
        table.create_fields(&fast);
        table.create_fields(&slow);

        table.add_field_values(&slow, &values(&[("b", 5)]), None, at(0));
        table.add_field_values(&fast, &values(&[("a", 1)]), None, at(1));
        table.add_field_values(&fast, &values(&[("a", 2)]), None, at(2));

        let groups = table.groups();
        let rows = groups[0].rows();
        assert_eq!(rows[2].values.get("a"), Some(&SignalValue::Integer(2)));
        assert_eq!(rows[2].values.get("b"), Some(&SignalValue::Integer(5)));
    }

    #[test]
    fn test_qualified_field_names() {
        let naming = FieldNaming::Qualified { strip_prefix: None };
        let mut table = FlatTable::new(naming, false);
        let first = plain_message("First", &["x"]);
        let second = plain_message("Second", &["x"]);
        table.create_fields(&first);
        table.create_fields(&second);
        table.add_field_values(&second, &values(&[("x", 3)]), None, at(0));

        let groups = table.groups();
        let group = groups[0];
        assert_eq!(group.fieldnames(), ["timestamp", "First::x", "Second::x"]);
        assert_eq!(group.field_count("Second::x"), 1);
    }
}
