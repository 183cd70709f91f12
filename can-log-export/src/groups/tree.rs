//! Multiplex-aware tree strategy
//!
//! Multiplexed frames reuse one identifier for several logically distinct
//! signal sets. Each message gets a common group (plain signals and the
//! multiplexor) and one group per declared multiplexor value, holding only that
//! branch's signals.

use crate::catalog::{LayoutElement, MessageDefinition};
use crate::config::FieldNaming;
use crate::groups::group::{Row, SignalGroup};
use crate::groups::{group_name, SignalGroupModel};
use crate::timestamp::FormattedTime;
use crate::types::DecodedValues;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Groups of one message
struct MessageGroups {
    common: SignalGroup,
    /// Raw names of the signals routed to the common group
    common_signals: HashSet<String>,
    muxed: BTreeMap<u64, SignalGroup>,
}

/// One common group per message plus one group per multiplexor value
pub struct MuxTree {
    naming: FieldNaming,
    messages: Vec<MessageGroups>,
    /// Message name → index into `messages`
    index: HashMap<String, usize>,
    routing_errors: usize,
    reported: HashSet<String>,
}

impl MuxTree {
    pub fn new(naming: FieldNaming) -> Self {
        Self {
            naming,
            messages: Vec::new(),
            index: HashMap::new(),
            routing_errors: 0,
            reported: HashSet::new(),
        }
    }

    /// Record a value set that cannot be routed; warns once per distinct problem
    fn routing_error(&mut self, problem: String) {
        self.routing_errors += 1;
        if self.reported.insert(problem.clone()) {
            log::warn!("{}", problem);
        } else {
            log::debug!("{}", problem);
        }
    }
}

impl SignalGroupModel for MuxTree {
    fn create_fields(&mut self, message: &MessageDefinition) {
        if self.index.contains_key(&message.name) {
            return;
        }

        let mut groups = MessageGroups {
            common: SignalGroup::new(group_name(&message.name, None)),
            common_signals: HashSet::new(),
            muxed: BTreeMap::new(),
        };

        for element in &message.layout {
            match element {
                LayoutElement::Plain(signal) => {
                    let fieldname = self.naming.field_name(&message.name, &signal.name);
                    groups.common.add_field(fieldname, signal.unit.as_deref());
                    groups.common_signals.insert(signal.name.clone());
                }
                LayoutElement::Multiplexed(mux) => {
                    let selector = &mux.selector;
                    let fieldname = self.naming.field_name(&message.name, &selector.name);
                    groups.common.add_field(fieldname, selector.unit.as_deref());
                    groups.common_signals.insert(selector.name.clone());

                    for (value, signals) in &mux.branches {
                        let mut branch = SignalGroup::new(group_name(&message.name, Some(*value)));
                        for signal in signals {
                            let fieldname = self.naming.field_name(&message.name, &signal.name);
                            branch.add_field(fieldname, signal.unit.as_deref());
                        }
                        groups.muxed.insert(*value, branch);
                    }
                }
            }
        }

        self.index.insert(message.name.clone(), self.messages.len());
        self.messages.push(groups);
    }

    fn add_field_values(
        &mut self,
        message: &MessageDefinition,
        values: &DecodedValues,
        mux_value: Option<u64>,
        timestamp: FormattedTime,
    ) {
        let Some(&position) = self.index.get(&message.name) else {
            self.routing_error(format!("Group not found for message {}", message.name));
            return;
        };

        let naming = &self.naming;
        let groups = &self.messages[position];

        let mut common_row = HashMap::new();
        let mut muxed_row = HashMap::new();
        for (signal, value) in values {
            let fieldname = naming.field_name(&message.name, signal);
            if groups.common_signals.contains(signal) {
                common_row.insert(fieldname, *value);
            } else {
                muxed_row.insert(fieldname, *value);
            }
        }

        let groups = &mut self.messages[position];
        if !common_row.is_empty() {
            groups.common.push_row(Row {
                timestamp,
                values: common_row,
            });
        }

        if muxed_row.is_empty() {
            return;
        }

        let problem = match mux_value {
            Some(value) => match groups.muxed.get_mut(&value) {
                Some(branch) => {
                    branch.push_row(Row {
                        timestamp,
                        values: muxed_row,
                    });
                    return;
                }
                None => format!(
                    "Group not found for message {} with multiplexor value {}",
                    message.name, value
                ),
            },
            None => format!(
                "Multiplexor value of message {} is missing, multiplexed signals dropped",
                message.name
            ),
        };
        self.routing_error(problem);
    }

    fn groups(&self) -> Vec<&SignalGroup> {
        self.messages
            .iter()
            .flat_map(|groups| std::iter::once(&groups.common).chain(groups.muxed.values()))
            .collect()
    }

    fn groups_mut(&mut self) -> Vec<&mut SignalGroup> {
        self.messages
            .iter_mut()
            .flat_map(|groups| std::iter::once(&mut groups.common).chain(groups.muxed.values_mut()))
            .collect()
    }

    fn routing_errors(&self) -> usize {
        self.routing_errors
    }
}
