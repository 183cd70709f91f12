//! Acceptance filter
//!
//! Decides which messages, and which of their signals, are exported.
//! Validators see every decoded value; only exported tables are filtered.

use crate::catalog::MessageDefinition;
use crate::types::DecodedValues;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Message and signal selection for exported tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceFilter {
    /// Export every message and every signal
    #[serde(default)]
    pub accept_all: bool,

    /// Messages exported with all their signals
    #[serde(default)]
    pub fully_accepted: HashSet<String>,

    /// Messages exported with only the listed signals
    #[serde(default)]
    pub partly_accepted: HashMap<String, HashSet<String>>,
}

impl AcceptanceFilter {
    /// An empty filter: nothing is exported until messages are added
    pub fn new() -> Self {
        Self::default()
    }

    /// A filter exporting everything
    pub fn accept_all() -> Self {
        Self {
            accept_all: true,
            ..Self::default()
        }
    }

    /// Builder method: export all signals of a message
    pub fn fully_accept(mut self, message_name: impl Into<String>) -> Self {
        self.fully_accepted.insert(message_name.into());
        self
    }

    /// Builder method: export the given signals of a message
    pub fn partly_accept<I, S>(mut self, message_name: impl Into<String>, signals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partly_accepted
            .entry(message_name.into())
            .or_default()
            .extend(signals.into_iter().map(Into::into));
        self
    }

    /// True if at least part of the message is exported
    pub fn is_accepted(&self, message: &MessageDefinition) -> bool {
        self.accept_all
            || self.fully_accepted.contains(&message.name)
            || self.partly_accepted.contains_key(&message.name)
    }

    /// Keep only the decoded values that are exported
    pub fn keep_accepted(
        &self,
        message: &MessageDefinition,
        values: &DecodedValues,
    ) -> DecodedValues {
        if self.accept_all || self.fully_accepted.contains(&message.name) {
            return values.clone();
        }

        match self.partly_accepted.get(&message.name) {
            Some(signals) => values
                .iter()
                .filter(|(name, _)| signals.contains(name.as_str()))
                .map(|(name, value)| (name.clone(), *value))
                .collect(),
            None => DecodedValues::new(),
        }
    }
}
