//! A single exported table: ordered fields, units and time-stamped rows

use crate::timestamp::FormattedTime;
use crate::types::SignalValue;
use std::collections::HashMap;

/// Name of the time column, always the first field of a group
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// One accumulated record; fields absent from `values` are written as empty cells
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub timestamp: FormattedTime,
    pub values: HashMap<String, SignalValue>,
}

/// An independently serialized table of time-stamped rows
#[derive(Debug, Clone)]
pub struct SignalGroup {
    name: String,
    /// Column order: timestamp first, then first-registration order
    fieldnames: Vec<String>,
    units: HashMap<String, String>,
    rows: Vec<Row>,
    /// Number of rows in which each field received a value
    counts: HashMap<String, usize>,
}

impl SignalGroup {
    pub fn new(name: impl Into<String>) -> Self {
        let mut counts = HashMap::new();
        counts.insert(TIMESTAMP_FIELD.to_string(), 0);
        Self {
            name: name.into(),
            fieldnames: vec![TIMESTAMP_FIELD.to_string()],
            units: HashMap::new(),
            rows: Vec::new(),
            counts,
        }
    }

    /// Register a field; returns false if the group already has it
    pub fn add_field(&mut self, fieldname: String, unit: Option<&str>) -> bool {
        if self.counts.contains_key(&fieldname) {
            return false;
        }
        if let Some(unit) = unit.filter(|u| !u.is_empty()) {
            self.units.insert(fieldname.clone(), unit.to_string());
        }
        self.counts.insert(fieldname.clone(), 0);
        self.fieldnames.push(fieldname);
        true
    }

    /// Append a row
    ///
    /// Values of fields the group does not know are kept in the row but never
    /// written.
    pub fn push_row(&mut self, row: Row) {
        if let Some(count) = self.counts.get_mut(TIMESTAMP_FIELD) {
            *count += 1;
        }
        for fieldname in row.values.keys() {
            match self.counts.get_mut(fieldname) {
                Some(count) => *count += 1,
                None => log::trace!("Field {} is not part of group {}", fieldname, self.name),
            }
        }
        self.rows.push(row);
    }

    /// Copy into the last row every value of the previous row that it lacks
    pub fn sample_and_hold(&mut self) {
        if let [.., previous, last] = self.rows.as_mut_slice() {
            for (fieldname, value) in &previous.values {
                last.values.entry(fieldname.clone()).or_insert(*value);
            }
        }
    }

    /// Remove fields that never received a value
    ///
    /// Returns the removed field names. The timestamp field is kept.
    pub fn prune_empty_fields(&mut self) -> Vec<String> {
        let empty: Vec<String> = self
            .fieldnames
            .iter()
            .filter(|f| f.as_str() != TIMESTAMP_FIELD && self.field_count(f) == 0)
            .cloned()
            .collect();

        for fieldname in &empty {
            self.fieldnames.retain(|f| f != fieldname);
            self.units.remove(fieldname);
            self.counts.remove(fieldname);
        }

        if !empty.is_empty() {
            log::debug!("Group {}: pruned empty fields {:?}", self.name, empty);
        }
        empty
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fieldnames(&self) -> &[String] {
        &self.fieldnames
    }

    pub fn units(&self) -> &HashMap<String, String> {
        &self.units
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_field(&self, fieldname: &str) -> bool {
        self.counts.contains_key(fieldname)
    }

    /// Number of rows in which a field received a value
    pub fn field_count(&self, fieldname: &str) -> usize {
        self.counts.get(fieldname).copied().unwrap_or(0)
    }

    /// Header cells, timestamp first
    pub fn header(&self) -> Vec<String> {
        self.fieldnames.clone()
    }

    /// Units row, or `None` if no field has a unit
    pub fn units_row(&self) -> Option<Vec<String>> {
        if self.units.is_empty() {
            return None;
        }
        Some(
            self.fieldnames
                .iter()
                .map(|f| self.units.get(f).cloned().unwrap_or_default())
                .collect(),
        )
    }

    /// Cells of a row in field order, empty for absent fields
    pub fn record(&self, row: &Row) -> Vec<String> {
        self.fieldnames
            .iter()
            .map(|f| {
                if f == TIMESTAMP_FIELD {
                    row.timestamp.to_string()
                } else {
                    row.values.get(f).map(ToString::to_string).unwrap_or_default()
                }
            })
            .collect()
    }
}
