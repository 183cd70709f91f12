//! Multiplexor verification
//!
//! Counts frames whose multiplexor carries a value the catalog does not declare.

use crate::validators::{FrameContext, StreamValidator};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const MULTIPLEXOR_REPORT_FILE: &str = "multiplexor_verification.json";

fn illegal_value_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"expected multiplexer id .+, but got (\d+)").expect("valid regex")
    })
}

/// Extract the illegal multiplexor value from a decode error message
fn illegal_value(message: &str) -> Option<u64> {
    illegal_value_pattern()
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[derive(Debug, Default, Serialize)]
struct MultiplexorErrors {
    multiplexor: String,
    expected_values_from_dbc: Vec<u64>,
    actual_values_in_frames: BTreeMap<u64, usize>,
}

#[derive(Debug, Serialize)]
struct ReportEntry<'a> {
    message: &'a str,
    #[serde(flatten)]
    errors: &'a MultiplexorErrors,
}

/// Detects multiplexor values without a declared signal set
#[derive(Default)]
pub struct MultiplexorVerifier {
    count: usize,
    errors: BTreeMap<String, MultiplexorErrors>,
}

impl MultiplexorVerifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamValidator for MultiplexorVerifier {
    fn name(&self) -> &'static str {
        "Multiplexor verification"
    }

    fn on_frame(&mut self, ctx: &FrameContext<'_>) {
        let Some(error) = ctx.error else {
            return;
        };
        let Some(value) = illegal_value(&error.to_string()) else {
            return;
        };

        log::debug!(
            "Illegal multiplexor value {} in message {}",
            value,
            ctx.message.name
        );
        self.count += 1;

        let entry = self.errors.entry(ctx.message.name.clone()).or_default();
        if let Some(group) = ctx.message.multiplexed_group() {
            entry.multiplexor = group.selector.name.clone();
            entry.expected_values_from_dbc = group.selector_values();
        }
        *entry.actual_values_in_frames.entry(value).or_insert(0) += 1;
    }

    fn anomaly_count(&self) -> usize {
        self.count
    }

    fn report_file_name(&self) -> &str {
        MULTIPLEXOR_REPORT_FILE
    }

    fn report(&self) -> serde_json::Result<serde_json::Value> {
        let entries: Vec<ReportEntry<'_>> = self
            .errors
            .iter()
            .map(|(message, errors)| ReportEntry { message, errors })
            .collect();
        serde_json::to_value(entries)
    }
}
