//! Rolling counter verification
//!
//! A rolling counter must change from one frame to the next. A frame repeating
//! the previous counter value is an anomaly.

use crate::config::{CounterScope, RollingCounterConfig};
use crate::validators::{FrameContext, StreamValidator};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub const ROLLING_COUNTER_REPORT_FILE: &str = "rolling_counter_verification.json";

/// Identity of a tracked counter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CounterKey {
    Global,
    Message(u8, String),
}

#[derive(Debug, Serialize)]
struct RepeatedValue {
    value: i64,
    repeated_frames: usize,
}

#[derive(Debug, Serialize)]
struct ReportEntry<'a> {
    message: &'a str,
    signal: &'a str,
    errors: Vec<RepeatedValue>,
}

/// Detects repeated rolling counter values
pub struct RollingCounterVerifier {
    config: RollingCounterConfig,
    previous: HashMap<CounterKey, i64>,
    count: usize,
    /// Message name → repeated value → frames
    errors: BTreeMap<String, BTreeMap<i64, usize>>,
}

impl RollingCounterVerifier {
    pub fn new(config: RollingCounterConfig) -> Self {
        Self {
            config,
            previous: HashMap::new(),
            count: 0,
            errors: BTreeMap::new(),
        }
    }

    fn key(&self, ctx: &FrameContext<'_>) -> CounterKey {
        match self.config.scope {
            CounterScope::Global => CounterKey::Global,
            CounterScope::PerMessage => {
                CounterKey::Message(ctx.frame.channel, ctx.message.name.clone())
            }
        }
    }
}

impl StreamValidator for RollingCounterVerifier {
    fn name(&self) -> &'static str {
        "Rolling counter verification"
    }

    fn on_frame(&mut self, ctx: &FrameContext<'_>) {
        let Some(value) = ctx.values.get(&self.config.signal).and_then(|v| v.as_i64()) else {
            return;
        };

        let key = self.key(ctx);
        match self.previous.get(&key) {
            Some(&previous) if previous == value => {
                log::trace!(
                    "Rolling counter {} of {} repeated value {}",
                    self.config.signal,
                    ctx.message.name,
                    value
                );
                self.count += 1;
                *self
                    .errors
                    .entry(ctx.message.name.clone())
                    .or_default()
                    .entry(value)
                    .or_insert(0) += 1;
            }
            _ => {
                self.previous.insert(key, value);
            }
        }
    }

    fn anomaly_count(&self) -> usize {
        self.count
    }

    fn report_file_name(&self) -> &str {
        ROLLING_COUNTER_REPORT_FILE
    }

    fn report(&self) -> serde_json::Result<serde_json::Value> {
        let entries: Vec<ReportEntry<'_>> = self
            .errors
            .iter()
            .map(|(message, repeated)| ReportEntry {
                message,
                signal: &self.config.signal,
                errors: repeated
                    .iter()
                    .map(|(&value, &repeated_frames)| RepeatedValue {
                        value,
                        repeated_frames,
                    })
                    .collect(),
            })
            .collect();
        serde_json::to_value(entries)
    }
}
