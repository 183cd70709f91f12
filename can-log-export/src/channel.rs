//! Channel analysis
//!
//! A recording may tag frames from physically different buses with several
//! channel numbers. The analyzer counts, per channel, the frames whose declared
//! length disagrees with the catalog; the channel with the fewest mismatches is
//! the most likely carrier of the intended traffic. This is a heuristic only.

use crate::catalog::MessageDefinition;
use crate::types::Frame;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Per-channel counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub channel: u8,
    pub frames: usize,
    pub length_mismatches: usize,
}

/// Tracks frame counts and DLC mismatches per channel
#[derive(Debug, Clone, Default)]
pub struct ChannelAnalyzer {
    /// Channels in first-seen order
    channels: Vec<ChannelStats>,
    /// Message name → channel → distinct mismatching lengths
    mismatched_lengths: BTreeMap<String, BTreeMap<u8, BTreeSet<usize>>>,
}

impl ChannelAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame whose message was resolved in the catalog
    pub fn observe(&mut self, frame: &Frame, message: &MessageDefinition) {
        let stats = self.stats_entry(frame.channel);
        stats.frames += 1;

        if frame.dlc != message.size {
            stats.length_mismatches += 1;
            self.mismatched_lengths
                .entry(message.name.clone())
                .or_default()
                .entry(frame.channel)
                .or_default()
                .insert(frame.dlc);
        }
    }

    /// Mismatch counters start at zero the first time a channel is seen,
    /// so a channel without mismatches is still a candidate.
    fn stats_entry(&mut self, channel: u8) -> &mut ChannelStats {
        let index = match self.channels.iter().position(|s| s.channel == channel) {
            Some(index) => index,
            None => {
                self.channels.push(ChannelStats {
                    channel,
                    ..Default::default()
                });
                self.channels.len() - 1
            }
        };
        &mut self.channels[index]
    }

    /// The channel with the fewest length mismatches
    ///
    /// Ties go to the channel seen first. Returns `None` if no frame was observed.
    pub fn guess_channel(&self) -> Option<u8> {
        self.channels
            .iter()
            .min_by_key(|s| s.length_mismatches)
            .map(|s| s.channel)
    }

    /// Counters of every observed channel, in first-seen order
    pub fn channels(&self) -> &[ChannelStats] {
        &self.channels
    }

    pub fn frame_count(&self, channel: u8) -> usize {
        self.channel_stats(channel).map_or(0, |s| s.frames)
    }

    pub fn mismatch_count(&self, channel: u8) -> usize {
        self.channel_stats(channel).map_or(0, |s| s.length_mismatches)
    }

    fn channel_stats(&self, channel: u8) -> Option<&ChannelStats> {
        self.channels.iter().find(|s| s.channel == channel)
    }

    /// Distinct mismatching lengths seen for a message, per channel
    pub fn mismatched_lengths(&self, message_name: &str) -> Option<&BTreeMap<u8, BTreeSet<usize>>> {
        self.mismatched_lengths.get(message_name)
    }
}
