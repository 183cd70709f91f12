//! Checksum verification
//!
//! Recomputes the checksum of every frame carrying the configured checksum
//! signal and compares it with the decoded value.

use crate::catalog::decode::signal_bytes;
use crate::catalog::SignalDefinition;
use crate::config::{ChecksumAlgorithm, ChecksumConfig};
use crate::validators::{FrameContext, StreamValidator};
use serde::Serialize;
use std::collections::BTreeMap;

pub const CHECKSUM_REPORT_FILE: &str = "checksum_verification.json";

const CRC8_SAE_J1850_POLY: u8 = 0x1D;

impl ChecksumAlgorithm {
    /// Compute the checksum of a byte sequence
    pub fn compute<I: IntoIterator<Item = u8>>(&self, bytes: I) -> u64 {
        match self {
            ChecksumAlgorithm::Xor => bytes.into_iter().fold(0u8, |acc, b| acc ^ b) as u64,
            ChecksumAlgorithm::Sum => {
                bytes.into_iter().fold(0u8, |acc, b| acc.wrapping_add(b)) as u64
            }
            ChecksumAlgorithm::Crc8SaeJ1850 => {
                let mut crc: u8 = 0xFF;
                for byte in bytes {
                    crc ^= byte;
                    for _ in 0..8 {
                        crc = if crc & 0x80 != 0 {
                            (crc << 1) ^ CRC8_SAE_J1850_POLY
                        } else {
                            crc << 1
                        };
                    }
                }
                (crc ^ 0xFF) as u64
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChecksumErrors {
    signal: String,
    mismatched_frames: usize,
    last_expected: u64,
    last_observed: i64,
}

#[derive(Debug, Serialize)]
struct ReportEntry<'a> {
    message: &'a str,
    #[serde(flatten)]
    errors: &'a ChecksumErrors,
}

/// Detects frames whose checksum signal disagrees with the payload
pub struct ChecksumVerifier {
    config: ChecksumConfig,
    count: usize,
    errors: BTreeMap<String, ChecksumErrors>,
}

impl ChecksumVerifier {
    pub fn new(config: ChecksumConfig) -> Self {
        Self {
            config,
            count: 0,
            errors: BTreeMap::new(),
        }
    }

    /// Expected checksum of a payload, or `None` if the payload does not hold
    /// the checksum signal
    ///
    /// Every byte within the declared message size that does not carry the
    /// checksum signal takes part in the computation.
    fn expected(
        &self,
        data: &[u8],
        declared_size: usize,
        signal: &SignalDefinition,
    ) -> Option<u64> {
        let covered = signal_bytes(signal);
        if covered.iter().any(|&index| index >= data.len()) {
            return None;
        }

        let payload = data
            .iter()
            .take(declared_size)
            .enumerate()
            .filter(|(index, _)| !covered.contains(index))
            .map(|(_, byte)| *byte);

        let checksum = self.config.algorithm.compute(payload);
        Some(if signal.length < 64 {
            checksum & ((1u64 << signal.length) - 1)
        } else {
            checksum
        })
    }
}

impl StreamValidator for ChecksumVerifier {
    fn name(&self) -> &'static str {
        "Checksum verification"
    }

    fn on_frame(&mut self, ctx: &FrameContext<'_>) {
        let Some(observed) = ctx.values.get(&self.config.signal).and_then(|v| v.as_i64()) else {
            return;
        };
        let Some(signal) = ctx.message.signal(&self.config.signal) else {
            return;
        };
        let Some(expected) = self.expected(&ctx.frame.data, ctx.message.size, signal) else {
            return;
        };

        if observed == expected as i64 {
            return;
        }

        log::debug!(
            "Checksum mismatch in {}: expected {}, got {}",
            ctx.message.name,
            expected,
            observed
        );
        self.count += 1;
        let entry = self
            .errors
            .entry(ctx.message.name.clone())
            .or_insert_with(|| ChecksumErrors {
                signal: self.config.signal.clone(),
                mismatched_frames: 0,
                last_expected: expected,
                last_observed: observed,
            });
        entry.mismatched_frames += 1;
        entry.last_expected = expected;
        entry.last_observed = observed;
    }

    fn anomaly_count(&self) -> usize {
        self.count
    }

    fn report_file_name(&self) -> &str {
        CHECKSUM_REPORT_FILE
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{
        ByteOrder, LayoutElement, MessageDefinition, SignalDescriptor, ValueType,
    };
    use crate::types::{DecodedValues, Frame, SignalValue};

    fn message() -> MessageDefinition {
        let signal = |name: &str, start_bit: u16| SignalDefinition {
            name: name.to_string(),
            start_bit,
            length: 8,
            byte_order: ByteOrder::LittleEndian,
            value_type: ValueType::Unsigned,
            factor: 1.0,
            offset: 0.0,
            unit: None,
            multiplexer_value: None,
        };
        MessageDefinition {
            id: 0x10,
            name: "Protected".to_string(),
            size: 4,
            sender: None,
            signals: vec![signal("Data", 0), signal("Checksum", 24)],
            layout: vec![
                LayoutElement::Plain(SignalDescriptor::new("Data", None)),
                LayoutElement::Plain(SignalDescriptor::new("Checksum", None)),
            ],
            source: "test.dbc".to_string(),
        }
    }

    fn check(verifier: &mut ChecksumVerifier, message: &MessageDefinition, data: Vec<u8>) {
        let frame = Frame::new(0, 0, message.id, data);
        let mut values = DecodedValues::new();
        if let Some(&checksum) = frame.data.get(3) {
            values.insert("Checksum".to_string(), SignalValue::Integer(checksum as i64));
        }
        verifier.on_frame(&FrameContext {
            frame: &frame,
            message,
            values: &values,
            error: None,
        });
    }

    #[test]
    fn test_algorithms() {
        let check = b"123456789".iter().copied();
        assert_eq!(ChecksumAlgorithm::Crc8SaeJ1850.compute(check), 0x4B);
        assert_eq!(ChecksumAlgorithm::Xor.compute([0x01, 0x02, 0x04]), 0x07);
        assert_eq!(ChecksumAlgorithm::Sum.compute([0xFF, 0x02]), 0x01);
    }

    #[test]
    fn test_xor_mismatches_are_counted() {
        let mut verifier = ChecksumVerifier::new(ChecksumConfig::default());
        let message = message();

        // 0x01 ^ 0x02 ^ 0x04 = 0x07
        check(&mut verifier, &message, vec![0x01, 0x02, 0x04, 0x07]);
        assert_eq!(verifier.anomaly_count(), 0);

        check(&mut verifier, &message, vec![0x01, 0x02, 0x04, 0x09]);
        check(&mut verifier, &message, vec![0x01, 0x02, 0x05, 0x07]);
        assert_eq!(verifier.anomaly_count(), 2);

        let report = verifier.report().unwrap();
        assert_eq!(report[0]["message"], "Protected");
        assert_eq!(report[0]["signal"], "Checksum");
        assert_eq!(report[0]["mismatched_frames"], 2);
        assert_eq!(report[0]["last_expected"], 6);
        assert_eq!(report[0]["last_observed"], 7);
    }

    #[test]
    fn test_frames_without_checksum_are_ignored() {
        let mut verifier = ChecksumVerifier::new(ChecksumConfig::default());
        let message = message();
        check(&mut verifier, &message, vec![0x01, 0x02]);
        assert_eq!(verifier.anomaly_count(), 0);
    }

    #[test]
    fn test_report_written_on_anomaly() {
        let dir = tempfile::tempdir().unwrap();
        let mut verifier = ChecksumVerifier::new(ChecksumConfig {
            signal: "Checksum".to_string(),
            algorithm: ChecksumAlgorithm::Sum,
        });
        let message = message();
        check(&mut verifier, &message, vec![0x01, 0x02, 0x04, 0x00]);

        let path = verifier.write_report_if_any(dir.path()).unwrap().unwrap();
        assert!(path.ends_with(CHECKSUM_REPORT_FILE));
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written[0]["last_expected"], 7);
    }
}
