//! Payload decoding engine
//!
//! Extracts signal values from raw CAN payloads based on the message
//! definitions of the catalog. Handles bit extraction, endianness, multiplexing,
//! and physical value conversion.

use crate::catalog::database::{ByteOrder, MessageDefinition, SignalDefinition, ValueType};
use crate::types::{DecodedValues, SignalValue};

/// Reasons a payload cannot be decoded according to its message definition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The multiplexor carries a value with no declared signal set
    #[error("expected multiplexer id {}, but got {got}", format_choices(.expected))]
    UnexpectedMultiplexerId {
        multiplexer: String,
        expected: Vec<u64>,
        got: u64,
    },

    /// The payload is shorter than the declared message size
    #[error("wrong data size: {actual} instead of {expected} bytes for message {message}")]
    Truncated {
        message: String,
        expected: usize,
        actual: usize,
    },
}

/// Render selector values the way they read in a sentence ("0, 1 or 2")
fn format_choices(values: &[u64]) -> String {
    match values {
        [] => String::new(),
        [single] => single.to_string(),
        [init @ .., last] => {
            let head: Vec<String> = init.iter().map(u64::to_string).collect();
            format!("{} or {}", head.join(", "), last)
        }
    }
}

/// Decode a payload into named signal values
///
/// With `allow_truncated`, a payload shorter than the declared size is decoded
/// as far as it goes and signals that do not fit are left out. Otherwise a short
/// payload is an error.
pub fn decode_message(
    message: &MessageDefinition,
    data: &[u8],
    allow_truncated: bool,
) -> Result<DecodedValues, DecodeError> {
    if data.len() < message.size && !allow_truncated {
        return Err(DecodeError::Truncated {
            message: message.name.clone(),
            expected: message.size,
            actual: data.len(),
        });
    }

    let mut values = DecodedValues::new();

    for signal in message.signals.iter().filter(|s| s.multiplexer_value.is_none()) {
        if let Some(value) = decode_signal(data, signal) {
            values.insert(signal.name.clone(), value);
        }
    }

    if let Some(group) = message.multiplexed_group() {
        let selector = message
            .signal(&group.selector.name)
            .and_then(|def| extract_signal_value(data, def))
            .and_then(|raw| u64::try_from(raw).ok());

        match selector {
            Some(value) if group.branches.contains_key(&value) => {
                for signal in message
                    .signals
                    .iter()
                    .filter(|s| s.multiplexer_value == Some(value))
                {
                    if let Some(decoded) = decode_signal(data, signal) {
                        values.insert(signal.name.clone(), decoded);
                    }
                }
            }
            Some(value) => {
                return Err(DecodeError::UnexpectedMultiplexerId {
                    multiplexer: group.selector.name.clone(),
                    expected: group.selector_values(),
                    got: value,
                });
            }
            // Selector itself was cut off by a truncated payload
            None => {}
        }
    }

    Ok(values)
}

/// Decode a single signal from CAN frame data
fn decode_signal(data: &[u8], signal: &SignalDefinition) -> Option<SignalValue> {
    let raw_value = extract_signal_value(data, signal)?;

    let value = if signal.factor == 1.0 && signal.offset == 0.0 && signal.length == 1 {
        // Boolean signal (single bit, no scaling)
        SignalValue::Boolean(raw_value != 0)
    } else if signal.factor != 1.0 || signal.offset != 0.0 {
        SignalValue::Float(signal.offset + signal.factor * (raw_value as f64))
    } else {
        SignalValue::Integer(raw_value)
    };

    Some(value)
}

/// Extract the raw (unscaled, sign-extended) value of a signal
///
/// Returns `None` if the signal does not fit within the payload.
pub fn extract_signal_value(data: &[u8], signal: &SignalDefinition) -> Option<i64> {
    let length = signal.length as usize;
    if length == 0 || length > 64 {
        return None;
    }

    let mut raw: u64 = 0;
    for span in bit_spans(signal) {
        let byte = *data.get(span.byte_index)?;
        let bits = (byte >> span.bit_offset) as u64 & low_mask(span.num_bits);
        raw |= bits << span.value_shift;
    }

    let value = match signal.value_type {
        ValueType::Unsigned => raw as i64,
        ValueType::Signed => sign_extend(raw, length),
    };

    Some(value)
}

/// Payload byte indices occupied by a signal
pub fn signal_bytes(signal: &SignalDefinition) -> Vec<usize> {
    bit_spans(signal).iter().map(|span| span.byte_index).collect()
}

/// One contiguous run of signal bits within a single payload byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BitSpan {
    byte_index: usize,
    /// Lowest bit position within the byte (0..=7)
    bit_offset: u8,
    /// Number of consecutive bits (1..=8)
    num_bits: u8,
    /// Where these bits land in the raw value
    value_shift: u32,
}

/// Map a DBC start bit and byte order onto payload bytes
///
/// Intel signals start at their LSB and walk upward through the bytes.
/// Motorola signals start at their MSB and walk down each byte, continuing at
/// bit 7 of the next byte.
fn bit_spans(signal: &SignalDefinition) -> Vec<BitSpan> {
    let mut spans = Vec::new();
    let mut byte_index = (signal.start_bit / 8) as usize;
    let mut bit_index = (signal.start_bit % 8) as u8;
    let mut remaining = signal.length as u32;

    match signal.byte_order {
        ByteOrder::LittleEndian => {
            let mut value_shift = 0;
            while remaining > 0 {
                let num_bits = (8 - bit_index as u32).min(remaining) as u8;
                spans.push(BitSpan {
                    byte_index,
                    bit_offset: bit_index,
                    num_bits,
                    value_shift,
                });
                value_shift += num_bits as u32;
                remaining -= num_bits as u32;
                byte_index += 1;
                bit_index = 0;
            }
        }
        ByteOrder::BigEndian => {
            while remaining > 0 {
                let num_bits = (bit_index as u32 + 1).min(remaining) as u8;
                remaining -= num_bits as u32;
                spans.push(BitSpan {
                    byte_index,
                    bit_offset: bit_index + 1 - num_bits,
                    num_bits,
                    value_shift: remaining,
                });
                byte_index += 1;
                bit_index = 7;
            }
        }
    }

    spans
}

fn low_mask(num_bits: u8) -> u64 {
    (1u64 << num_bits) - 1
}

/// Sign-extend a value from N bits to 64 bits
fn sign_extend(value: u64, bit_length: usize) -> i64 {
    if bit_length >= 64 {
        return value as i64;
    }

    let sign_bit = 1u64 << (bit_length - 1);
    if (value & sign_bit) != 0 {
        let mask = !0u64 << bit_length;
        (value | mask) as i64
    } else {
        value as i64
    }
}
