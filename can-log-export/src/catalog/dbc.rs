//! DBC file parser
//!
//! Parses Vector DBC files and converts them into catalog message definitions,
//! including the signal layout used by the grouping model.

use crate::catalog::database::{
    ByteOrder, LayoutElement, MessageDefinition, MultiplexedGroup, SignalDefinition,
    SignalDescriptor, ValueType,
};
use crate::types::{ExportError, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Flag set by DBC files on extended (29-bit) message IDs
const EXTENDED_ID_FLAG: u32 = 0x8000_0000;

/// Parse a DBC file and return message definitions
pub fn parse_dbc_file(path: &Path) -> Result<Vec<MessageDefinition>> {
    log::info!("Parsing DBC file: {:?}", path);

    // Read the DBC file as bytes first (handle non-UTF8 encodings)
    let bytes = std::fs::read(path).map_err(|e| {
        ExportError::DbcParseError(format!("Failed to read file {:?}: {}", path, e))
    })?;

    // Try UTF-8 first, then fallback to Latin-1/Windows-1252 encoding
    let dbc_content = match String::from_utf8(bytes) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("DBC file is not UTF-8, trying Latin-1 encoding");
            e.into_bytes().iter().map(|&b| b as char).collect()
        }
    };

    let source_filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.dbc")
        .to_string();

    let messages = parse_dbc_str(&dbc_content, &source_filename)?;

    log::info!("Parsed {} messages from {:?}", messages.len(), path);

    Ok(messages)
}

/// Parse DBC content already held in memory
pub fn parse_dbc_str(content: &str, source: &str) -> Result<Vec<MessageDefinition>> {
    let dbc = can_dbc::DBC::from_slice(content.as_bytes()).map_err(|e| {
        ExportError::DbcParseError(format!("Failed to parse DBC {}: {:?}", source, e))
    })?;

    dbc.messages()
        .iter()
        .map(|dbc_msg| convert_message(dbc_msg, source))
        .collect()
}

/// Convert a can-dbc message to our MessageDefinition
fn convert_message(dbc_msg: &can_dbc::Message, source: &str) -> Result<MessageDefinition> {
    let mut signals = Vec::new();
    for dbc_sig in dbc_msg.signals() {
        signals.push(convert_signal(dbc_sig));
    }

    let layout = build_layout(dbc_msg.message_name(), &signals, dbc_msg.signals())?;

    Ok(MessageDefinition {
        id: dbc_msg.message_id().0 & !EXTENDED_ID_FLAG,
        name: dbc_msg.message_name().to_string(),
        size: *dbc_msg.message_size() as usize,
        sender: match dbc_msg.transmitter() {
            can_dbc::Transmitter::NodeName(name) => Some(name.to_string()),
            _ => None,
        },
        signals,
        layout,
        source: source.to_string(),
    })
}

/// Convert a can-dbc signal to our SignalDefinition
fn convert_signal(dbc_sig: &can_dbc::Signal) -> SignalDefinition {
    let byte_order = match *dbc_sig.byte_order() {
        can_dbc::ByteOrder::LittleEndian => ByteOrder::LittleEndian,
        can_dbc::ByteOrder::BigEndian => ByteOrder::BigEndian,
    };

    let value_type = match *dbc_sig.value_type() {
        can_dbc::ValueType::Signed => ValueType::Signed,
        can_dbc::ValueType::Unsigned => ValueType::Unsigned,
    };

    let multiplexer_value = match *dbc_sig.multiplexer_indicator() {
        can_dbc::MultiplexIndicator::MultiplexedSignal(value) => Some(value),
        can_dbc::MultiplexIndicator::MultiplexorAndMultiplexedSignal(value) => Some(value),
        _ => None,
    };

    SignalDefinition {
        name: dbc_sig.name().to_string(),
        start_bit: *dbc_sig.start_bit() as u16,
        length: *dbc_sig.signal_size() as u16,
        byte_order,
        value_type,
        factor: *dbc_sig.factor(),
        offset: *dbc_sig.offset(),
        unit: if dbc_sig.unit().is_empty() {
            None
        } else {
            Some(dbc_sig.unit().to_string())
        },
        multiplexer_value,
    }
}

/// Build the signal layout of a message
///
/// The multiplexed group takes the position of its multiplexor in the signal
/// order. Only a single multiplexor per message is supported; nested
/// (extended) multiplexing is flattened onto the outer selector values.
fn build_layout(
    message_name: &str,
    signals: &[SignalDefinition],
    dbc_signals: &[can_dbc::Signal],
) -> Result<Vec<LayoutElement>> {
    let mut layout = Vec::new();
    let mut multiplexor_seen = false;

    for (signal, dbc_sig) in signals.iter().zip(dbc_signals) {
        let descriptor = SignalDescriptor::new(signal.name.clone(), signal.unit.as_deref());

        match dbc_sig.multiplexer_indicator() {
            can_dbc::MultiplexIndicator::Plain => layout.push(LayoutElement::Plain(descriptor)),
            can_dbc::MultiplexIndicator::Multiplexor if multiplexor_seen => {
                log::warn!(
                    "Message {} declares more than one multiplexor, treating {} as plain",
                    message_name,
                    signal.name
                );
                layout.push(LayoutElement::Plain(descriptor));
            }
            can_dbc::MultiplexIndicator::Multiplexor => {
                multiplexor_seen = true;
                let mut branches: BTreeMap<u64, Vec<SignalDescriptor>> = BTreeMap::new();
                for muxed in signals.iter().filter(|s| s.name != signal.name) {
                    if let Some(value) = muxed.multiplexer_value {
                        branches
                            .entry(value)
                            .or_default()
                            .push(SignalDescriptor::new(muxed.name.clone(), muxed.unit.as_deref()));
                    }
                }
                layout.push(LayoutElement::Multiplexed(MultiplexedGroup {
                    selector: descriptor,
                    branches,
                }));
            }
            // Placed under their selector value inside the multiplexed group
            _ => {}
        }
    }

    if !multiplexor_seen && signals.iter().any(|s| s.multiplexer_value.is_some()) {
        return Err(ExportError::InvalidSignalDefinition(format!(
            "Message '{}' has multiplexed signals but no multiplexer",
            message_name
        )));
    }

    Ok(layout)
}
