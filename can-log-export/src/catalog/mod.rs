//! Message catalog: signal layouts and payload decoding
//!
//! The export pipeline only depends on the [`MessageCatalog`] trait. The
//! [`SignalDatabase`] implementation is filled from DBC files.

pub mod database;
pub mod dbc;
pub mod decode;

use crate::types::{DecodedValues, Result};
use std::path::Path;

pub use database::{
    ByteOrder, DatabaseStats, LayoutElement, MessageDefinition, MultiplexedGroup,
    SignalDatabase, SignalDefinition, SignalDescriptor, ValueType,
};
pub use decode::DecodeError;

/// Resolves frame identifiers to message definitions and decodes payloads
pub trait MessageCatalog {
    /// Look up the message carried by a frame identifier
    fn message(&self, can_id: u32) -> Option<&MessageDefinition>;

    /// Decode a payload into named signal values
    fn decode(
        &self,
        message: &MessageDefinition,
        data: &[u8],
        allow_truncated: bool,
    ) -> std::result::Result<DecodedValues, DecodeError> {
        decode::decode_message(message, data, allow_truncated)
    }
}

impl MessageCatalog for SignalDatabase {
    fn message(&self, can_id: u32) -> Option<&MessageDefinition> {
        self.get_message(can_id)
    }
}

/// A catalog shared by several concurrent exports
impl<T: MessageCatalog + ?Sized> MessageCatalog for &T {
    fn message(&self, can_id: u32) -> Option<&MessageDefinition> {
        (**self).message(can_id)
    }

    fn decode(
        &self,
        message: &MessageDefinition,
        data: &[u8],
        allow_truncated: bool,
    ) -> std::result::Result<DecodedValues, DecodeError> {
        (**self).decode(message, data, allow_truncated)
    }
}

impl SignalDatabase {
    /// Load a DBC file and add its definitions to the database
    ///
    /// # Example
    /// ```no_run
    /// use can_log_export::SignalDatabase;
    /// use std::path::Path;
    ///
    /// let mut catalog = SignalDatabase::new();
    /// catalog.add_dbc(Path::new("powertrain.dbc")).unwrap();
    /// ```
    pub fn add_dbc(&mut self, path: &Path) -> Result<()> {
        log::info!("Loading DBC file: {:?}", path);

        for message in dbc::parse_dbc_file(path)? {
            self.add_message(message);
        }

        log::info!("DBC file loaded successfully: {:?}", path);
        Ok(())
    }

    /// Create a database from a single DBC file
    pub fn from_dbc(path: &Path) -> Result<Self> {
        let mut db = Self::new();
        db.add_dbc(path)?;
        Ok(db)
    }
}
