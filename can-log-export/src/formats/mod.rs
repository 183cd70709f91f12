//! Log file format parsers
//!
//! This module contains parsers for CAN log file formats.
//! Each parser implements an iterator pattern over Frame objects.

use crate::types::{ExportError, Frame, Result};
use std::path::Path;

pub mod asc;

pub use asc::{AscFrameIterator, AscParser};

/// A boxed stream of frames from any supported format
pub type FrameStream = Box<dyn Iterator<Item = Result<Frame>> + Send>;

/// Common trait for all log file parsers
///
/// Frames are yielded in file order, each exactly once.
pub trait FrameSource: Iterator<Item = Result<Frame>> + Sized {
    /// Open a log file and return an iterator over its CAN frames
    fn open(path: &Path) -> Result<Self>;
}

/// Open a log file, choosing the parser from its extension
pub fn open_log(path: &Path) -> Result<FrameStream> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase());

    match extension.as_deref() {
        Some("asc") => {
            log::debug!("Detected ASC file format");
            Ok(Box::new(AscFrameIterator::open(path)?))
        }
        _ => Err(ExportError::LogParseError(format!(
            "Unsupported log file format: {:?}",
            path
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_log_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.ASC");
        std::fs::write(&path, "   0.1 1  10  Rx   d 1 FF\n").unwrap();

        let frames: Vec<Frame> = open_log(&path).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, vec![0xFF]);

        let err = open_log(&dir.path().join("trace.blf")).err().unwrap();
        assert!(matches!(err, ExportError::LogParseError(_)));
    }
}
