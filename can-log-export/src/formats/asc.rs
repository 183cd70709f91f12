//! Vector ASCII (ASC) log parser
//!
//! Reads the text export of Vector tools. Header lines set the recording
//! start (`date ...`), the number base of identifiers and payload bytes
//! (`base hex|dec`) and whether timestamps are absolute offsets from the start
//! or deltas to the previous event (`timestamps absolute|relative`).
//!
//! ## Supported Lines
//! - Classic CAN: `<time> <ch> <id>[x] Rx|Tx d <dlc> <bytes...>`
//! - CAN-FD: `<time> CANFD <ch> Rx|Tx <id>[x] [name] <brs> <esi> <dlc> <len> <bytes...>`
//!
//! Remote frames, error frames and every other event are skipped. Channels are
//! numbered from 1 in the file and from 0 in the produced frames.

use crate::formats::FrameSource;
use crate::types::{ExportError, Frame, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const DATE_FORMATS: [&str; 2] = ["%a %b %d %I:%M:%S%.f %p %Y", "%a %b %d %H:%M:%S%.f %Y"];

/// ASC file parser
pub struct AscParser;

impl AscParser {
    /// Open an ASC file and return an iterator over its CAN frames
    pub fn parse(path: &Path) -> Result<AscFrameIterator<BufReader<File>>> {
        log::info!("Parsing ASC file: {:?}", path);

        if !path.exists() {
            return Err(ExportError::LogParseError(format!(
                "ASC file not found: {:?}",
                path
            )));
        }

        let file = File::open(path).map_err(|e| {
            ExportError::LogParseError(format!("Failed to open ASC file: {}", e))
        })?;

        Ok(AscFrameIterator::new(BufReader::new(file)))
    }
}

/// Iterator over the CAN frames of an ASC log
pub struct AscFrameIterator<R: BufRead> {
    reader: R,
    buffer: Vec<u8>,
    line_number: usize,
    /// Radix of identifiers, DLCs and payload bytes
    base: u32,
    relative_timestamps: bool,
    /// Recording start in nanoseconds since epoch
    start_ns: u64,
    /// Time of the previous event, in seconds from the start
    last_offset: f64,
    skipped_events: HashSet<String>,
}

impl<R: BufRead> AscFrameIterator<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            line_number: 0,
            base: 16,
            relative_timestamps: false,
            start_ns: 0,
            last_offset: 0.0,
            skipped_events: HashSet::new(),
        }
    }

    /// Next line of the file, decoded as Latin-1 when it is not UTF-8
    fn read_line(&mut self) -> Option<Result<String>> {
        self.buffer.clear();
        match self.reader.read_until(b'\n', &mut self.buffer) {
            Ok(0) => None,
            Ok(_) => {
                self.line_number += 1;
                let line = match std::str::from_utf8(&self.buffer) {
                    Ok(line) => line.to_string(),
                    Err(_) => {
                        log::debug!(
                            "ASC line {} is not UTF-8, reading as Latin-1",
                            self.line_number
                        );
                        self.buffer.iter().map(|&b| b as char).collect()
                    }
                };
                Some(Ok(line))
            }
            Err(e) => Some(Err(ExportError::IoError(e))),
        }
    }

    fn parse_header(&mut self, line: &str) {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("date") => {
                let date = line
                    .trim_start()
                    .strip_prefix("date")
                    .unwrap_or_default()
                    .trim();
                match parse_date(date) {
                    Some(start) => {
                        self.start_ns = start
                            .timestamp_nanos_opt()
                            .and_then(|ns| u64::try_from(ns).ok())
                            .unwrap_or(0);
                        log::debug!("ASC recording started at {}", start);
                    }
                    None => {
                        log::warn!("Unrecognized ASC date '{}', timestamps start at epoch", date)
                    }
                }
            }
            Some("base") => {
                while let Some(token) = tokens.next() {
                    match token {
                        "hex" => self.base = 16,
                        "dec" => self.base = 10,
                        "timestamps" => {
                            self.relative_timestamps = tokens.next() == Some("relative");
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    fn timestamp_ns(&mut self, time: f64) -> u64 {
        let offset = if self.relative_timestamps {
            self.last_offset + time
        } else {
            time
        };
        self.last_offset = offset;
        self.start_ns + (offset.max(0.0) * 1e9).round() as u64
    }

    fn number(&self, token: &str) -> Result<u32> {
        u32::from_str_radix(token, self.base)
            .map_err(|_| self.error(format!("invalid number '{}'", token)))
    }

    fn byte(&self, token: &str) -> Result<u8> {
        u8::from_str_radix(token, self.base)
            .map_err(|_| self.error(format!("invalid data byte '{}'", token)))
    }

    fn bytes(&self, tokens: &[&str], count: usize) -> Result<Vec<u8>> {
        if tokens.len() < count {
            return Err(self.error(format!(
                "expected {} data bytes, found {}",
                count,
                tokens.len()
            )));
        }
        tokens[..count].iter().map(|t| self.byte(t)).collect()
    }

    /// Identifier token, with a trailing `x` marking an extended identifier
    fn identifier(&self, token: &str) -> Result<(u32, bool)> {
        match token.strip_suffix('x').or_else(|| token.strip_suffix('X')) {
            Some(id) => Ok((self.number(id)?, true)),
            None => Ok((self.number(token)?, false)),
        }
    }

    fn error(&self, reason: String) -> ExportError {
        ExportError::LogParseError(format!("ASC line {}: {}", self.line_number, reason))
    }

    fn skip(&mut self, event: &str) -> Option<Result<Frame>> {
        if self.skipped_events.insert(event.to_string()) {
            log::debug!("Skipping ASC event type '{}'", event);
        }
        None
    }

    /// Parse an event line; `None` for events that are not CAN data frames
    fn parse_event(&mut self, time: f64, tokens: &[&str]) -> Option<Result<Frame>> {
        match tokens {
            ["CANFD", channel, _direction, rest @ ..] => {
                let timestamp_ns = self.timestamp_ns(time);
                let Ok(channel) = channel.parse::<u8>() else {
                    return self.skip(&format!("CANFD on channel {}", channel));
                };
                Some(self.parse_fd(timestamp_ns, channel, rest))
            }
            [channel, id, _direction, "d", dlc, data @ ..] => {
                let timestamp_ns = self.timestamp_ns(time);
                let Ok(channel) = channel.parse::<u8>() else {
                    return self.skip(channel);
                };
                Some(self.parse_classic(timestamp_ns, channel, id, dlc, data))
            }
            [channel, _id, _direction, "r", ..] => {
                self.timestamp_ns(time);
                self.skip(&format!("remote frame on {}", channel))
            }
            [first, second, ..] => {
                self.timestamp_ns(time);
                let event = if first.parse::<u8>().is_ok() { second } else { first };
                self.skip(event)
            }
            [event] => {
                self.timestamp_ns(time);
                self.skip(event)
            }
            [] => {
                self.timestamp_ns(time);
                None
            }
        }
    }

    fn parse_classic(
        &self,
        timestamp_ns: u64,
        channel: u8,
        id: &str,
        dlc: &str,
        data: &[&str],
    ) -> Result<Frame> {
        let (can_id, is_extended) = self.identifier(id)?;
        let dlc = self.number(dlc)? as usize;
        let data = self.bytes(data, dlc.min(8))?;

        let mut frame =
            Frame::new(timestamp_ns, channel.saturating_sub(1), can_id, data).with_dlc(dlc);
        frame.is_extended = is_extended;
        Ok(frame)
    }

    fn parse_fd(&self, timestamp_ns: u64, channel: u8, tokens: &[&str]) -> Result<Frame> {
        let [id, rest @ ..] = tokens else {
            return Err(self.error("truncated CANFD event".to_string()));
        };
        let (can_id, is_extended) = self.identifier(id)?;

        // An optional symbolic name precedes the BRS flag
        let rest = match rest.first() {
            Some(&"0") | Some(&"1") => rest,
            Some(_) => &rest[1..],
            None => rest,
        };
        let [_brs, _esi, _dlc, length, data @ ..] = rest else {
            return Err(self.error("truncated CANFD event".to_string()));
        };
        let length = length
            .parse::<usize>()
            .map_err(|_| self.error(format!("invalid data length '{}'", length)))?;
        let data = self.bytes(data, length)?;

        let mut frame = Frame::new(timestamp_ns, channel.saturating_sub(1), can_id, data);
        frame.is_extended = is_extended;
        frame.is_fd = true;
        Ok(frame)
    }
}

impl<R: BufRead> Iterator for AscFrameIterator<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.read_line()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };

            let tokens: Vec<&str> = line.split_whitespace().collect();
            let Some((first, rest)) = tokens.split_first() else {
                continue;
            };

            match first.parse::<f64>() {
                Ok(time) => {
                    if let Some(result) = self.parse_event(time, rest) {
                        return Some(result);
                    }
                }
                Err(_) => self.parse_header(&line),
            }
        }
    }
}

impl FrameSource for AscFrameIterator<BufReader<File>> {
    fn open(path: &Path) -> Result<Self> {
        AscParser::parse(path)
    }
}

fn parse_date(date: &str) -> Option<DateTime<Utc>> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(date, format).ok())
        .map(|naive| naive.and_utc())
}
