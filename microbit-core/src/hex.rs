//! Structural validation of Intel HEX files.
//!
//! A file is checked in full before anything is written to the board. Every
//! rule violation is reported with the 1-indexed line it occurred on, since
//! the message ends up in front of the user.
//!
//! Besides the standard record types `00`..`05`, the block records `0A`..`0E`
//! of the micro:bit Universal Hex format are accepted, so files produced for
//! both board revisions validate.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// Shortest record: `:` + count(2) + address(4) + type(2) + checksum(2).
pub const MIN_RECORD_LEN: usize = 11;
/// Longest record: a full 255-byte payload.
pub const MAX_RECORD_LEN: usize = MIN_RECORD_LEN + 255 * 2;

const DATA: u8 = 0x00;
const END_OF_FILE: u8 = 0x01;
const EXTENDED_SEGMENT_ADDRESS: u8 = 0x02;
const START_SEGMENT_ADDRESS: u8 = 0x03;
const EXTENDED_LINEAR_ADDRESS: u8 = 0x04;
const START_LINEAR_ADDRESS: u8 = 0x05;
const UNIVERSAL_BLOCK_RECORDS: std::ops::RangeInclusive<u8> = 0x0A..=0x0E;

/// A violated rule, and where.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HexError {
    #[error("cannot read file: {0}")]
    Unreadable(String),
    #[error("file is empty")]
    Empty,
    #[error("line {line}: record does not start with ':'")]
    MissingStartCode { line: usize },
    #[error(
        "line {line}: record is {length} characters long, expected {min} to {max} with an even number of hex digits",
        min = MIN_RECORD_LEN,
        max = MAX_RECORD_LEN
    )]
    BadLength { line: usize, length: usize },
    #[error("line {line}: invalid hex character {character:?}")]
    NotHex { line: usize, character: char },
    #[error("line {line}: byte count says {declared} data bytes but the record holds {actual}")]
    ByteCountMismatch {
        line: usize,
        declared: usize,
        actual: usize,
    },
    #[error("line {line}: checksum is {found:02X}, expected {expected:02X}")]
    ChecksumMismatch { line: usize, expected: u8, found: u8 },
    #[error("line {line}: unknown record type {record_type:02X}")]
    UnknownRecordType { line: usize, record_type: u8 },
    #[error("line {line}: record type {record_type:02X} cannot carry {length} data bytes")]
    BadRecordLength {
        line: usize,
        record_type: u8,
        length: usize,
    },
    #[error("line {line}: record found after the end-of-file record")]
    RecordAfterEndOfFile { line: usize },
    #[error("line {line}: missing end-of-file record")]
    MissingEndOfFile { line: usize },
}

impl HexError {
    /// The 1-indexed line the violation was found on, if it is tied to one.
    pub fn line(&self) -> Option<usize> {
        match *self {
            HexError::Unreadable(_) | HexError::Empty => None,
            HexError::MissingStartCode { line }
            | HexError::BadLength { line, .. }
            | HexError::NotHex { line, .. }
            | HexError::ByteCountMismatch { line, .. }
            | HexError::ChecksumMismatch { line, .. }
            | HexError::UnknownRecordType { line, .. }
            | HexError::BadRecordLength { line, .. }
            | HexError::RecordAfterEndOfFile { line }
            | HexError::MissingEndOfFile { line } => Some(line),
        }
    }
}

/// What a valid file contained.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HexSummary {
    /// Number of records, including the end-of-file record.
    pub records: usize,
    /// Payload bytes carried by data records.
    pub data_bytes: u64,
    /// Whether Universal Hex block records were present.
    pub universal: bool,
}

pub type ValidationResult = Result<HexSummary, HexError>;

/// Validates the file at `path`. Reads the whole file and has no side effects.
pub fn validate(path: &Path) -> ValidationResult {
    let file = File::open(path).map_err(|e| HexError::Unreadable(e.to_string()))?;
    validate_reader(BufReader::new(file))
}

/// Validates Intel HEX text from any buffered reader.
///
/// Lines are read as raw bytes, so a binary file is reported as a bad
/// character on a specific line rather than as unreadable.
pub fn validate_reader<R: BufRead>(reader: R) -> ValidationResult {
    let mut summary = HexSummary::default();
    let mut end_of_file_seen = false;
    let mut last_record_line = 0;

    for (index, line) in reader.split(b'\n').enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|e| HexError::Unreadable(e.to_string()))?;
        let text = String::from_utf8_lossy(&line);

        let record = text.trim_end();
        if record.is_empty() {
            continue;
        }
        if end_of_file_seen {
            return Err(HexError::RecordAfterEndOfFile { line: line_no });
        }
        last_record_line = line_no;

        let record_type = check_record(record, line_no, &mut summary)?;
        summary.records += 1;
        if record_type == END_OF_FILE {
            end_of_file_seen = true;
        }
    }

    if summary.records == 0 {
        return Err(HexError::Empty);
    }
    if !end_of_file_seen {
        return Err(HexError::MissingEndOfFile {
            line: last_record_line,
        });
    }
    Ok(summary)
}

/// Checks a single non-empty record and returns its type.
fn check_record(record: &str, line: usize, summary: &mut HexSummary) -> Result<u8, HexError> {
    let Some(digits) = record.strip_prefix(':') else {
        return Err(HexError::MissingStartCode { line });
    };

    // Bytes that were not UTF-8 show up here as U+FFFD.
    if let Some(character) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(HexError::NotHex { line, character });
    }

    if record.len() < MIN_RECORD_LEN || record.len() > MAX_RECORD_LEN || digits.len() % 2 != 0 {
        return Err(HexError::BadLength {
            line,
            length: record.len(),
        });
    }

    let bytes = hex::decode(digits).map_err(|_| HexError::BadLength {
        line,
        length: record.len(),
    })?;

    // count, address (2), type, data..., checksum
    let declared = bytes[0] as usize;
    let actual = bytes.len() - 5;
    if declared != actual {
        return Err(HexError::ByteCountMismatch {
            line,
            declared,
            actual,
        });
    }

    let (body, checksum) = bytes.split_at(bytes.len() - 1);
    let expected = checksum_of(body);
    if checksum[0] != expected {
        return Err(HexError::ChecksumMismatch {
            line,
            expected,
            found: checksum[0],
        });
    }

    let record_type = bytes[3];
    let required_len = match record_type {
        DATA => None,
        END_OF_FILE => Some(0),
        EXTENDED_SEGMENT_ADDRESS | EXTENDED_LINEAR_ADDRESS => Some(2),
        START_SEGMENT_ADDRESS | START_LINEAR_ADDRESS => Some(4),
        t if UNIVERSAL_BLOCK_RECORDS.contains(&t) => {
            summary.universal = true;
            None
        }
        _ => return Err(HexError::UnknownRecordType { line, record_type }),
    };
    if let Some(required) = required_len {
        if actual != required {
            return Err(HexError::BadRecordLength {
                line,
                record_type,
                length: actual,
            });
        }
    }

    if record_type == DATA {
        summary.data_bytes += actual as u64;
    }
    Ok(record_type)
}

/// Two's complement of the byte sum, modulo 256.
pub fn checksum_of(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    sum.wrapping_neg()
}
