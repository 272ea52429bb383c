//! The part descriptor: one queued unit of upload work.

use std::fmt;
use std::str::FromStr;

use crate::FIELD_DELIMITER;
use crate::error::ProtocolError;

/// Number of `|`-separated fields in a job string.
pub const JOB_FIELD_COUNT: usize = 6;

/// A contiguous byte range of a local file, uploaded as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartDescriptor {
    /// Logical file being uploaded.
    pub file_id: u64,
    /// Local path opened for reading.
    pub file_name: String,
    /// Ordinal of this segment within the file.
    pub part_number: u64,
    /// Number of bytes in this segment.
    pub part_size: u64,
    /// Absolute offset of the first byte in the source file.
    pub start_byte_index: u64,
    /// Absolute offset one past the last byte in the source file.
    pub end_byte_index: u64,
    /// Bytes handed to the transport so far for this part.
    pub bytes_written: u64,
}

impl PartDescriptor {
    /// Parses a job string of the form
    /// `fileID|fileName|partNumber|partSize|startByteIndex|endByteIndex`.
    ///
    /// A single trailing line terminator is ignored. The byte range must
    /// span exactly `partSize` bytes.
    pub fn parse(job: &str) -> Result<Self, ProtocolError> {
        let job = job
            .strip_suffix('\n')
            .map(|s| s.strip_suffix('\r').unwrap_or(s))
            .unwrap_or(job);

        let fields: Vec<&str> = job.split(FIELD_DELIMITER).collect();
        if fields.len() != JOB_FIELD_COUNT {
            return Err(ProtocolError::FieldCount {
                expected: JOB_FIELD_COUNT,
                got: fields.len(),
            });
        }

        let file_id = parse_field("fileID", fields[0])?;
        let file_name = fields[1];
        if file_name.is_empty() {
            return Err(ProtocolError::EmptyFileName);
        }
        let part_number = parse_field("partNumber", fields[2])?;
        let part_size = parse_field("partSize", fields[3])?;
        let start_byte_index = parse_field("startByteIndex", fields[4])?;
        let end_byte_index = parse_field("endByteIndex", fields[5])?;

        if end_byte_index.checked_sub(start_byte_index) != Some(part_size) {
            return Err(ProtocolError::RangeMismatch {
                start: start_byte_index,
                end: end_byte_index,
                part_size,
            });
        }

        Ok(Self {
            file_id,
            file_name: file_name.to_string(),
            part_number,
            part_size,
            start_byte_index,
            end_byte_index,
            bytes_written: 0,
        })
    }

    /// True once the transport has accepted every byte of the range.
    pub fn is_complete(&self) -> bool {
        self.start_byte_index + self.bytes_written >= self.end_byte_index
    }

    /// Bytes still to be handed to the transport.
    pub fn remaining(&self) -> u64 {
        self.part_size.saturating_sub(self.bytes_written)
    }

    /// Records `n` more bytes accepted by the transport.
    pub fn record_written(&mut self, n: u64) {
        self.bytes_written += n;
    }
}

impl FromStr for PartDescriptor {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PartDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "file {} part {} ({} bytes @ {})",
            self.file_id, self.part_number, self.part_size, self.start_byte_index
        )
    }
}

fn parse_field(field: &'static str, value: &str) -> Result<u64, ProtocolError> {
    value.parse().map_err(|_| ProtocolError::InvalidInteger {
        field,
        value: value.to_string(),
    })
}
