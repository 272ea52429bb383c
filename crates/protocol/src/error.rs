//! Error types for job parsing and framing.

/// Errors produced while parsing a job string or framing a message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("expected {expected} fields, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("empty file name")]
    EmptyFileName,

    #[error("invalid {field}: {value:?}")]
    InvalidInteger { field: &'static str, value: String },

    #[error("byte range {start}..{end} does not match part size {part_size}")]
    RangeMismatch { start: u64, end: u64, part_size: u64 },
}
