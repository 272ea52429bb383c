//! Error types for the upload worker.

use std::io::ErrorKind;

use partup_protocol::ProtocolError;

/// Errors produced by an upload worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("operation timed out")]
    Timeout,

    #[error("not connected")]
    NotConnected,

    #[error("part of {part_size} bytes exceeds transmission unit of {unit} bytes")]
    PartTooLarge { part_size: u64, unit: usize },

    #[error("reading part data failed: {0}")]
    Read(std::io::Error),

    #[error("file ended after {read} of {expected} bytes")]
    ShortRead { read: u64, expected: u64 },

    #[error("gave up after {0} failed connection attempts")]
    RetriesExhausted(u32),
}

impl WorkerError {
    /// True when the error leaves the transport unusable, so the
    /// connection has to be dropped and re-established.
    pub fn breaks_connection(&self) -> bool {
        match self {
            WorkerError::Io(e) => is_broken_pipe(e.kind()),
            WorkerError::Protocol(ProtocolError::Io(e)) => is_broken_pipe(e.kind()),
            // The header is already out, so the server expects body bytes.
            WorkerError::Read(_) | WorkerError::ShortRead { .. } => true,
            WorkerError::Timeout | WorkerError::NotConnected => true,
            _ => false,
        }
    }
}

fn is_broken_pipe(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
            | ErrorKind::WriteZero
            | ErrorKind::TimedOut
    )
}
