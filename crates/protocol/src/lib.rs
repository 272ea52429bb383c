//! Job-string and wire framing for file-part uploads.
//!
//! # Wire format
//!
//! ```text
//! JOB (queue -> worker):
//!   fileID|fileName|partNumber|partSize|startByteIndex|endByteIndex
//!
//! PROXY TUNNEL (worker -> proxy, optional):
//!   CONNECT <host>:<port> HTTP/1.1\r\n\r\n
//!
//! PER PART (worker -> server):
//!   1|fileID|partNumber|partSize\n
//!   [partSize bytes: raw part data]
//! ```
//!
//! Nothing is ever read back: neither the proxy's status line nor any
//! server acknowledgement.

pub mod error;
pub mod part;
pub mod wire;

pub use error::ProtocolError;
pub use part::PartDescriptor;
pub use wire::{connect_request, encode_part_header};

/// Separator between fields of a job string and of the part header.
pub const FIELD_DELIMITER: char = '|';

/// Message type tag: a file part upload is beginning.
pub const MSG_PART_UPLOAD: u8 = 1;

/// Default port of the HTTP forward proxy.
pub const DEFAULT_PROXY_PORT: u16 = 80;
