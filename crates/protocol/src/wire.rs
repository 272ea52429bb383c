//! Outbound framing: the part announcement header and the proxy
//! CONNECT request.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;
use crate::part::PartDescriptor;
use crate::{FIELD_DELIMITER, MSG_PART_UPLOAD};

/// Encodes the header announcing a part: `1|fileID|partNumber|partSize\n`.
pub fn encode_part_header(part: &PartDescriptor) -> String {
    format!(
        "{MSG_PART_UPLOAD}{d}{}{d}{}{d}{}\n",
        part.file_id,
        part.part_number,
        part.part_size,
        d = FIELD_DELIMITER,
    )
}

/// Writes the part announcement header and flushes.
pub async fn write_part_header<W: AsyncWrite + Unpin>(
    writer: &mut W,
    part: &PartDescriptor,
) -> Result<(), ProtocolError> {
    let header = encode_part_header(part);
    writer.write_all(header.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Builds the HTTP CONNECT request that opens a tunnel to `host:port`.
pub fn connect_request(host: &str, port: u16) -> String {
    format!("CONNECT {host}:{port} HTTP/1.1\r\n\r\n")
}

/// Writes the CONNECT request and flushes. The proxy's reply is left
/// unread on the stream.
pub async fn write_connect_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    host: &str,
    port: u16,
) -> Result<(), ProtocolError> {
    writer.write_all(connect_request(host, port).as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
