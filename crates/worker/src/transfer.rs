//! Transfer engine: announces a part and streams its bytes, absorbing
//! partial writes.

use std::io::{ErrorKind, SeekFrom};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use partup_protocol::PartDescriptor;
use partup_protocol::wire::write_part_header;

use crate::connection::with_timeout;
use crate::error::WorkerError;

/// Opens the part's source file and seeks to its first byte.
pub async fn open_part_file(part: &PartDescriptor) -> Result<File, WorkerError> {
    let mut file = File::open(&part.file_name).await?;
    file.seek(SeekFrom::Start(part.start_byte_index)).await?;
    Ok(file)
}

/// Streams parts through a buffer allocated once per worker.
pub struct TransferEngine {
    buffer: Vec<u8>,
    write_timeout: Option<Duration>,
}

impl TransferEngine {
    pub fn new(transmission_unit: usize, write_timeout: Option<Duration>) -> Self {
        Self {
            buffer: vec![0u8; transmission_unit],
            write_timeout,
        }
    }

    pub fn transmission_unit(&self) -> usize {
        self.buffer.len()
    }

    /// Rejects parts that do not fit in the transfer buffer.
    pub fn check_fits(&self, part: &PartDescriptor) -> Result<(), WorkerError> {
        if part.part_size > self.buffer.len() as u64 {
            return Err(WorkerError::PartTooLarge {
                part_size: part.part_size,
                unit: self.buffer.len(),
            });
        }
        Ok(())
    }

    /// Sends the header for `part`, then its `part_size` bytes read from
    /// `file`, which must already be positioned at `start_byte_index`.
    ///
    /// The file is read once into the buffer; the buffer is then drained
    /// with as many writes as the transport needs. Returns the number of
    /// body bytes written.
    pub async fn send_part<W, R>(
        &mut self,
        writer: &mut W,
        file: &mut R,
        part: &mut PartDescriptor,
    ) -> Result<u64, WorkerError>
    where
        W: AsyncWrite + Unpin,
        R: AsyncRead + Unpin,
    {
        self.check_fits(part)?;
        let size = part.part_size as usize;

        with_timeout(self.write_timeout, write_part_header(writer, part)).await?;
        self.fill_buffer(file, size).await?;

        while !part.is_complete() {
            let start = (part.bytes_written as usize).min(size);
            let accepted =
                with_timeout(self.write_timeout, writer.write(&self.buffer[start..size])).await?;
            if accepted == 0 {
                return Err(std::io::Error::from(ErrorKind::WriteZero).into());
            }
            part.record_written(accepted as u64);
            trace!(
                file_id = part.file_id,
                part_number = part.part_number,
                accepted,
                written = part.bytes_written,
                "chunk written"
            );
        }

        with_timeout(self.write_timeout, writer.flush()).await?;
        Ok(part.bytes_written)
    }

    async fn fill_buffer<R: AsyncRead + Unpin>(
        &mut self,
        file: &mut R,
        size: usize,
    ) -> Result<(), WorkerError> {
        let mut filled = 0;
        while filled < size {
            let n = file
                .read(&mut self.buffer[filled..size])
                .await
                .map_err(WorkerError::Read)?;
            if n == 0 {
                return Err(WorkerError::ShortRead {
                    read: filled as u64,
                    expected: size as u64,
                });
            }
            filled += n;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Accepts at most `max_chunk` bytes per write call.
    struct TrickleWriter {
        out: Vec<u8>,
        max_chunk: usize,
        writes: usize,
    }

    impl TrickleWriter {
        fn new(max_chunk: usize) -> Self {
            Self {
                out: Vec::new(),
                max_chunk,
                writes: 0,
            }
        }
    }

    impl AsyncWrite for TrickleWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let n = buf.len().min(self.max_chunk);
            self.out.extend_from_slice(&buf[..n]);
            self.writes += 1;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Fails every write with `kind`.
    struct FailingWriter(ErrorKind);

    impl AsyncWrite for FailingWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::from(self.0)))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn write_source(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn documented_example_streams_range() {
        let dir = tempfile::tempdir().unwrap();
        let data = pattern(4096);
        let path = write_source(&dir, "report.bin", &data);

        let mut part = PartDescriptor::parse(&format!("42|{path}|3|1024|3072|4096")).unwrap();
        let mut file = open_part_file(&part).await.unwrap();

        let mut engine = TransferEngine::new(4096, None);
        let mut out = Vec::new();
        let written = engine.send_part(&mut out, &mut file, &mut part).await.unwrap();

        assert_eq!(written, 1024);
        assert_eq!(part.bytes_written, 1024);
        assert!(part.is_complete());

        let header = b"1|42|3|1024\n";
        assert_eq!(&out[..header.len()], header);
        assert_eq!(&out[header.len()..], &data[3072..4096]);
    }

    #[tokio::test]
    async fn one_byte_writes_still_complete() {
        let dir = tempfile::tempdir().unwrap();
        let data = pattern(300);
        let path = write_source(&dir, "trickle.bin", &data);

        let mut part = PartDescriptor::parse(&format!("1|{path}|0|200|100|300")).unwrap();
        let mut file = open_part_file(&part).await.unwrap();

        let mut engine = TransferEngine::new(256, None);
        let mut writer = TrickleWriter::new(1);
        let written = engine
            .send_part(&mut writer, &mut file, &mut part)
            .await
            .unwrap();

        let header = b"1|1|0|200\n";
        assert_eq!(written, 200);
        assert_eq!(part.bytes_written, 200);
        assert_eq!(writer.writes, header.len() + 200);
        assert_eq!(&writer.out[..header.len()], header);
        assert_eq!(&writer.out[header.len()..], &data[100..300]);
    }

    #[tokio::test]
    async fn uneven_partial_writes() {
        let dir = tempfile::tempdir().unwrap();
        let data = pattern(1000);
        let path = write_source(&dir, "uneven.bin", &data);

        let mut part = PartDescriptor::parse(&format!("2|{path}|1|1000|0|1000")).unwrap();
        let mut file = open_part_file(&part).await.unwrap();

        let mut engine = TransferEngine::new(1000, None);
        let mut writer = TrickleWriter::new(333);
        engine
            .send_part(&mut writer, &mut file, &mut part)
            .await
            .unwrap();

        let header_len = "1|2|1|1000\n".len();
        assert_eq!(writer.out.len(), header_len + 1000);
        assert_eq!(&writer.out[header_len..], &data[..]);
    }

    #[tokio::test]
    async fn engine_reused_across_parts() {
        let dir = tempfile::tempdir().unwrap();
        let data = pattern(64);
        let path = write_source(&dir, "two.bin", &data);
        let mut engine = TransferEngine::new(32, None);

        let mut first = PartDescriptor::parse(&format!("5|{path}|0|32|0|32")).unwrap();
        let mut file = open_part_file(&first).await.unwrap();
        let mut out = Vec::new();
        engine.send_part(&mut out, &mut file, &mut first).await.unwrap();
        drop(file);

        let mut second = PartDescriptor::parse(&format!("5|{path}|1|32|32|64")).unwrap();
        assert_eq!(second.bytes_written, 0);
        let mut file = open_part_file(&second).await.unwrap();
        let mut out2 = Vec::new();
        engine
            .send_part(&mut out2, &mut file, &mut second)
            .await
            .unwrap();

        assert_eq!(engine.transmission_unit(), 32);
        assert_eq!(&out2[.."1|5|1|32\n".len()], b"1|5|1|32\n");
        assert_eq!(&out2["1|5|1|32\n".len()..], &data[32..64]);
        assert_eq!(second.bytes_written, 32);
    }

    #[tokio::test]
    async fn zero_size_part_sends_header_only() {
        let mut part = PartDescriptor::parse("3|unused|7|0|10|10").unwrap();
        let mut engine = TransferEngine::new(16, None);
        let mut out = Vec::new();
        let mut empty: &[u8] = &[];

        let written = engine.send_part(&mut out, &mut empty, &mut part).await.unwrap();
        assert_eq!(written, 0);
        assert_eq!(out, b"1|3|7|0\n");
    }

    #[tokio::test]
    async fn oversized_part_rejected_before_io() {
        let mut part = PartDescriptor::parse("1|f|0|100|0|100").unwrap();
        let mut engine = TransferEngine::new(64, None);
        let mut out = Vec::new();
        let mut src: &[u8] = &[0u8; 100];

        let err = engine
            .send_part(&mut out, &mut src, &mut part)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkerError::PartTooLarge {
                part_size: 100,
                unit: 64
            }
        ));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn short_source_reports_short_read() {
        let mut part = PartDescriptor::parse("1|f|0|10|0|10").unwrap();
        let mut engine = TransferEngine::new(16, None);
        let mut out = Vec::new();
        let mut src: &[u8] = b"abcd";

        let err = engine
            .send_part(&mut out, &mut src, &mut part)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkerError::ShortRead {
                read: 4,
                expected: 10
            }
        ));
        assert!(err.breaks_connection());
        // Header went out before the read.
        assert_eq!(out, b"1|1|0|10\n");
        assert_eq!(part.bytes_written, 0);
    }

    #[tokio::test]
    async fn write_error_surfaces() {
        let mut part = PartDescriptor::parse("1|f|0|4|0|4").unwrap();
        let mut engine = TransferEngine::new(16, None);
        let mut writer = FailingWriter(ErrorKind::BrokenPipe);
        let mut src: &[u8] = b"abcd";

        let err = engine
            .send_part(&mut writer, &mut src, &mut part)
            .await
            .unwrap_err();
        assert!(err.breaks_connection());
        assert_eq!(part.bytes_written, 0);
    }

    #[tokio::test]
    async fn open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.bin");
        let part =
            PartDescriptor::parse(&format!("1|{}|0|1|0|1", missing.to_string_lossy())).unwrap();

        let err = open_part_file(&part).await.unwrap_err();
        match err {
            WorkerError::Io(e) => assert_eq!(e.kind(), ErrorKind::NotFound),
            other => panic!("unexpected error: {other}"),
        }
    }
}
