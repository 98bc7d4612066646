//! COMPRESS=DEFLATE layer (RFC 4978).

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, BytesMut};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

const CHUNK: usize = 8192;

fn delta(after: u64, before: u64) -> usize {
    usize::try_from(after.saturating_sub(before)).unwrap_or(usize::MAX)
}

fn codec_error(e: impl std::error::Error + Send + Sync + 'static) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// A stream compressed with raw deflate in both directions.
///
/// Every write is followed by a sync flush so the peer can decode it
/// without waiting for more data.
pub struct DeflateStream<S> {
    inner: S,
    deflate: Compress,
    inflate: Decompress,
    plain: BytesMut,
    outbound: BytesMut,
    scratch: Box<[u8]>,
}

impl<S> std::fmt::Debug for DeflateStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeflateStream")
            .field("deflated_in", &self.deflate.total_in())
            .field("deflated_out", &self.deflate.total_out())
            .field("inflated_in", &self.inflate.total_in())
            .field("inflated_out", &self.inflate.total_out())
            .finish_non_exhaustive()
    }
}

impl<S> DeflateStream<S> {
    /// Wraps `inner`.
    pub(crate) fn new(inner: S) -> Self {
        Self {
            inner,
            deflate: Compress::new(Compression::default(), false),
            inflate: Decompress::new(false),
            plain: BytesMut::new(),
            outbound: BytesMut::new(),
            scratch: vec![0; CHUNK].into_boxed_slice(),
        }
    }

    /// Returns a reference to the wrapped stream.
    pub(crate) const fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Logs the compression ratios and returns the wrapped stream.
    pub(crate) fn into_inner(self) -> S {
        debug!(
            sent_plain = self.deflate.total_in(),
            sent_wire = self.deflate.total_out(),
            received_wire = self.inflate.total_in(),
            received_plain = self.inflate.total_out(),
            "Compression layer closed"
        );
        self.inner
    }

    fn inflate_all(&mut self, mut input: &[u8]) -> io::Result<()> {
        loop {
            let mut out = Vec::with_capacity(CHUNK * 4);
            let (before_in, before_out) = (self.inflate.total_in(), self.inflate.total_out());
            let status = self
                .inflate
                .decompress_vec(input, &mut out, FlushDecompress::Sync)
                .map_err(codec_error)?;
            let consumed = delta(self.inflate.total_in(), before_in);
            let produced = delta(self.inflate.total_out(), before_out);
            input = &input[consumed.min(input.len())..];
            self.plain.extend_from_slice(&out);

            let output_full = out.len() == out.capacity();
            if status == Status::StreamEnd || (consumed == 0 && produced == 0) {
                return Ok(());
            }
            if input.is_empty() && !output_full {
                return Ok(());
            }
        }
    }

    fn deflate_all(&mut self, mut input: &[u8]) -> io::Result<()> {
        loop {
            let mut out = Vec::with_capacity(input.len() + 64);
            let before_in = self.deflate.total_in();
            self.deflate
                .compress_vec(input, &mut out, FlushCompress::Sync)
                .map_err(codec_error)?;
            let consumed = delta(self.deflate.total_in(), before_in);
            input = &input[consumed.min(input.len())..];
            self.outbound.extend_from_slice(&out);

            if input.is_empty() && out.len() < out.capacity() {
                return Ok(());
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> DeflateStream<S> {
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.outbound.is_empty() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.outbound))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.outbound.advance(n);
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for DeflateStream<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        while this.plain.is_empty() {
            let mut scratch = std::mem::take(&mut this.scratch);
            let mut raw = ReadBuf::new(&mut scratch);
            let polled = Pin::new(&mut this.inner).poll_read(cx, &mut raw);
            let filled = raw.filled().len();
            let result = match polled {
                Poll::Ready(Ok(())) if filled == 0 => Some(Ok(())),
                Poll::Ready(Ok(())) => this.inflate_all(&scratch[..filled]).err().map(Err),
                Poll::Ready(Err(e)) => Some(Err(e)),
                Poll::Pending => {
                    this.scratch = scratch;
                    return Poll::Pending;
                }
            };
            this.scratch = scratch;
            if let Some(result) = result {
                return Poll::Ready(result);
            }
        }

        let n = this.plain.len().min(buf.remaining());
        buf.put_slice(&this.plain[..n]);
        this.plain.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for DeflateStream<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        this.deflate_all(buf)?;
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use flate2::write::DeflateEncoder;
    use std::io::Write;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

    use super::*;

    fn deflate_sync(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.flush().unwrap();
        encoder.get_ref().clone()
    }

    #[tokio::test]
    async fn test_reads_scripted_peer() {
        let wire = deflate_sync(b"* OK compression active\r\n* 3 EXISTS\r\n");
        let (head, tail) = wire.split_at(wire.len() / 2);
        let mock = tokio_test::io::Builder::new().read(head).read(tail).build();

        let mut reader = BufReader::new(DeflateStream::new(mock));
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "* OK compression active\r\n");
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "* 3 EXISTS\r\n");
    }

    #[tokio::test]
    async fn test_each_write_is_decodable() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = DeflateStream::new(client);
        let mut reader = DeflateStream::new(server);

        writer.write_all(b"a1 NOOP\r\n").await.unwrap();
        writer.flush().await.unwrap();
        let mut got = [0u8; 9];
        reader.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"a1 NOOP\r\n");

        let long = "x".repeat(100_000);
        writer.write_all(long.as_bytes()).await.unwrap();
        writer.flush().await.unwrap();
        let mut got = vec![0u8; long.len()];
        reader.read_exact(&mut got).await.unwrap();
        assert_eq!(got, long.as_bytes());
    }

    #[tokio::test]
    async fn test_garbage_is_an_error() {
        let mock = tokio_test::io::Builder::new().read(&[0xff; 16]).build();
        let mut stream = DeflateStream::new(mock);
        let mut out = [0u8; 16];
        let err = stream.read(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
