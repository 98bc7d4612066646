//! The layered stream beneath a connection.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use crate::compress::DeflateStream;
use crate::error::Result;
use crate::sasl::SaslStream;
use crate::tunnel::Tunnel;

/// A transport, possibly wrapped by TLS, SASL or compression layers.
///
/// Each wrapping layer owns the one beneath it.
#[derive(Debug)]
pub(crate) enum Stream {
    /// Plain TCP socket.
    Tcp(TcpStream),
    /// Pipes to a tunnel command.
    Tunnel(Tunnel),
    /// TLS session (boxed to reduce enum size).
    Tls(Box<TlsStream<Self>>),
    /// SASL security layer.
    Sasl(Box<SaslStream<Self>>),
    /// Deflate compression.
    Compressed(Box<DeflateStream<Self>>),
}

impl Stream {
    /// Returns true if a TLS session is anywhere in the stack.
    pub(crate) fn is_tls(&self) -> bool {
        match self {
            Self::Tcp(_) | Self::Tunnel(_) => false,
            Self::Tls(_) => true,
            Self::Sasl(s) => s.get_ref().is_tls(),
            Self::Compressed(s) => s.get_ref().is_tls(),
        }
    }

    /// Returns true if the top layer is compression.
    pub(crate) const fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed(_))
    }

    /// Tears the stack down from the top.
    ///
    /// TLS sends close-notify without waiting for the peer's. A tunnel waits
    /// for its command and reports a failed exit.
    pub(crate) fn close(self) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            match self {
                Self::Tcp(mut tcp) => {
                    if let Err(e) = tcp.shutdown().await {
                        debug!(error = %e, "Socket shutdown failed");
                    }
                    Ok(())
                }
                Self::Tunnel(tunnel) => tunnel.close().await,
                Self::Tls(mut tls) => {
                    if let Err(e) = tls.shutdown().await {
                        debug!(error = %e, "TLS close-notify failed");
                    }
                    let (inner, _) = tls.into_inner();
                    inner.close().await
                }
                Self::Sasl(mut sasl) => {
                    if let Err(e) = sasl.flush().await {
                        debug!(error = %e, "Flushing SASL layer failed");
                    }
                    sasl.into_inner().close().await
                }
                Self::Compressed(mut deflate) => {
                    if let Err(e) = deflate.flush().await {
                        debug!(error = %e, "Flushing compression layer failed");
                    }
                    deflate.into_inner().close().await
                }
            }
        })
    }
}

impl AsyncRead for Stream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tunnel(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Self::Sasl(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Self::Compressed(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tunnel(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Self::Sasl(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Self::Compressed(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            Self::Tunnel(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Self::Sasl(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Self::Compressed(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tunnel(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Self::Sasl(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Self::Compressed(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
