//! The connection object.
//!
//! A [`Connection`] owns one account's credentials and, while open, a stack
//! of stream layers. Protocol code reads lines and writes commands through
//! it without knowing whether the bytes cross a socket, a tunnel command,
//! TLS, a SASL security layer or a deflate layer.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use postern_account::Account;
use postern_sasl::{Mechanism, Session};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::compress::DeflateStream;
use crate::context::SessionContext;
use crate::error::{Error, Result};
use crate::raw;
use crate::sasl::{self, SaslStream};
use crate::stream::Stream;
use crate::tls;
use crate::tunnel::{self, Tunnel};

/// Initial capacity of the read buffer.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MB

/// Strength reported for a tunnel declared secure.
const SECURE_TUNNEL_SSF: u32 = 1;

/// How a connection reaches its server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Plain TCP, possibly upgraded later with STARTTLS.
    Plain,
    /// Standard input and output of a shell command.
    Tunnel,
    /// TCP with TLS from the first byte.
    Tls,
}

/// A connection to a mail server.
///
/// All operations take `&mut self`, so a connection is driven by one task
/// at a time. I/O errors, interrupts and handshake failures close the
/// connection before they are returned.
#[derive(Debug)]
pub struct Connection {
    account: Account,
    kind: TransportKind,
    ctx: SessionContext,
    stream: Option<Stream>,
    buffer: BytesMut,
    ssf: u32,
    peer: Option<SocketAddr>,
}

/// Closes a stream left over from a failed open.
async fn release(stream: Stream) {
    if let Err(e) = stream.close().await {
        debug!(error = %e, "Error while releasing stream");
    }
}

impl Connection {
    /// Creates an unopened connection.
    #[must_use]
    pub fn new(account: Account, kind: TransportKind, ctx: SessionContext) -> Self {
        Self {
            account,
            kind,
            ctx,
            stream: None,
            buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
            ssf: 0,
            peer: None,
        }
    }

    /// Opens the connection.
    ///
    /// Runs the pre-connect command first, if one is configured; its failure
    /// fails the open. Opening an open connection does nothing.
    ///
    /// # Errors
    ///
    /// Returns the first error of the pre-connect command, name resolution,
    /// connect, tunnel start or TLS handshake. Nothing stays open on error.
    pub async fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        if self.account.host().is_empty() {
            return Err(Error::NoHost);
        }
        if let Some(command) = &self.ctx.settings.preconnect {
            tunnel::preconnect(command).await?;
        }

        let (stream, ssf) = match self.kind {
            TransportKind::Plain => (self.connect_tcp().await?, 0),
            TransportKind::Tunnel => {
                let command = self
                    .ctx
                    .settings
                    .tunnel
                    .as_deref()
                    .ok_or(Error::MissingSetting("tunnel command"))?;
                let ssf = if self.ctx.settings.tunnel_is_secure {
                    SECURE_TUNNEL_SSF
                } else {
                    0
                };
                (Stream::Tunnel(Tunnel::open(command)?), ssf)
            }
            TransportKind::Tls => {
                let mut slot = Some(self.connect_tcp().await?);
                let result = tls::handshake(&mut slot, &mut self.account, &self.ctx).await;
                match (result, slot) {
                    (Ok(ssf), Some(stream)) => (stream, ssf),
                    (result, leftover) => {
                        self.peer = None;
                        if let Some(stream) = leftover {
                            release(stream).await;
                        }
                        return Err(result.err().unwrap_or_else(|| Error::NotOpen(self.account.host().to_string())));
                    }
                }
            }
        };

        self.stream = Some(stream);
        self.ssf = ssf;
        self.buffer.clear();
        info!(host = self.account.host(), port = self.account.port(), ssf, "Connected");
        Ok(())
    }

    async fn connect_tcp(&mut self) -> Result<Stream> {
        let settings = &self.ctx.settings;
        let tcp = raw::connect(
            self.account.host(),
            self.account.port(),
            settings.use_ipv6,
            settings.connect_timeout_duration(),
            &self.ctx.interrupt,
        )
        .await?;
        self.peer = tcp.peer_addr().ok();
        Ok(Stream::Tcp(tcp))
    }

    /// Closes the connection. Closing a closed connection succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Subprocess`] if a tunnel command exited
    /// unsuccessfully. The connection is closed either way.
    pub async fn close(&mut self) -> Result<()> {
        self.buffer.clear();
        self.ssf = 0;
        self.peer = None;
        match self.stream.take() {
            Some(stream) => {
                debug!(host = self.account.host(), "Closing connection");
                stream.close().await
            }
            None => Ok(()),
        }
    }

    /// Closes the connection if `err` requires it, then returns `err`.
    async fn fail(&mut self, err: Error) -> Error {
        if err.is_fatal() {
            if let Err(e) = self.close().await {
                debug!(error = %e, "Error while closing after failure");
            }
        }
        err
    }

    /// Reads more bytes into the buffer. Returns 0 at end of stream.
    async fn fill(&mut self) -> Result<usize> {
        let result = {
            let Some(stream) = self.stream.as_mut() else {
                return Err(Error::NotOpen(self.account.host().to_string()));
            };
            let interrupt = &self.ctx.interrupt;
            if interrupt.is_triggered() {
                Err(Error::Interrupted)
            } else {
                if self.buffer.capacity() - self.buffer.len() < DEFAULT_BUFFER_SIZE / 2 {
                    self.buffer.reserve(DEFAULT_BUFFER_SIZE);
                }
                tokio::select! {
                    biased;
                    () = interrupt.triggered() => Err(Error::Interrupted),
                    read = stream.read_buf(&mut self.buffer) => read.map_err(Error::Io),
                }
            }
        };
        match result {
            Ok(n) => Ok(n),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Reads up to `buf.len()` bytes. Buffered bytes are returned first.
    /// Returns 0 at end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not open, the read fails, or
    /// the interrupt fires.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.buffer.is_empty() && self.fill().await? == 0 {
            return Ok(0);
        }
        let n = self.buffer.len().min(buf.len());
        buf[..n].copy_from_slice(&self.buffer.split_to(n));
        Ok(n)
    }

    /// Writes all of `data` and flushes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not open, the write fails, or
    /// the interrupt fires.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let result = {
            let Some(stream) = self.stream.as_mut() else {
                return Err(Error::NotOpen(self.account.host().to_string()));
            };
            let interrupt = &self.ctx.interrupt;
            if interrupt.is_triggered() {
                Err(Error::Interrupted)
            } else {
                tokio::select! {
                    biased;
                    () = interrupt.triggered() => Err(Error::Interrupted),
                    written = async {
                        stream.write_all(data).await?;
                        stream.flush().await
                    } => written.map_err(Error::Io),
                }
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Reads one line, without its `\n` and any `\r` before it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the peer closes the connection first,
    /// and [`Error::Protocol`] for lines longer than 1 MB.
    pub async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut searched = 0;
        loop {
            if let Some(pos) = self.buffer[searched..].iter().position(|&b| b == b'\n') {
                let mut line = self.buffer.split_to(searched + pos + 1);
                line.truncate(searched + pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(line.to_vec());
            }
            searched = self.buffer.len();
            if searched > MAX_LINE_LENGTH {
                return Err(Error::Protocol(format!(
                    "line too long: over {MAX_LINE_LENGTH} bytes"
                )));
            }

            if self.fill().await? == 0 {
                let host = self.account.host().to_string();
                debug!(host = %host, "Connection closed by peer");
                if let Err(e) = self.close().await {
                    debug!(error = %e, "Error while closing after end of stream");
                }
                return Err(Error::Closed(host));
            }
        }
    }

    /// Waits up to `timeout` for data.
    ///
    /// Returns true when bytes are buffered or the peer has closed the
    /// stream, so the next read will not block.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not open, the read fails, or
    /// the interrupt fires.
    pub async fn poll(&mut self, timeout: Duration) -> Result<bool> {
        if !self.buffer.is_empty() {
            return Ok(true);
        }
        if self.stream.is_none() {
            return Err(Error::NotOpen(self.account.host().to_string()));
        }
        match tokio::time::timeout(timeout, self.fill()).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(false),
        }
    }

    /// Discards everything the server has already sent.
    pub async fn drain(&mut self) {
        let mut discarded = self.buffer.len();
        self.buffer.clear();
        while self.stream.is_some() {
            match tokio::time::timeout(Duration::ZERO, self.fill()).await {
                Ok(Ok(n)) if n > 0 => {
                    discarded += n;
                    self.buffer.clear();
                }
                _ => break,
            }
        }
        if discarded > 0 {
            debug!(host = self.account.host(), discarded, "Drained connection");
        }
    }

    /// Upgrades an open plain connection to TLS in place.
    ///
    /// Closing the connection later ends the TLS session and the socket
    /// together; the next open is plain again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if the stream already carries TLS or a
    /// higher layer, and the handshake's error otherwise. A failed handshake
    /// leaves the connection closed.
    pub async fn starttls(&mut self) -> Result<()> {
        match &self.stream {
            None => return Err(Error::NotOpen(self.account.host().to_string())),
            Some(Stream::Tcp(_) | Stream::Tunnel(_)) => {}
            Some(_) => return Err(Error::NotSupported("STARTTLS on a secured stream".into())),
        }
        if !self.buffer.is_empty() {
            warn!(
                host = self.account.host(),
                discarded = self.buffer.len(),
                "Discarding plaintext received before STARTTLS"
            );
            self.buffer.clear();
        }

        match tls::handshake(&mut self.stream, &mut self.account, &self.ctx).await {
            Ok(ssf) => {
                self.ssf = ssf;
                Ok(())
            }
            Err(e) => {
                if let Err(close) = self.close().await {
                    debug!(error = %close, "Error while closing after failed STARTTLS");
                }
                Err(e)
            }
        }
    }

    /// Starts a SASL exchange for `mechanism`.
    ///
    /// Missing credentials are resolved first. The connection's current
    /// strength is passed to the mechanism as the external strength.
    ///
    /// # Errors
    ///
    /// Returns an error if a required credential cannot be resolved, the
    /// account declares no service, or the mechanism cannot start.
    pub async fn sasl_session(&mut self, mechanism: Mechanism) -> Result<Session> {
        let creds = sasl::credentials(&mut self.account, &self.ctx.resolver, mechanism, self.ssf).await?;
        Ok(Session::new(mechanism, creds)?)
    }

    /// Picks a mechanism from the server's list and starts it.
    ///
    /// # Errors
    ///
    /// See [`postern_sasl::suggest_mechanism`] and [`Connection::sasl_session`].
    pub async fn sasl_start<S: AsRef<str>>(&mut self, offered: &[S], preferred: Option<&str>) -> Result<Session> {
        let mechanism = postern_sasl::suggest_mechanism(offered, preferred)?;
        debug!(host = self.account.host(), mechanism = %mechanism, "Selected SASL mechanism");
        self.sasl_session(mechanism).await
    }

    /// Installs the security layer negotiated by a finished session.
    ///
    /// Without a layer, or with a zero-strength one, the stream is left as
    /// is. Otherwise all later traffic is protected by the layer and its
    /// strength is added to the connection's.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the session has not finished.
    pub fn install_sasl(&mut self, session: &mut Session) -> Result<()> {
        if !session.is_complete() {
            return Err(Error::Protocol("SASL exchange not finished".into()));
        }
        let Some(layer) = session.take_layer().filter(|layer| layer.ssf() > 0) else {
            debug!(host = self.account.host(), "No SASL security layer");
            return Ok(());
        };
        let Some(stream) = self.stream.take() else {
            return Err(Error::NotOpen(self.account.host().to_string()));
        };
        if !self.buffer.is_empty() {
            warn!(host = self.account.host(), "Unprotected data buffered when the SASL layer started");
        }

        let wrapped = SaslStream::new(stream, layer);
        self.ssf += wrapped.ssf();
        debug!(host = self.account.host(), ssf = self.ssf, "SASL security layer installed");
        self.stream = Some(Stream::Sasl(Box::new(wrapped)));
        Ok(())
    }

    /// Starts deflate compression in both directions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if compression is already active.
    pub fn compress(&mut self) -> Result<()> {
        let Some(stream) = self.stream.take() else {
            return Err(Error::NotOpen(self.account.host().to_string()));
        };
        if stream.is_compressed() {
            self.stream = Some(stream);
            return Err(Error::NotSupported("compression is already active".into()));
        }
        debug!(host = self.account.host(), "Compression enabled");
        self.stream = Some(Stream::Compressed(Box::new(DeflateStream::new(stream))));
        Ok(())
    }

    /// Returns the server host.
    #[must_use]
    pub fn host(&self) -> &str {
        self.account.host()
    }

    /// Returns the server port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.account.port()
    }

    /// Returns the security strength factor: the TLS key size, 1 for a
    /// secure tunnel, plus any SASL layer strength. 0 when closed.
    #[must_use]
    pub const fn ssf(&self) -> u32 {
        self.ssf
    }

    /// Returns the transport kind.
    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Returns the account.
    #[must_use]
    pub const fn account(&self) -> &Account {
        &self.account
    }

    /// Returns the account for modification.
    pub const fn account_mut(&mut self) -> &mut Account {
        &mut self.account
    }

    /// Returns the session context.
    #[must_use]
    pub const fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Returns true while the connection is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Returns true if the traffic is carried over TLS.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.stream.as_ref().is_some_and(Stream::is_tls)
    }

    /// Returns the remote address of a TCP connection.
    #[must_use]
    pub const fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Returns the number of bytes read but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
