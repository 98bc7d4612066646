//! SASL glue: credential gathering and the security-layer stream.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, BytesMut};
use postern_account::oauth::{self, OAuthMechanism};
use postern_account::{Account, Resolver};
use postern_sasl::{Credentials, Mechanism, SecurityLayer};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::Result;

const READ_CHUNK: usize = 8192;

/// Gathers the properties `mechanism` needs from `account`.
///
/// The login and password are resolved only for password-based mechanisms.
/// Bearer mechanisms run the account's token command. The user, when known,
/// becomes the authorization identity and the EXTERNAL identity. An account
/// without a service is refused before anything is resolved.
pub(crate) async fn credentials(
    account: &mut Account,
    resolver: &Resolver,
    mechanism: Mechanism,
    external_ssf: u32,
) -> Result<Credentials> {
    let Some(service) = account.service().as_str() else {
        return Err(postern_sasl::Error::NoService.into());
    };
    if mechanism.needs_authid() {
        resolver.login(account).await?;
    }
    if mechanism.needs_password() {
        resolver.pass(account).await?;
    }
    let bearer = match mechanism {
        Mechanism::OAuthBearer => oauth::payload(account, resolver, OAuthMechanism::OAuthBearer).await?,
        Mechanism::XOAuth2 => oauth::payload(account, resolver, OAuthMechanism::XOAuth2).await?,
        _ => Zeroizing::default(),
    };

    debug!(mechanism = %mechanism, host = account.host(), external_ssf, "Prepared SASL credentials");
    Ok(Credentials {
        authid: account.login().unwrap_or_default().to_string(),
        authzid: account.user().unwrap_or_default().to_string(),
        password: Zeroizing::new(account.pass().unwrap_or_default().to_string()),
        service: service.to_string(),
        hostname: account.host().to_string(),
        external_ssf,
        external_id: account.user().map(str::to_owned),
        bearer,
    })
}

fn layer_error(e: postern_sasl::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// A stream protected by a negotiated SASL security layer.
///
/// Outbound data is cut into chunks no larger than the layer allows and
/// encoded one record per chunk. Inbound bytes are fed to the layer as they
/// arrive; plaintext is handed out once whole records have been decoded.
pub struct SaslStream<S> {
    inner: S,
    layer: Box<dyn SecurityLayer>,
    plain: BytesMut,
    outbound: BytesMut,
    scratch: Box<[u8]>,
}

impl<S> std::fmt::Debug for SaslStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslStream")
            .field("layer", &self.layer)
            .field("buffered", &self.plain.len())
            .field("pending", &self.outbound.len())
            .finish_non_exhaustive()
    }
}

impl<S> SaslStream<S> {
    /// Wraps `inner` with `layer`.
    pub(crate) fn new(inner: S, layer: Box<dyn SecurityLayer>) -> Self {
        Self {
            inner,
            layer,
            plain: BytesMut::new(),
            outbound: BytesMut::new(),
            scratch: vec![0; READ_CHUNK].into_boxed_slice(),
        }
    }

    /// Returns the layer's strength.
    pub(crate) fn ssf(&self) -> u32 {
        self.layer.ssf()
    }

    /// Returns a reference to the wrapped stream.
    pub(crate) const fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Returns the wrapped stream.
    pub(crate) fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncWrite + Unpin> SaslStream<S> {
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

impl<S: AsyncRead + Unpin> AsyncRead for SaslStream<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        while this.plain.is_empty() {
            let mut raw = ReadBuf::new(&mut this.scratch);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut raw))?;
            if raw.filled().is_empty() {
                return Poll::Ready(Ok(()));
            }
            let decoded = this.layer.decode(raw.filled()).map_err(layer_error)?;
            this.plain.extend_from_slice(&decoded);
        }

        let n = this.plain.len().min(buf.remaining());
        buf.put_slice(&this.plain[..n]);
        this.plain.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for SaslStream<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let chunk = &buf[..buf.len().min(this.layer.max_outbuf().max(1))];
        let encoded = this.layer.encode(chunk).map_err(layer_error)?;
        this.outbound.extend_from_slice(&encoded);
        // Progress is best effort; flush completes the record.
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(chunk.len()))
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
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use postern_account::{Field, FieldSource, Prompt, Service};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    /// Frames records as a length byte followed by the payload, bit-flipped.
    struct FlipLayer {
        pending: Vec<u8>,
    }

    impl SecurityLayer for FlipLayer {
        fn ssf(&self) -> u32 {
            1
        }

        fn max_outbuf(&self) -> usize {
            4
        }

        fn encode(&mut self, plain: &[u8]) -> postern_sasl::Result<Vec<u8>> {
            let mut out = vec![u8::try_from(plain.len()).unwrap()];
            out.extend(plain.iter().map(|b| !b));
            Ok(out)
        }

        fn decode(&mut self, input: &[u8]) -> postern_sasl::Result<Vec<u8>> {
            self.pending.extend_from_slice(input);
            let mut out = Vec::new();
            while let Some(&len) = self.pending.first() {
                let len = usize::from(len);
                if self.pending.len() < len + 1 {
                    break;
                }
                out.extend(self.pending[1..=len].iter().map(|b| !b));
                self.pending.drain(..=len);
            }
            Ok(out)
        }
    }

    fn layer() -> Box<dyn SecurityLayer> {
        Box::new(FlipLayer { pending: Vec::new() })
    }

    #[tokio::test]
    async fn test_write_splits_into_records() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut stream = SaslStream::new(client, layer());
        stream.write_all(b"abcdef").await.unwrap();
        stream.flush().await.unwrap();

        let mut raw = [0u8; 8];
        server.read_exact(&mut raw).await.unwrap();
        assert_eq!(raw[0], 4);
        assert_eq!(raw[5], 2);
        assert_eq!(!raw[1], b'a');
        assert_eq!(!raw[7], b'f');
    }

    #[tokio::test]
    async fn test_read_reassembles_split_records() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut stream = SaslStream::new(client, layer());

        let mut record = vec![3u8];
        record.extend(b"xyz".iter().map(|b| !b));
        server.write_all(&record[..2]).await.unwrap();
        let reader = tokio::spawn(async move {
            let mut out = [0u8; 3];
            stream.read_exact(&mut out).await.unwrap();
            out
        });
        tokio::task::yield_now().await;
        server.write_all(&record[2..]).await.unwrap();

        assert_eq!(&reader.await.unwrap(), b"xyz");
    }

    #[tokio::test]
    async fn test_read_eof() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut stream = SaslStream::new(client, layer());
        let mut out = Vec::new();
        assert_eq!(stream.read_to_end(&mut out).await.unwrap(), 0);
    }

    struct Fixed;

    impl FieldSource for Fixed {
        fn get_field(&self, field: Field, _account: &Account) -> Option<String> {
            match field {
                Field::Login => Some("alice".into()),
                Field::Pass => Some("s3cret".into()),
                _ => None,
            }
        }
    }

    #[tokio::test]
    async fn test_credentials_for_password_mechanism() {
        let mut account = Account::new(Service::Imap, "imap.example.org")
            .with_user("shared@example.org")
            .with_field_source(Arc::new(Fixed));
        let creds = credentials(&mut account, &Resolver::new(), Mechanism::Plain, 256)
            .await
            .unwrap();
        assert_eq!(creds.authid, "alice");
        assert_eq!(creds.authzid, "shared@example.org");
        assert_eq!(creds.password.as_str(), "s3cret");
        assert_eq!(creds.service, "imap");
        assert_eq!(creds.external_ssf, 256);
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl FieldSource for Counting {
        fn get_field(&self, _field: Field, _account: &Account) -> Option<String> {
            None
        }

        fn prompt(&self, _prompt: &Prompt<'_>) -> Option<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Some("typed".into())
        }
    }

    #[tokio::test]
    async fn test_credentials_refused_without_service() {
        let source = Arc::new(Counting::default());
        let mut account =
            Account::new(Service::None, "mail.example.org").with_field_source(source.clone());
        let err = credentials(&mut account, &Resolver::new(), Mechanism::Plain, 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ConfigMissing);
        assert_eq!(source.0.load(Ordering::SeqCst), 0);
        assert!(account.pass().is_none());
    }

    #[tokio::test]
    async fn test_credentials_external_skips_password() {
        let mut account = Account::new(Service::Smtp, "smtp.example.org").with_user("bob");
        let creds = credentials(&mut account, &Resolver::new(), Mechanism::External, 128)
            .await
            .unwrap();
        assert!(creds.password.is_empty());
        assert_eq!(creds.external_id.as_deref(), Some("bob"));
        assert!(account.pass().is_none());
    }
}
