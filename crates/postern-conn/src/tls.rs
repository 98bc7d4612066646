//! TLS handshake over an open stream.

use std::sync::Arc;

use postern_account::Account;
use postern_tls::{TlsClient, client_key_is_encrypted, ssf_for_suite};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::context::SessionContext;
use crate::error::{Error, Result};
use crate::stream::Stream;

fn peer_alert(e: &std::io::Error) -> Option<String> {
    match e.get_ref()?.downcast_ref::<rustls::Error>()? {
        rustls::Error::AlertReceived(alert) => Some(format!("{alert:?}")),
        _ => None,
    }
}

/// Runs a TLS client handshake on the stream in `slot`.
///
/// On success `slot` holds the encrypted stream and the symmetric key size
/// of the negotiated cipher suite in bits is returned. On failure `slot`
/// still holds the plain stream unless the handshake was interrupted, so
/// the caller can close it.
///
/// # Errors
///
/// Returns [`Error::CertRejected`] if a certificate was refused,
/// [`Error::Handshake`] for any other handshake failure, and
/// [`Error::Interrupted`] if the interrupt fires first.
pub(crate) async fn handshake(
    slot: &mut Option<Stream>,
    account: &mut Account,
    ctx: &SessionContext,
) -> Result<u32> {
    let mut key_pass = None;
    if let Some(path) = &ctx.policy.client_cert
        && client_key_is_encrypted(path)?
    {
        ctx.resolver.pass(account).await?;
        key_pass = account.pass().map(|pass| Zeroizing::new(pass.to_owned()));
    }

    let host = account.host().to_string();
    let client = TlsClient::new(
        &ctx.policy,
        &host,
        &ctx.store,
        Arc::clone(&ctx.prompt),
        key_pass.as_deref().map(String::as_str),
    )?;
    let Some(stream) = slot.take() else {
        return Err(Error::NotOpen(host));
    };
    let connector = TlsConnector::from(client.config());
    debug!(host = %host, "Starting TLS handshake");

    let result = tokio::select! {
        biased;
        () = ctx.interrupt.triggered() => return Err(Error::Interrupted),
        result = connector.connect(client.server_name(), stream).into_fallible() => result,
    };

    let tls = match result {
        Ok(tls) => tls,
        Err((e, stream)) => {
            *slot = Some(stream);
            if let Some(rejection) = client.outcome().rejection() {
                warn!(host = %host, index = rejection.index, errors = %rejection.errors, "Certificate rejected");
                return Err(Error::CertRejected {
                    host,
                    index: rejection.index,
                    errors: rejection.errors,
                });
            }
            return Err(Error::Handshake {
                alert: peer_alert(&e),
                message: e.to_string(),
                host,
            });
        }
    };

    let session = tls.get_ref().1;
    let suite = session.negotiated_cipher_suite();
    let ssf = suite.map_or(0, ssf_for_suite);
    debug!(
        host = %host,
        ssf,
        suite = ?suite.map(|s| s.suite()),
        version = ?session.protocol_version(),
        "TLS established"
    );
    *slot = Some(Stream::Tls(Box::new(tls)));
    Ok(ssf)
}
