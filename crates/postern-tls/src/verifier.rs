//! rustls integration of the chain verifier.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{verify_server_cert_signed_by_trust_anchor, verify_server_name};
use rustls::crypto::{WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, warn};

use crate::cert::CertInfo;
use crate::policy::TlsPolicy;
use crate::prompt::TrustPrompt;
use crate::status::CertErrorSet;
use crate::store::TrustStore;
use crate::verify::{ChainCheck, ChainVerifier, Rejection};

/// Records why the last handshake's certificate check failed.
///
/// rustls only surfaces a generic error from the handshake; the connection
/// layer reads the rejection from here to report which certificate was
/// refused.
#[derive(Debug, Clone, Default)]
pub struct VerifyOutcome(Arc<Mutex<Option<Rejection>>>);

impl VerifyOutcome {
    /// Returns the recorded rejection, if the certificate check failed.
    #[must_use]
    pub fn rejection(&self) -> Option<Rejection> {
        *self.0.lock()
    }

    fn record(&self, rejection: Rejection) {
        *self.0.lock() = Some(rejection);
    }
}

/// Maps a rustls verification error to problem bits.
#[allow(deprecated)]
fn status_bits(error: &rustls::Error) -> CertErrorSet {
    match error {
        rustls::Error::InvalidCertificate(cert) => match cert {
            CertificateError::Revoked => CertErrorSet::REVOKED,
            CertificateError::UnknownIssuer | CertificateError::BadSignature => CertErrorSet::NOT_TRUSTED,
            CertificateError::UnsupportedSignatureAlgorithm
            | CertificateError::UnsupportedSignatureAlgorithmContext { .. }
            | CertificateError::UnsupportedSignatureAlgorithmForPublicKeyContext { .. } => {
                CertErrorSet::INSECURE_ALG
            }
            CertificateError::Other(other) => {
                let text = format!("{other:?}");
                if text.contains("EndEntityUsedAsCa") || text.contains("CaUsedAsEndEntity") {
                    CertErrorSet::SIGNER_NOT_CA
                } else {
                    CertErrorSet::OTHER
                }
            }
            _ => CertErrorSet::OTHER,
        },
        _ => CertErrorSet::OTHER,
    }
}

const fn is_date_error(error: &rustls::Error) -> bool {
    matches!(
        error,
        rustls::Error::InvalidCertificate(
            CertificateError::Expired
                | CertificateError::ExpiredContext { .. }
                | CertificateError::NotValidYet
                | CertificateError::NotValidYetContext { .. }
        )
    )
}

/// Chain checks backed by webpki.
struct WebPkiCheck<'a> {
    roots: &'a RootCertStore,
    leaf: &'a CertificateDer<'a>,
    intermediates: &'a [CertificateDer<'a>],
    server_name: &'a ServerName<'a>,
    now: UnixTime,
    /// A time inside the leaf's validity period.
    within_validity: UnixTime,
    algorithms: &'a WebPkiSupportedAlgorithms,
}

impl WebPkiCheck<'_> {
    fn verify_at(&self, roots: &RootCertStore, parsed: &ParsedCertificate<'_>, now: UnixTime) -> Result<(), rustls::Error> {
        verify_server_cert_signed_by_trust_anchor(parsed, roots, self.intermediates, now, self.algorithms.all)
    }
}

impl ChainCheck for WebPkiCheck<'_> {
    fn status(&mut self, accepted: &[CertificateDer<'static>]) -> CertErrorSet {
        let roots = if accepted.is_empty() {
            Cow::Borrowed(self.roots)
        } else {
            let mut roots = self.roots.clone();
            for cert in accepted {
                if let Err(e) = roots.add(cert.clone()) {
                    debug!(error = %e, "Accepted certificate is not usable as an anchor");
                }
            }
            Cow::Owned(roots)
        };

        let parsed = match ParsedCertificate::try_from(self.leaf) {
            Ok(parsed) => parsed,
            Err(e) => return status_bits(&e),
        };

        // Dates are checked per certificate, so only the first verdict
        // unaffected by them counts.
        let mut result = self.verify_at(&roots, &parsed, self.now);
        if result.as_ref().is_err_and(is_date_error) {
            result = self.verify_at(&roots, &parsed, self.within_validity);
        }
        match result {
            Ok(()) => CertErrorSet::empty(),
            Err(e) if is_date_error(&e) => CertErrorSet::empty(),
            Err(e) => {
                debug!(error = %e, "Chain does not verify");
                status_bits(&e)
            }
        }
    }

    fn hostname_matches(&self, leaf: &CertInfo) -> bool {
        let library = ParsedCertificate::try_from(leaf.der())
            .and_then(|parsed| verify_server_name(&parsed, self.server_name))
            .is_ok();
        library || leaf.matches_hostname(&self.server_name.to_str())
    }
}

/// The certificate verifier installed into every client configuration.
pub(crate) struct InteractiveVerifier {
    pub(crate) host: String,
    pub(crate) policy: TlsPolicy,
    pub(crate) roots: RootCertStore,
    pub(crate) store: TrustStore,
    pub(crate) prompt: Arc<dyn TrustPrompt>,
    pub(crate) algorithms: WebPkiSupportedAlgorithms,
    pub(crate) outcome: VerifyOutcome,
}

impl std::fmt::Debug for InteractiveVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveVerifier")
            .field("host", &self.host)
            .field("roots", &self.roots.len())
            .finish_non_exhaustive()
    }
}

fn unix_time(seconds: i64) -> UnixTime {
    UnixTime::since_unix_epoch(Duration::from_secs(u64::try_from(seconds).unwrap_or(0)))
}

impl ServerCertVerifier for InteractiveVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let chain = std::iter::once(end_entity)
            .chain(intermediates)
            .map(CertInfo::from_der)
            .collect::<crate::Result<Vec<_>>>()
            .map_err(|e| {
                warn!(host = %self.host, error = %e, "Unreadable server certificate");
                rustls::Error::InvalidCertificate(CertificateError::BadEncoding)
            })?;

        let leaf = &chain[0];
        let midpoint = leaf.not_before() + (leaf.not_after() - leaf.not_before()) / 2;
        let mut check = WebPkiCheck {
            roots: &self.roots,
            leaf: end_entity,
            intermediates,
            server_name,
            now,
            within_validity: unix_time(midpoint),
            algorithms: &self.algorithms,
        };
        let verifier = ChainVerifier {
            host: &self.host,
            policy: &self.policy,
            store: &self.store,
            prompt: self.prompt.as_ref(),
            now: i64::try_from(now.as_secs()).unwrap_or(i64::MAX),
        };

        match verifier.verify(&chain, &mut check) {
            Ok(()) => Ok(ServerCertVerified::assertion()),
            Err(rejection) => {
                warn!(host = %self.host, index = rejection.index, errors = %rejection.errors, "Certificate rejected");
                self.outcome.record(rejection);
                Err(rustls::Error::InvalidCertificate(
                    CertificateError::ApplicationVerificationFailure,
                ))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_bits() {
        let err = rustls::Error::InvalidCertificate;
        assert_eq!(status_bits(&err(CertificateError::Revoked)), CertErrorSet::REVOKED);
        assert_eq!(status_bits(&err(CertificateError::UnknownIssuer)), CertErrorSet::NOT_TRUSTED);
        assert_eq!(status_bits(&err(CertificateError::BadSignature)), CertErrorSet::NOT_TRUSTED);
        assert_eq!(status_bits(&err(CertificateError::BadEncoding)), CertErrorSet::OTHER);
        assert_eq!(status_bits(&rustls::Error::DecryptError), CertErrorSet::OTHER);
    }

    #[test]
    fn test_date_errors_detected() {
        assert!(is_date_error(&rustls::Error::InvalidCertificate(CertificateError::Expired)));
        assert!(is_date_error(&rustls::Error::InvalidCertificate(CertificateError::NotValidYet)));
        assert!(!is_date_error(&rustls::Error::InvalidCertificate(CertificateError::Revoked)));
    }

    #[test]
    fn test_outcome_is_shared() {
        let outcome = VerifyOutcome::default();
        let other = outcome.clone();
        assert!(other.rejection().is_none());
        outcome.record(Rejection {
            index: 1,
            errors: CertErrorSet::NOT_TRUSTED,
        });
        assert_eq!(other.rejection().map(|r| r.index), Some(1));
    }
}
