//! Two-pass certificate chain verification.
//!
//! The first pass walks the chain from the leaf toward the root without
//! asking anything; a chain whose certificates are all free of problems, or
//! which reaches a pinned certificate with nothing wrong below it, is
//! accepted silently. Otherwise the second pass walks from the root toward
//! the leaf, asking the user about every certificate that still has
//! problems. An accepted signer is added to the session's anchors and the
//! chain is checked again, which may settle the remaining certificates.

use rustls::pki_types::CertificateDer;
use tracing::{debug, info, warn};

use crate::cert::{CertInfo, FingerprintAlg};
use crate::pinned::PinnedFile;
use crate::policy::TlsPolicy;
use crate::prompt::{TrustDecision, TrustPrompt};
use crate::status::CertErrorSet;
use crate::store::TrustStore;

/// Chain-wide checks delegated to the TLS library.
pub(crate) trait ChainCheck {
    /// Verifies the chain against the configured anchors plus `accepted`,
    /// ignoring validity dates. Returns the problems found.
    fn status(&mut self, accepted: &[CertificateDer<'static>]) -> CertErrorSet;

    /// Returns true if the library accepts the leaf for the server name.
    fn hostname_matches(&self, leaf: &CertInfo) -> bool;
}

/// The certificate the user rejected, or the first one that could not be
/// accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    /// Position in the chain; 0 is the leaf.
    pub index: usize,
    /// Problems with that certificate.
    pub errors: CertErrorSet,
}

/// Outcome of checking one certificate in the interactive pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Accepted,
    Skipped,
    Rejected(CertErrorSet),
}

pub(crate) struct ChainVerifier<'a> {
    pub(crate) host: &'a str,
    pub(crate) policy: &'a TlsPolicy,
    pub(crate) store: &'a TrustStore,
    pub(crate) prompt: &'a dyn TrustPrompt,
    pub(crate) now: i64,
}

impl ChainVerifier<'_> {
    /// Runs both passes over `chain`, leaf first.
    pub(crate) fn verify(&self, chain: &[CertInfo], check: &mut dyn ChainCheck) -> Result<(), Rejection> {
        let mut pinned = self.load_pinned();
        let mut certstat = check.status(&[]);
        debug!(host = self.host, chain = chain.len(), status = %certstat, "Verifying certificate chain");

        let mut failures = 0usize;
        let mut max_preauth_pass: Option<usize> = None;
        for (i, cert) in chain.iter().enumerate() {
            let (errors, saved) = self.preauth(cert, i, certstat, pinned.as_ref(), check);
            if !errors.is_empty() {
                failures += 1;
            }
            if failures == 0 {
                max_preauth_pass = Some(i);
            }
            if saved {
                if failures == 0 {
                    debug!(host = self.host, index = i, "Chain accepted by saved certificate");
                    return Ok(());
                }
                break;
            }
        }
        if failures == 0 && !chain.is_empty() {
            return Ok(());
        }

        let mut accepted = Vec::new();
        let mut result = Err(Rejection {
            index: 0,
            errors: certstat,
        });
        for i in (0..chain.len()).rev() {
            let step = self.check_one(chain, i, certstat, pinned.as_mut(), check);
            match step {
                Step::Rejected(errors) => return Err(Rejection { index: i, errors }),
                Step::Skipped => continue,
                Step::Accepted => result = Ok(()),
            }

            if i > 0 {
                accepted.push(chain[i].der().clone());
                certstat = check.status(&accepted);
                let lower_passed = max_preauth_pass.is_some_and(|max| max + 1 >= i);
                if certstat.is_empty() && lower_passed {
                    debug!(host = self.host, index = i, "Chain verifies after accepting signer");
                    return Ok(());
                }
            }
        }
        result
    }

    fn load_pinned(&self) -> Option<PinnedFile> {
        let path = self.policy.certificate_file.as_ref()?;
        Some(PinnedFile::load(path).unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring unreadable certificate file");
            PinnedFile::parse(path, b"")
        }))
    }

    /// Non-interactive checks of one certificate. Returns its problems and
    /// whether it was found among the saved certificates.
    fn preauth(
        &self,
        cert: &CertInfo,
        index: usize,
        certstat: CertErrorSet,
        pinned: Option<&PinnedFile>,
        check: &dyn ChainCheck,
    ) -> (CertErrorSet, bool) {
        let mut errors = CertErrorSet::empty();
        if self.policy.verify_dates {
            errors.insert(cert.date_errors(self.now));
        }

        if index == 0
            && self.policy.verify_host
            && !check.hostname_matches(cert)
            && !pinned.is_some_and(|p| {
                p.has_host_override(self.host, &cert.fingerprint(FingerprintAlg::Md5))
            })
        {
            errors.insert(CertErrorSet::HOSTNAME);
        }

        let mut status = certstat;
        if status.contains(CertErrorSet::REVOKED) {
            errors.insert(CertErrorSet::REVOKED);
            status.remove(CertErrorSet::REVOKED);
        }

        // Bad dates and revocation must be confirmed again every time.
        let saved = pinned.is_some_and(|p| p.contains(cert.der())) || self.store.contains(cert.der());
        if saved && errors.is_empty() {
            return (errors, true);
        }

        errors.insert(status);
        (errors, saved)
    }

    fn check_one(
        &self,
        chain: &[CertInfo],
        index: usize,
        certstat: CertErrorSet,
        pinned: Option<&mut PinnedFile>,
        check: &dyn ChainCheck,
    ) -> Step {
        let cert = &chain[index];
        let (errors, saved) = self.preauth(cert, index, certstat, pinned.as_deref(), check);
        if errors.is_empty() {
            return Step::Accepted;
        }

        let title = format!(
            "SSL Certificate check (certificate {} of {} in chain)",
            chain.len() - index,
            chain.len()
        );
        let lines = cert.display_lines(errors);
        let allow_always = pinned.is_some() && !saved && !errors.intersects(CertErrorSet::UNCACHEABLE);
        let allow_skip = index > 0 && self.policy.verify_partial_chains;

        match self.prompt.verify_cert(&title, &lines, allow_always, allow_skip) {
            TrustDecision::Reject => Step::Rejected(errors),
            TrustDecision::Skip if allow_skip => Step::Skipped,
            TrustDecision::Skip => Step::Rejected(errors),
            TrustDecision::AcceptOnce => {
                self.store.insert(cert.der());
                Step::Accepted
            }
            TrustDecision::AcceptAlways => {
                match pinned {
                    Some(pinned) if allow_always => self.save(pinned, cert, errors),
                    _ => warn!(host = self.host, "Certificate cannot be saved; accepting once"),
                }
                self.store.insert(cert.der());
                Step::Accepted
            }
        }
    }

    /// Writes a hostname override when the hostname is wrong, and the
    /// certificate itself whenever the problems are anything other than
    /// exactly a hostname mismatch.
    fn save(&self, pinned: &mut PinnedFile, cert: &CertInfo, errors: CertErrorSet) {
        let mut saved = false;
        if errors.contains(CertErrorSet::HOSTNAME) {
            match pinned.append_host(self.host, &cert.fingerprint(FingerprintAlg::Md5)) {
                Ok(()) => saved = true,
                Err(e) => warn!(error = %e, "Couldn't save hostname override"),
            }
        }
        if errors != CertErrorSet::HOSTNAME {
            match pinned.append_certificate(cert.der()) {
                Ok(()) => saved = true,
                Err(e) => warn!(error = %e, "Couldn't save certificate"),
            }
        }
        if saved {
            info!(path = %pinned.path().display(), "Certificate saved");
        } else {
            warn!(path = %pinned.path().display(), "Couldn't save certificate");
        }
    }
}
