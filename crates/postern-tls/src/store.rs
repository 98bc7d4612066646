//! In-memory certificate trust cache.

use std::sync::Arc;

use parking_lot::RwLock;
use rustls::pki_types::CertificateDer;

/// Certificates accepted during this run of the program.
///
/// Clones share the same set, so a store handed to every connection lets a
/// later connection benefit from an earlier acceptance. Entries are only
/// ever added.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    certs: Arc<RwLock<Vec<CertificateDer<'static>>>>,
}

impl TrustStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if exactly this certificate was accepted.
    #[must_use]
    pub fn contains(&self, cert: &CertificateDer<'_>) -> bool {
        self.certs
            .read()
            .iter()
            .any(|known| known.as_ref() == cert.as_ref())
    }

    /// Records an accepted certificate.
    pub fn insert(&self, cert: &CertificateDer<'_>) {
        if !self.contains(cert) {
            self.certs.write().push(cert.clone().into_owned());
        }
    }

    /// Returns the number of accepted certificates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.certs.read().len()
    }

    /// Returns true if nothing has been accepted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certs.read().is_empty()
    }
}
