//! TLS settings consumed by this crate.

use std::path::PathBuf;

/// Protocol, trust-anchor and verification settings for TLS sessions.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct TlsPolicy {
    /// Pinned certificates and hostname overrides.
    pub certificate_file: Option<PathBuf>,
    /// Additional CA certificates.
    pub ca_certificates_file: Option<PathBuf>,
    /// Client certificate and key, in one PEM file.
    pub client_cert: Option<PathBuf>,
    /// Colon-, comma- or space-separated cipher suite names.
    pub ciphers: Option<String>,
    /// Allow SSLv3.
    pub use_sslv3: bool,
    /// Allow TLS 1.0.
    pub use_tlsv1: bool,
    /// Allow TLS 1.1.
    pub use_tlsv1_1: bool,
    /// Allow TLS 1.2.
    pub use_tlsv1_2: bool,
    /// Allow TLS 1.3.
    pub use_tlsv1_3: bool,
    /// Minimum Diffie-Hellman prime size in bits; 0 for the library default.
    pub min_dh_prime_bits: u32,
    /// Trust the bundled web PKI roots.
    pub use_system_certs: bool,
    /// Check certificate validity periods.
    pub verify_dates: bool,
    /// Check that the leaf names the server.
    pub verify_host: bool,
    /// Let the user skip intermediate certificates.
    pub verify_partial_chains: bool,
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self {
            certificate_file: None,
            ca_certificates_file: None,
            client_cert: None,
            ciphers: None,
            use_sslv3: false,
            use_tlsv1: false,
            use_tlsv1_1: false,
            use_tlsv1_2: true,
            use_tlsv1_3: true,
            min_dh_prime_bits: 0,
            use_system_certs: true,
            verify_dates: true,
            verify_host: true,
            verify_partial_chains: false,
        }
    }
}
