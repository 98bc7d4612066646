//! Error types for TLS setup and certificate handling.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while preparing a TLS session.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error reading or writing a certificate file.
    #[error("{path}: {source}")]
    File {
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// TLS library error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for SNI.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// A certificate could not be parsed.
    #[error("Error processing certificate data: {0}")]
    Certificate(String),

    /// The client certificate or its key is unusable.
    #[error("Client certificate: {0}")]
    ClientCert(String),

    /// Every protocol version is disabled in the settings.
    #[error("All available protocols for this connection are disabled")]
    AllProtocolsDisabled,

    /// None of the configured cipher suites is supported.
    #[error("No supported cipher suites in \"{0}\"")]
    NoCipherSuites(String),
}

impl Error {
    /// Creates a file error for `path`.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
