//! The pinned-certificate file.
//!
//! A user-controlled file holding PEM `CERTIFICATE` blocks that are trusted
//! as-is, and hostname overrides of the form
//!
//! ```text
//! #H mail.example.org 0123 4567 89AB CDEF 0123 4567 89AB CDEF
//! ```
//!
//! which accept a certificate, identified by its MD5 fingerprint, for a host
//! it does not name.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustls::pki_types::CertificateDer;
use rustls::pki_types::pem::PemObject;
use tracing::{debug, warn};

use crate::cert::normalize_fingerprint;
use crate::error::{Error, Result};

const HOST_MARKER: &str = "#H";

/// A hostname override line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOverride {
    /// Hostname the certificate is accepted for.
    pub host: String,
    /// MD5 fingerprint, normalized to upper-case hex digits.
    pub md5: String,
}

/// Contents of the pinned-certificate file.
#[derive(Debug, Clone)]
pub struct PinnedFile {
    path: PathBuf,
    certs: Vec<CertificateDer<'static>>,
    hosts: Vec<HostOverride>,
}

impl PinnedFile {
    /// Reads the file at `path`. A missing file is treated as empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::File`] if the file exists but cannot be read.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(Error::file(path, e)),
        };
        Ok(Self::parse(path, &text))
    }

    /// Parses file contents. Malformed PEM blocks are skipped with a warning.
    #[must_use]
    pub fn parse(path: impl Into<PathBuf>, contents: &[u8]) -> Self {
        let path = path.into();
        let mut certs = Vec::new();
        for item in CertificateDer::pem_slice_iter(contents) {
            match item {
                Ok(cert) => certs.push(cert),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable certificate");
                    break;
                }
            }
        }

        let hosts = String::from_utf8_lossy(contents)
            .lines()
            .filter_map(parse_host_line)
            .collect();

        Self { path, certs, hosts }
    }

    /// Returns the file's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the pinned certificates.
    #[must_use]
    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certs
    }

    /// Returns the hostname overrides.
    #[must_use]
    pub fn host_overrides(&self) -> &[HostOverride] {
        &self.hosts
    }

    /// Returns true if exactly this certificate is pinned.
    #[must_use]
    pub fn contains(&self, cert: &CertificateDer<'_>) -> bool {
        self.certs.iter().any(|pinned| pinned.as_ref() == cert.as_ref())
    }

    /// Returns true if an override accepts the certificate with MD5
    /// fingerprint `md5` for `host`.
    #[must_use]
    pub fn has_host_override(&self, host: &str, md5: &str) -> bool {
        let md5 = normalize_fingerprint(md5);
        self.hosts
            .iter()
            .any(|entry| entry.host == host && entry.md5 == md5)
    }

    /// Appends a certificate as a PEM block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::File`] if the file cannot be written.
    pub fn append_certificate(&mut self, cert: &CertificateDer<'_>) -> Result<()> {
        self.append(&to_pem(cert))?;
        self.certs.push(cert.clone().into_owned());
        debug!(path = %self.path.display(), "Certificate saved");
        Ok(())
    }

    /// Appends a hostname override.
    ///
    /// # Errors
    ///
    /// Returns [`Error::File`] if the file cannot be written.
    pub fn append_host(&mut self, host: &str, md5: &str) -> Result<()> {
        self.append(&format!("{HOST_MARKER} {host} {md5}\n"))?;
        self.hosts.push(HostOverride {
            host: host.to_string(),
            md5: normalize_fingerprint(md5),
        });
        debug!(path = %self.path.display(), host, "Hostname override saved");
        Ok(())
    }

    fn append(&self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::file(&self.path, e))?;
        file.write_all(text.as_bytes())
            .map_err(|e| Error::file(&self.path, e))
    }
}

/// Parses `#H <host> <fingerprint>`; the fingerprint may contain spaces.
fn parse_host_line(line: &str) -> Option<HostOverride> {
    let rest = line.trim().strip_prefix(HOST_MARKER)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let (host, fingerprint) = rest.trim_start().split_once(char::is_whitespace)?;
    let md5 = normalize_fingerprint(fingerprint);
    (md5.len() == 32).then(|| HostOverride {
        host: host.to_string(),
        md5,
    })
}

/// Encodes a certificate as a PEM block with 64-column lines.
#[must_use]
pub fn to_pem(cert: &CertificateDer<'_>) -> String {
    let encoded = STANDARD.encode(cert.as_ref());
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for chunk in encoded.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}
