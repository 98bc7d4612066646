//! Certificate details for trust decisions.

use std::fmt::Write as _;
use std::net::IpAddr;

use chrono::DateTime;
use md5::Md5;
use rustls::pki_types::CertificateDer;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use x509_parser::prelude::{AttributeTypeAndValue, FromDer, GeneralName, X509Certificate, X509Name};

use crate::error::{Error, Result};
use crate::status::CertErrorSet;

const SHA256_LABEL: &str = "SHA256 Fingerprint: ";

/// Digest used for a certificate fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintAlg {
    /// MD5, used by hostname overrides.
    Md5,
    /// SHA-1.
    Sha1,
    /// SHA-256.
    Sha256,
}

/// Distinguished name parts shown to the user, in display order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameParts {
    /// Common name.
    pub common_name: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// Organization.
    pub organization: Option<String>,
    /// Organizational unit.
    pub organizational_unit: Option<String>,
    /// Locality.
    pub locality: Option<String>,
    /// State or province.
    pub state: Option<String>,
    /// Country.
    pub country: Option<String>,
}

impl NameParts {
    fn from_name(name: &X509Name<'_>) -> Self {
        Self {
            common_name: first_str(name.iter_common_name()),
            email: first_str(name.iter_email()),
            organization: first_str(name.iter_organization()),
            organizational_unit: first_str(name.iter_organizational_unit()),
            locality: first_str(name.iter_locality()),
            state: first_str(name.iter_state_or_province()),
            country: first_str(name.iter_country()),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &str> {
        [
            &self.common_name,
            &self.email,
            &self.organization,
            &self.organizational_unit,
            &self.locality,
            &self.state,
            &self.country,
        ]
        .into_iter()
        .filter_map(|part| part.as_deref())
    }
}

/// A parsed certificate from a server's chain.
#[derive(Debug, Clone)]
pub struct CertInfo {
    der: CertificateDer<'static>,
    subject: NameParts,
    issuer: NameParts,
    not_before: i64,
    not_after: i64,
    dns_names: Vec<String>,
    ip_addrs: Vec<IpAddr>,
}

impl CertInfo {
    /// Parses a DER certificate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] if the certificate cannot be parsed.
    pub fn from_der(der: &CertificateDer<'_>) -> Result<Self> {
        let (_, x509) =
            X509Certificate::from_der(der.as_ref()).map_err(|e| Error::Certificate(e.to_string()))?;

        let mut dns_names = Vec::new();
        let mut ip_addrs = Vec::new();
        if let Ok(Some(san)) = x509.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => dns_names.push(dns.to_ascii_lowercase()),
                    GeneralName::IPAddress(bytes) => {
                        if let Ok(octets) = <[u8; 4]>::try_from(*bytes) {
                            ip_addrs.push(IpAddr::from(octets));
                        } else if let Ok(octets) = <[u8; 16]>::try_from(*bytes) {
                            ip_addrs.push(IpAddr::from(octets));
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(Self {
            der: der.clone().into_owned(),
            subject: NameParts::from_name(x509.subject()),
            issuer: NameParts::from_name(x509.issuer()),
            not_before: x509.validity().not_before.timestamp(),
            not_after: x509.validity().not_after.timestamp(),
            dns_names,
            ip_addrs,
        })
    }

    /// Returns the DER encoding.
    #[must_use]
    pub const fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }

    /// Returns the subject name parts.
    #[must_use]
    pub const fn subject(&self) -> &NameParts {
        &self.subject
    }

    /// Returns the issuer name parts.
    #[must_use]
    pub const fn issuer(&self) -> &NameParts {
        &self.issuer
    }

    /// Activation time, seconds since the epoch.
    #[must_use]
    pub const fn not_before(&self) -> i64 {
        self.not_before
    }

    /// Expiration time, seconds since the epoch.
    #[must_use]
    pub const fn not_after(&self) -> i64 {
        self.not_after
    }

    /// Returns the date problems of this certificate at time `now`.
    #[must_use]
    pub fn date_errors(&self, now: i64) -> CertErrorSet {
        let mut errors = CertErrorSet::empty();
        if self.not_after < now {
            errors.insert(CertErrorSet::EXPIRED);
        }
        if self.not_before > now {
            errors.insert(CertErrorSet::NOT_YET_VALID);
        }
        errors
    }

    /// Returns the raw digest of the DER encoding.
    #[must_use]
    pub fn digest(&self, alg: FingerprintAlg) -> Vec<u8> {
        let der = self.der.as_ref();
        match alg {
            FingerprintAlg::Md5 => Md5::digest(der).to_vec(),
            FingerprintAlg::Sha1 => Sha1::digest(der).to_vec(),
            FingerprintAlg::Sha256 => Sha256::digest(der).to_vec(),
        }
    }

    /// Returns the fingerprint formatted for display, e.g. `AABB CCDD EE`.
    #[must_use]
    pub fn fingerprint(&self, alg: FingerprintAlg) -> String {
        format_fingerprint(&self.digest(alg))
    }

    /// Checks the certificate's names against `host`.
    ///
    /// DNS names may carry a wildcard as their whole leftmost label. The
    /// subject common name is only consulted when no DNS name is present.
    #[must_use]
    pub fn matches_hostname(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if let Ok(ip) = host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
            return self.ip_addrs.contains(&ip);
        }
        if self.dns_names.is_empty() {
            return self
                .subject
                .common_name
                .as_deref()
                .is_some_and(|cn| name_matches(&cn.to_ascii_lowercase(), &host));
        }
        self.dns_names.iter().any(|name| name_matches(name, &host))
    }

    /// Builds the lines shown when asking the user about this certificate.
    ///
    /// Empty strings separate blocks.
    #[must_use]
    pub fn display_lines(&self, errors: CertErrorSet) -> Vec<String> {
        let mut lines = vec!["This certificate belongs to:".to_string()];
        lines.extend(self.subject.iter().map(|part| format!("   {part}")));
        lines.push(String::new());
        lines.push("This certificate was issued by:".to_string());
        lines.extend(self.issuer.iter().map(|part| format!("   {part}")));
        lines.push(String::new());
        lines.push("This certificate is valid".to_string());
        lines.push(format!("   from {}", format_date(self.not_before)));
        lines.push(format!("     to {}", format_date(self.not_after)));
        lines.push(String::new());
        lines.push(format!("SHA1 Fingerprint: {}", self.fingerprint(FingerprintAlg::Sha1)));

        let sha256 = self.fingerprint(FingerprintAlg::Sha256);
        let (first, second) = sha256.split_at(sha256.len().min(39));
        lines.push(format!("{SHA256_LABEL}{first}"));
        lines.push(format!("{:width$}{}", "", second.trim_start(), width = SHA256_LABEL.len()));

        if !errors.is_empty() {
            lines.push(String::new());
        }
        let warnings = [
            (CertErrorSet::NOT_YET_VALID, "WARNING: Server certificate is not yet valid"),
            (CertErrorSet::EXPIRED, "WARNING: Server certificate has expired"),
            (CertErrorSet::REVOKED, "WARNING: Server certificate has been revoked"),
            (CertErrorSet::HOSTNAME, "WARNING: Server hostname does not match certificate"),
            (CertErrorSet::SIGNER_NOT_CA, "WARNING: Signer of server certificate is not a CA"),
            (
                CertErrorSet::INSECURE_ALG,
                "Warning: Server certificate was signed using an insecure algorithm",
            ),
        ];
        lines.extend(
            warnings
                .iter()
                .filter(|(bit, _)| errors.contains(*bit))
                .map(|(_, text)| (*text).to_string()),
        );
        lines
    }
}

#[cfg(test)]
impl CertInfo {
    /// A certificate with the given identity and no names beyond its CN.
    pub(crate) fn synthetic(seed: u8, common_name: &str, not_before: i64, not_after: i64) -> Self {
        Self {
            der: CertificateDer::from(vec![0x30, seed, seed.wrapping_mul(3)]),
            subject: NameParts {
                common_name: Some(common_name.to_string()),
                ..NameParts::default()
            },
            issuer: NameParts::default(),
            not_before,
            not_after,
            dns_names: Vec::new(),
            ip_addrs: Vec::new(),
        }
    }
}

fn first_str<'a: 'b, 'b>(
    mut attrs: impl Iterator<Item = &'b AttributeTypeAndValue<'a>>,
) -> Option<String> {
    attrs.find_map(|attr| attr.as_str().ok()).map(str::to_string)
}

fn name_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.');
    match pattern.strip_prefix("*.") {
        Some(suffix) => host
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
        None => pattern == host,
    }
}

/// Formats digest bytes as upper-case hex with a space after every pair of
/// bytes.
#[must_use]
pub fn format_fingerprint(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 5 / 2);
    for (i, byte) in bytes.iter().enumerate() {
        let _ = write!(out, "{byte:02X}");
        if i % 2 == 1 && i + 1 < bytes.len() {
            out.push(' ');
        }
    }
    out
}

/// Normalizes a fingerprint written in any common style to upper-case hex
/// digits only, so `aa:bb:cc` and `AABB CC` compare equal.
#[must_use]
pub fn normalize_fingerprint(text: &str) -> String {
    text.chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn format_date(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0).map_or_else(
        || timestamp.to_string(),
        |date| date.format("%a, %d %b %Y %H:%M:%S UTC").to_string(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const LOCALHOST: &[u8] = include_bytes!("../../postern-conn/tests/fixtures/localhost.pem");
    const EXPIRED: &[u8] = include_bytes!("../../postern-conn/tests/fixtures/expired.pem");

    fn load(pem: &[u8]) -> CertInfo {
        use rustls::pki_types::pem::PemObject;
        CertInfo::from_der(&CertificateDer::from_pem_slice(pem).unwrap()).unwrap()
    }

    #[test]
    fn test_parse_fixture() {
        let cert = load(LOCALHOST);
        assert_eq!(cert.subject().common_name.as_deref(), Some("localhost"));
        assert_eq!(cert.issuer().common_name.as_deref(), Some("Postern Test CA"));
        assert_eq!(cert.subject().country.as_deref(), Some("NL"));
        assert_eq!(
            cert.fingerprint(FingerprintAlg::Md5),
            "49CD 3019 4C73 0294 9B57 FE8A D8C3 3287"
        );
        assert!(cert.matches_hostname("localhost"));
        assert!(cert.matches_hostname("LOCALHOST."));
        assert!(cert.matches_hostname("127.0.0.1"));
        assert!(!cert.matches_hostname("mail.example.org"));
    }

    #[test]
    fn test_date_errors() {
        let cert = load(EXPIRED);
        // 2022-01-01
        assert_eq!(cert.date_errors(1_640_995_200), CertErrorSet::EXPIRED);
        // 2019-01-01
        assert_eq!(cert.date_errors(1_546_300_800), CertErrorSet::NOT_YET_VALID);
        assert!(cert.date_errors(cert.not_before() + 1).is_empty());
    }

    #[test]
    fn test_display_lines() {
        let cert = load(EXPIRED);
        let lines = cert.display_lines(CertErrorSet::EXPIRED | CertErrorSet::HOSTNAME);
        assert_eq!(lines[0], "This certificate belongs to:");
        assert_eq!(lines[1], "   localhost");
        assert!(lines.contains(&"This certificate was issued by:".to_string()));
        assert!(lines.contains(&"   Postern Test CA".to_string()));
        assert!(lines.contains(&"   from Wed, 01 Jan 2020 00:00:00 UTC".to_string()));
        assert!(lines.contains(&"     to Fri, 01 Jan 2021 00:00:00 UTC".to_string()));

        let sha256 = lines.iter().position(|l| l.starts_with(SHA256_LABEL)).unwrap();
        assert_eq!(lines[sha256].len(), SHA256_LABEL.len() + 39);
        assert_eq!(lines[sha256 + 1].len(), SHA256_LABEL.len() + 39);
        assert!(lines[sha256 + 1].starts_with(&" ".repeat(SHA256_LABEL.len())));

        let tail = &lines[lines.len() - 2..];
        assert_eq!(tail[0], "WARNING: Server certificate has expired");
        assert_eq!(tail[1], "WARNING: Server hostname does not match certificate");
    }

    #[test]
    fn test_format_fingerprint() {
        assert_eq!(format_fingerprint(&[0xaa, 0xbb, 0xcc]), "AABB CC");
        assert_eq!(format_fingerprint(&[0x01, 0x02, 0x03, 0x04]), "0102 0304");
        assert_eq!(format_fingerprint(&[]), "");
    }

    #[test]
    fn test_normalize_fingerprint() {
        assert_eq!(normalize_fingerprint("aa:bb:Cc"), "AABBCC");
        assert_eq!(normalize_fingerprint("AABB CC"), "AABBCC");
    }

    #[test]
    fn test_name_matches() {
        assert!(name_matches("mail.example.org", "mail.example.org"));
        assert!(name_matches("*.example.org", "mail.example.org"));
        assert!(!name_matches("*.example.org", "example.org"));
        assert!(!name_matches("*.example.org", "a.mail.example.org"));
        assert!(!name_matches("mail.example.org", "imap.example.org"));
    }

    #[test]
    fn test_format_date() {
        assert_eq!(format_date(0), "Thu, 01 Jan 1970 00:00:00 UTC");
    }

    proptest! {
        #[test]
        fn prop_fingerprint_normalizes_to_hex(bytes in proptest::collection::vec(any::<u8>(), 0..40)) {
            let formatted = format_fingerprint(&bytes);
            let colon = bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(":");
            prop_assert_eq!(normalize_fingerprint(&formatted), normalize_fingerprint(&colon));
            prop_assert_eq!(normalize_fingerprint(&formatted).len(), bytes.len() * 2);
        }
    }
}
