//! SASL mechanism names and selection.

use std::fmt;

use crate::error::{Error, Result};

/// Mechanism names accepted in configuration.
///
/// Names are compared case-insensitively. Not every listed name has a
/// client implementation; see [`Mechanism`].
pub const AUTHENTICATORS: &[&str] = &[
    "ANONYMOUS",
    "CRAM-MD5",
    "DIGEST-MD5",
    "EXTERNAL",
    "GS2-IAKERB",
    "GS2-KRB5",
    "GSS-SPNEGO",
    "GSSAPI",
    "LOGIN",
    "NTLM",
    "OTP-MD4",
    "OTP-MD5",
    "OTP-SHA1",
    "PASSDSS-3DES-1",
    "PLAIN",
    "SCRAM-SHA-1",
    "SCRAM-SHA-224",
    "SCRAM-SHA-256",
    "SCRAM-SHA-384",
    "SCRAM-SHA-512",
    "SRP",
];

/// Returns true if `name` is an acceptable authenticator name.
#[must_use]
pub fn is_valid_authenticator(name: &str) -> bool {
    AUTHENTICATORS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(name))
        || Mechanism::from_name(name).is_some()
}

/// Client mechanisms implemented by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// PLAIN (RFC 4616).
    Plain,
    /// Legacy LOGIN.
    Login,
    /// CRAM-MD5 (RFC 2195).
    CramMd5,
    /// DIGEST-MD5 (RFC 2831), with optional integrity protection.
    DigestMd5,
    /// SCRAM-SHA-1 (RFC 5802).
    ScramSha1,
    /// SCRAM-SHA-256 (RFC 7677).
    ScramSha256,
    /// EXTERNAL (RFC 4422), typically a TLS client certificate.
    External,
    /// ANONYMOUS (RFC 4505).
    Anonymous,
    /// OAUTHBEARER (RFC 7628).
    OAuthBearer,
    /// XOAUTH2.
    XOAuth2,
}

/// Automatic selection order, strongest first.
const PREFERENCE: &[Mechanism] = &[
    Mechanism::ScramSha256,
    Mechanism::ScramSha1,
    Mechanism::DigestMd5,
    Mechanism::CramMd5,
    Mechanism::Plain,
    Mechanism::Login,
];

impl Mechanism {
    /// Returns the IANA mechanism name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
            Self::CramMd5 => "CRAM-MD5",
            Self::DigestMd5 => "DIGEST-MD5",
            Self::ScramSha1 => "SCRAM-SHA-1",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::External => "EXTERNAL",
            Self::Anonymous => "ANONYMOUS",
            Self::OAuthBearer => "OAUTHBEARER",
            Self::XOAuth2 => "XOAUTH2",
        }
    }

    /// Parses a mechanism name, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            "CRAM-MD5" => Some(Self::CramMd5),
            "DIGEST-MD5" => Some(Self::DigestMd5),
            "SCRAM-SHA-1" => Some(Self::ScramSha1),
            "SCRAM-SHA-256" => Some(Self::ScramSha256),
            "EXTERNAL" => Some(Self::External),
            "ANONYMOUS" => Some(Self::Anonymous),
            "OAUTHBEARER" => Some(Self::OAuthBearer),
            "XOAUTH2" => Some(Self::XOAuth2),
            _ => None,
        }
    }

    /// Returns true if the client speaks first.
    #[must_use]
    pub const fn has_initial_response(self) -> bool {
        matches!(
            self,
            Self::Plain
                | Self::ScramSha1
                | Self::ScramSha256
                | Self::External
                | Self::Anonymous
                | Self::OAuthBearer
                | Self::XOAuth2
        )
    }

    /// Returns true if the mechanism needs the authentication identity.
    #[must_use]
    pub const fn needs_authid(self) -> bool {
        matches!(
            self,
            Self::Plain | Self::Login | Self::CramMd5 | Self::DigestMd5 | Self::ScramSha1 | Self::ScramSha256
        )
    }

    /// Returns true if the mechanism needs the password.
    #[must_use]
    pub const fn needs_password(self) -> bool {
        self.needs_authid()
    }

    /// Returns true if the mechanism sends a bearer token.
    #[must_use]
    pub const fn needs_bearer(self) -> bool {
        matches!(self, Self::OAuthBearer | Self::XOAuth2)
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Chooses a mechanism from the server's advertised list.
///
/// Names are normalized to upper case. With a `preferred` mechanism only that
/// mechanism is considered, and only if the server offers it. Otherwise the
/// strongest password-based mechanism the server offers wins; EXTERNAL,
/// ANONYMOUS and the bearer-token mechanisms are never picked implicitly.
///
/// # Errors
///
/// Returns [`Error::UnknownMechanism`] for an unimplemented preferred
/// mechanism and [`Error::NoMechanism`] if nothing usable is offered.
pub fn suggest_mechanism<S: AsRef<str>>(
    server: &[S],
    preferred: Option<&str>,
) -> Result<Mechanism> {
    let offered: Vec<String> = server
        .iter()
        .map(|name| name.as_ref().trim().to_ascii_uppercase())
        .collect();
    let is_offered = |mech: Mechanism| offered.iter().any(|name| name == mech.name());

    if let Some(preferred) = preferred {
        let mech = Mechanism::from_name(preferred)
            .ok_or_else(|| Error::UnknownMechanism(preferred.to_ascii_uppercase()))?;
        return if is_offered(mech) {
            Ok(mech)
        } else {
            Err(Error::NoMechanism)
        };
    }

    PREFERENCE
        .iter()
        .copied()
        .find(|&mech| is_offered(mech))
        .ok_or(Error::NoMechanism)
}
