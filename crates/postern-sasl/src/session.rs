//! SASL client sessions.
//!
//! A [`Session`] drives one authentication exchange. The caller forwards
//! server challenges to [`Session::step`] and sends back whatever it returns,
//! using the protocol's own framing. Once the server accepts, any negotiated
//! [`SecurityLayer`] is taken with [`Session::take_layer`] and installed on
//! the connection.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;
use zeroize::Zeroizing;

use crate::cram_md5::CramMd5;
use crate::digest_md5::DigestMd5;
use crate::error::{Error, Result};
use crate::layer::SecurityLayer;
use crate::mechanism::Mechanism;
use crate::scram::{Scram, ScramHash};
use crate::simple::{Anonymous, Bearer, External, Login, Plain};

/// Properties a mechanism may ask for.
#[derive(Clone, Default)]
pub struct Credentials {
    /// Authentication identity (the login).
    pub authid: String,
    /// Authorization identity (the user); empty when not set.
    pub authzid: String,
    /// Password.
    pub password: Zeroizing<String>,
    /// Service name, e.g. `imap`.
    pub service: String,
    /// Server hostname.
    pub hostname: String,
    /// Strength of protection already provided below SASL, e.g. by TLS.
    pub external_ssf: u32,
    /// Identity established below SASL, used by EXTERNAL.
    pub external_id: Option<String>,
    /// Bearer token payload for OAUTHBEARER and XOAUTH2.
    pub bearer: Zeroizing<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("authid", &self.authid)
            .field("authzid", &self.authzid)
            .field("service", &self.service)
            .field("hostname", &self.hostname)
            .field("external_ssf", &self.external_ssf)
            .field("external_id", &self.external_id)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Returns the authorization identity to send, if it differs from the
    /// authentication identity.
    pub(crate) fn effective_authzid(&self) -> Option<&str> {
        (!self.authzid.is_empty() && self.authzid != self.authid).then_some(self.authzid.as_str())
    }
}

/// Client side of one mechanism.
pub(crate) trait Client: Send {
    /// Produces the client-first message, if the mechanism has one.
    fn initial(&mut self, creds: &Credentials) -> Result<Option<Vec<u8>>>;

    /// Answers a server challenge.
    fn step(&mut self, creds: &Credentials, challenge: &[u8]) -> Result<Vec<u8>>;

    /// Returns true once the client needs no more challenges.
    fn is_complete(&self) -> bool;

    /// Strength of the negotiated security layer.
    fn ssf(&self) -> u32 {
        0
    }

    /// Hands over the negotiated security layer, if any.
    fn take_layer(&mut self) -> Option<Box<dyn SecurityLayer>> {
        None
    }
}

/// An in-progress SASL authentication.
pub struct Session {
    mechanism: Mechanism,
    creds: Credentials,
    client: Box<dyn Client>,
    started: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("mechanism", &self.mechanism)
            .field("creds", &self.creds)
            .field("started", &self.started)
            .field("complete", &self.client.is_complete())
            .finish()
    }
}

impl Session {
    /// Starts a session for `mechanism`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoService`] when no service is declared and
    /// [`Error::MissingProperty`] when the mechanism lacks a required property.
    pub fn new(mechanism: Mechanism, creds: Credentials) -> Result<Self> {
        if creds.service.is_empty() {
            return Err(Error::NoService);
        }
        if mechanism.needs_authid() && creds.authid.is_empty() {
            return Err(Error::MissingProperty("authid"));
        }
        if mechanism.needs_bearer() && creds.bearer.is_empty() {
            return Err(Error::MissingProperty("bearer token"));
        }

        let client: Box<dyn Client> = match mechanism {
            Mechanism::Plain => Box::new(Plain::default()),
            Mechanism::Login => Box::new(Login::default()),
            Mechanism::CramMd5 => Box::new(CramMd5::default()),
            Mechanism::DigestMd5 => Box::new(DigestMd5::new()),
            Mechanism::ScramSha1 => Box::new(Scram::new(ScramHash::Sha1)),
            Mechanism::ScramSha256 => Box::new(Scram::new(ScramHash::Sha256)),
            Mechanism::External => Box::new(External::default()),
            Mechanism::Anonymous => Box::new(Anonymous::default()),
            Mechanism::OAuthBearer => Box::new(Bearer::new(true)),
            Mechanism::XOAuth2 => Box::new(Bearer::new(false)),
        };
        debug!(mechanism = %mechanism, service = %creds.service, "Starting SASL session");
        Ok(Self {
            mechanism,
            creds,
            client,
            started: false,
        })
    }

    /// Returns the mechanism in use.
    #[must_use]
    pub const fn mechanism(&self) -> Mechanism {
        self.mechanism
    }

    /// Returns the client-first message.
    ///
    /// `None` means the mechanism waits for the server to speak first.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be built.
    pub fn initial_response(&mut self) -> Result<Option<Vec<u8>>> {
        self.started = true;
        self.client.initial(&self.creds)
    }

    /// Answers a server challenge.
    ///
    /// If the client-first message has not been sent yet, it is returned in
    /// place of an answer; servers without initial-response support send an
    /// empty challenge to ask for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the challenge is malformed, the server fails to
    /// authenticate itself, or the exchange is already complete.
    pub fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>> {
        if !self.started {
            self.started = true;
            if let Some(initial) = self.client.initial(&self.creds)? {
                return Ok(initial);
            }
        }
        if self.client.is_complete() {
            return Err(Error::Complete);
        }
        self.client.step(&self.creds, challenge)
    }

    /// Returns the base64 client-first message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be built.
    pub fn initial_response_base64(&mut self) -> Result<Option<String>> {
        Ok(self.initial_response()?.map(|bytes| STANDARD.encode(bytes)))
    }

    /// Answers a base64 challenge with a base64 response.
    ///
    /// # Errors
    ///
    /// Returns an error if the challenge is not valid base64 or [`step`](Self::step) fails.
    pub fn step_base64(&mut self, challenge: &str) -> Result<String> {
        let challenge = STANDARD.decode(challenge.trim())?;
        Ok(STANDARD.encode(self.step(&challenge)?))
    }

    /// Returns true once the client side of the exchange is finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.client.is_complete()
    }

    /// Returns the security strength factor of the negotiated layer.
    #[must_use]
    pub fn ssf(&self) -> u32 {
        self.client.ssf()
    }

    /// Takes the negotiated security layer.
    ///
    /// Returns `None` if the mechanism negotiated no protection.
    pub fn take_layer(&mut self) -> Option<Box<dyn SecurityLayer>> {
        self.client.take_layer()
    }
}
