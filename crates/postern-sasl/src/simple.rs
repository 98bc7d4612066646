//! Single-message mechanisms: PLAIN, LOGIN, EXTERNAL, ANONYMOUS and the
//! bearer-token mechanisms.

use crate::error::{Error, Result};
use crate::session::{Client, Credentials};

const ANONYMOUS_TRACE: &str = "postern";

/// PLAIN (RFC 4616): `[authzid] NUL authcid NUL passwd`.
#[derive(Debug, Default)]
pub(crate) struct Plain {
    done: bool,
}

impl Client for Plain {
    fn initial(&mut self, creds: &Credentials) -> Result<Option<Vec<u8>>> {
        let authzid = creds.effective_authzid().unwrap_or("");
        let mut message = Vec::with_capacity(authzid.len() + creds.authid.len() + creds.password.len() + 2);
        message.extend_from_slice(authzid.as_bytes());
        message.push(0);
        message.extend_from_slice(creds.authid.as_bytes());
        message.push(0);
        message.extend_from_slice(creds.password.as_bytes());
        self.done = true;
        Ok(Some(message))
    }

    fn step(&mut self, _creds: &Credentials, _challenge: &[u8]) -> Result<Vec<u8>> {
        Err(Error::Complete)
    }

    fn is_complete(&self) -> bool {
        self.done
    }
}

/// LOGIN: answers the username prompt, then the password prompt.
#[derive(Debug, Default)]
pub(crate) struct Login {
    answered: u8,
}

impl Client for Login {
    fn initial(&mut self, _creds: &Credentials) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn step(&mut self, creds: &Credentials, challenge: &[u8]) -> Result<Vec<u8>> {
        let prompt = String::from_utf8_lossy(challenge).to_ascii_lowercase();
        let answer = if prompt.contains("password") || (self.answered == 1 && !prompt.contains("user")) {
            creds.password.as_bytes().to_vec()
        } else {
            creds.authid.as_bytes().to_vec()
        };
        self.answered += 1;
        Ok(answer)
    }

    fn is_complete(&self) -> bool {
        self.answered >= 2
    }
}

/// EXTERNAL (RFC 4422 appendix A): sends the authorization identity only.
#[derive(Debug, Default)]
pub(crate) struct External {
    done: bool,
}

impl Client for External {
    fn initial(&mut self, creds: &Credentials) -> Result<Option<Vec<u8>>> {
        self.done = true;
        let authzid = if creds.authzid.is_empty() {
            creds.external_id.as_deref().unwrap_or("")
        } else {
            creds.authzid.as_str()
        };
        Ok(Some(authzid.as_bytes().to_vec()))
    }

    fn step(&mut self, _creds: &Credentials, _challenge: &[u8]) -> Result<Vec<u8>> {
        Err(Error::Complete)
    }

    fn is_complete(&self) -> bool {
        self.done
    }
}

/// ANONYMOUS (RFC 4505): sends a trace string, the authid if one is set.
#[derive(Debug, Default)]
pub(crate) struct Anonymous {
    done: bool,
}

impl Client for Anonymous {
    fn initial(&mut self, creds: &Credentials) -> Result<Option<Vec<u8>>> {
        self.done = true;
        let trace = if creds.authid.is_empty() {
            ANONYMOUS_TRACE
        } else {
            creds.authid.as_str()
        };
        Ok(Some(trace.as_bytes().to_vec()))
    }

    fn step(&mut self, _creds: &Credentials, _challenge: &[u8]) -> Result<Vec<u8>> {
        Err(Error::Complete)
    }

    fn is_complete(&self) -> bool {
        self.done
    }
}

/// OAUTHBEARER and XOAUTH2: sends the prepared payload.
///
/// A failed token makes the server send an error challenge, which must be
/// answered (`\x01` for OAUTHBEARER, empty for XOAUTH2) before the server
/// reports the final failure.
#[derive(Debug)]
pub(crate) struct Bearer {
    rfc7628: bool,
    sent: bool,
    acknowledged: bool,
}

impl Bearer {
    pub(crate) const fn new(rfc7628: bool) -> Self {
        Self {
            rfc7628,
            sent: false,
            acknowledged: false,
        }
    }
}

impl Client for Bearer {
    fn initial(&mut self, creds: &Credentials) -> Result<Option<Vec<u8>>> {
        self.sent = true;
        Ok(Some(creds.bearer.as_bytes().to_vec()))
    }

    fn step(&mut self, _creds: &Credentials, _challenge: &[u8]) -> Result<Vec<u8>> {
        self.acknowledged = true;
        Ok(if self.rfc7628 { vec![0x01] } else { Vec::new() })
    }

    fn is_complete(&self) -> bool {
        // Completion is decided by the server's final status; an error
        // challenge may still arrive after the payload.
        self.acknowledged
    }
}
