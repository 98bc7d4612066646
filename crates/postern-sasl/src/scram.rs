//! SCRAM-SHA-1 (RFC 5802) and SCRAM-SHA-256 (RFC 7677), without channel
//! binding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::session::{Client, Credentials};

/// Iteration counts below this are refused.
const MIN_ITERATIONS: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScramHash {
    Sha1,
    Sha256,
}

impl ScramHash {
    fn hmac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let bad_key = |e: hmac::digest::InvalidLength| Error::invalid(e.to_string());
        Ok(match self {
            Self::Sha1 => {
                let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key).map_err(bad_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            Self::Sha256 => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(bad_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        })
    }

    fn hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
        }
    }

    fn salted_password(self, password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        match self {
            Self::Sha1 => {
                let mut out = [0u8; 20];
                pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, iterations, &mut out);
                out.to_vec()
            }
            Self::Sha256 => {
                let mut out = [0u8; 32];
                pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
                out.to_vec()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    First,
    Final,
    Verify,
    Done,
}

pub(crate) struct Scram {
    hash: ScramHash,
    stage: Stage,
    cnonce: String,
    gs2_header: String,
    client_first_bare: String,
    server_signature: Vec<u8>,
}

impl std::fmt::Debug for Scram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scram")
            .field("hash", &self.hash)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

/// Escapes a username for the `n=` and `a=` attributes.
fn saslname(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}

impl Scram {
    pub(crate) fn new(hash: ScramHash) -> Self {
        let mut bytes = [0u8; 18];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::with_cnonce(hash, STANDARD.encode(bytes))
    }

    fn with_cnonce(hash: ScramHash, cnonce: String) -> Self {
        Self {
            hash,
            stage: Stage::First,
            cnonce,
            gs2_header: String::new(),
            client_first_bare: String::new(),
            server_signature: Vec::new(),
        }
    }

    fn client_final(&mut self, creds: &Credentials, challenge: &[u8]) -> Result<Vec<u8>> {
        let server_first =
            std::str::from_utf8(challenge).map_err(|_| Error::invalid("server-first is not UTF-8"))?;
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in server_first.split(',') {
            match attr.split_once('=') {
                Some(("r", v)) => nonce = Some(v),
                Some(("s", v)) => salt = Some(STANDARD.decode(v)?),
                Some(("i", v)) => {
                    iterations = Some(
                        v.parse::<u32>()
                            .map_err(|_| Error::invalid(format!("bad iteration count {v}")))?,
                    );
                }
                Some(("m", _)) => return Err(Error::invalid("unsupported mandatory extension")),
                Some(("e", v)) => return Err(Error::ServerAuthFailed(v.to_string())),
                _ => {}
            }
        }
        let nonce = nonce.ok_or_else(|| Error::invalid("missing nonce"))?;
        let salt = salt.ok_or_else(|| Error::invalid("missing salt"))?;
        let iterations = iterations.ok_or_else(|| Error::invalid("missing iteration count"))?;
        if !nonce.starts_with(&self.cnonce) || nonce.len() == self.cnonce.len() {
            return Err(Error::invalid("server nonce does not extend client nonce"));
        }
        if iterations < MIN_ITERATIONS {
            return Err(Error::invalid(format!("iteration count {iterations} too low")));
        }

        let without_proof = format!("c={},r={nonce}", STANDARD.encode(&self.gs2_header));
        let auth_message = format!("{},{server_first},{without_proof}", self.client_first_bare);

        let h = self.hash;
        let salted = h.salted_password(creds.password.as_bytes(), &salt, iterations);
        let client_key = h.hmac(&salted, b"Client Key")?;
        let stored_key = h.hash(&client_key);
        let client_signature = h.hmac(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(&client_signature)
            .map(|(k, s)| k ^ s)
            .collect();
        let server_key = h.hmac(&salted, b"Server Key")?;
        self.server_signature = h.hmac(&server_key, auth_message.as_bytes())?;

        Ok(format!("{without_proof},p={}", STANDARD.encode(proof)).into_bytes())
    }

    fn verify(&self, challenge: &[u8]) -> Result<()> {
        let server_final =
            std::str::from_utf8(challenge).map_err(|_| Error::invalid("server-final is not UTF-8"))?;
        for attr in server_final.split(',') {
            match attr.split_once('=') {
                Some(("e", v)) => return Err(Error::ServerAuthFailed(v.to_string())),
                Some(("v", v)) => {
                    return if STANDARD.decode(v)? == self.server_signature {
                        Ok(())
                    } else {
                        Err(Error::ServerAuthFailed("server signature mismatch".into()))
                    };
                }
                _ => {}
            }
        }
        Err(Error::invalid("missing server signature"))
    }
}

impl Client for Scram {
    fn initial(&mut self, creds: &Credentials) -> Result<Option<Vec<u8>>> {
        self.gs2_header = match creds.effective_authzid() {
            Some(authzid) => format!("n,a={},", saslname(authzid)),
            None => "n,,".to_string(),
        };
        self.client_first_bare = format!("n={},r={}", saslname(&creds.authid), self.cnonce);
        self.stage = Stage::Final;
        Ok(Some(format!("{}{}", self.gs2_header, self.client_first_bare).into_bytes()))
    }

    fn step(&mut self, creds: &Credentials, challenge: &[u8]) -> Result<Vec<u8>> {
        match self.stage {
            Stage::First => Err(Error::invalid("challenge before client-first message")),
            Stage::Final => {
                let response = self.client_final(creds, challenge)?;
                self.stage = Stage::Verify;
                Ok(response)
            }
            Stage::Verify => {
                self.verify(challenge)?;
                self.stage = Stage::Done;
                Ok(Vec::new())
            }
            Stage::Done => Err(Error::Complete),
        }
    }

    fn is_complete(&self) -> bool {
        self.stage == Stage::Done
    }
}
