//! DIGEST-MD5 (RFC 2831) with the `auth` and `auth-int` qualities of
//! protection.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use rand::RngCore;
use tracing::debug;

use crate::cram_md5::hex;
use crate::error::{Error, Result};
use crate::layer::{MAXBUF, SecurityLayer};
use crate::session::{Client, Credentials};

type HmacMd5 = Hmac<Md5>;

const CLIENT_SIGN_MAGIC: &[u8] = b"Digest session key to client-to-server signing key magic constant";
const SERVER_SIGN_MAGIC: &[u8] = b"Digest session key to server-to-client signing key magic constant";
const INTEGRITY_SSF: u32 = 1;
/// MAC, message type and sequence number trailing every protected record.
const TRAILER_LEN: usize = 16;
const NONCE_COUNT: &str = "00000001";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qop {
    Auth,
    AuthInt,
}

impl Qop {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::AuthInt => "auth-int",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Challenge,
    Rspauth,
    Done,
}

pub(crate) struct DigestMd5 {
    stage: Stage,
    cnonce: String,
    qop: Qop,
    server_maxbuf: usize,
    ha1: [u8; 16],
    expected_rspauth: String,
    layer: Option<IntegrityLayer>,
}

impl std::fmt::Debug for DigestMd5 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestMd5")
            .field("stage", &self.stage)
            .field("qop", &self.qop)
            .finish_non_exhaustive()
    }
}

impl DigestMd5 {
    pub(crate) fn new() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::with_cnonce(STANDARD.encode(bytes))
    }

    fn with_cnonce(cnonce: String) -> Self {
        Self {
            stage: Stage::Challenge,
            cnonce,
            qop: Qop::Auth,
            server_maxbuf: MAXBUF,
            ha1: [0; 16],
            expected_rspauth: String::new(),
            layer: None,
        }
    }

    fn respond(&mut self, creds: &Credentials, challenge: &[u8]) -> Result<Vec<u8>> {
        let text = std::str::from_utf8(challenge).map_err(|_| Error::invalid("challenge is not UTF-8"))?;
        let directives = parse_directives(text)?;
        let get = |key: &str| {
            directives
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.as_str())
        };

        let nonce = get("nonce").ok_or_else(|| Error::invalid("missing nonce"))?;
        if let Some(algorithm) = get("algorithm")
            && !algorithm.eq_ignore_ascii_case("md5-sess")
        {
            return Err(Error::invalid(format!("unsupported algorithm {algorithm}")));
        }
        let realm = get("realm").unwrap_or("");
        let utf8 = get("charset").is_some_and(|c| c.eq_ignore_ascii_case("utf-8"));
        if let Some(maxbuf) = get("maxbuf") {
            self.server_maxbuf = maxbuf
                .parse()
                .map_err(|_| Error::invalid(format!("bad maxbuf {maxbuf}")))?;
        }

        let offered: Vec<String> = get("qop")
            .unwrap_or("auth")
            .split(',')
            .map(|q| q.trim().to_ascii_lowercase())
            .collect();
        self.qop = if offered.iter().any(|q| q == "auth-int") && creds.external_ssf == 0 {
            Qop::AuthInt
        } else if offered.iter().any(|q| q == "auth") {
            Qop::Auth
        } else {
            return Err(Error::invalid(format!("no supported qop in {offered:?}")));
        };

        let digest_uri = format!("{}/{}", creds.service, creds.hostname);
        let authzid = creds.effective_authzid();

        let mut inner = Md5::new();
        inner.update(creds.authid.as_bytes());
        inner.update(b":");
        inner.update(realm.as_bytes());
        inner.update(b":");
        inner.update(creds.password.as_bytes());
        let mut a1 = Md5::new();
        a1.update(inner.finalize());
        a1.update(b":");
        a1.update(nonce.as_bytes());
        a1.update(b":");
        a1.update(self.cnonce.as_bytes());
        if let Some(authzid) = authzid {
            a1.update(b":");
            a1.update(authzid.as_bytes());
        }
        self.ha1 = a1.finalize().into();

        let response = self.response_value(nonce, &format!("AUTHENTICATE:{digest_uri}"));
        self.expected_rspauth = self.response_value(nonce, &format!(":{digest_uri}"));

        let mut out = format!("username=\"{}\"", quote(&creds.authid));
        if !realm.is_empty() {
            out.push_str(&format!(",realm=\"{}\"", quote(realm)));
        }
        out.push_str(&format!(
            ",nonce=\"{}\",cnonce=\"{}\",nc={NONCE_COUNT},qop={},digest-uri=\"{}\",response={response}",
            quote(nonce),
            quote(&self.cnonce),
            self.qop.as_str(),
            quote(&digest_uri),
        ));
        if self.qop == Qop::AuthInt {
            out.push_str(&format!(",maxbuf={MAXBUF}"));
        }
        if utf8 {
            out.push_str(",charset=utf-8");
        }
        if let Some(authzid) = authzid {
            out.push_str(&format!(",authzid=\"{}\"", quote(authzid)));
        }
        debug!(qop = self.qop.as_str(), "DIGEST-MD5 response prepared");
        Ok(out.into_bytes())
    }

    fn response_value(&self, nonce: &str, a2: &str) -> String {
        let mut a2 = a2.to_string();
        if self.qop == Qop::AuthInt {
            a2.push_str(":00000000000000000000000000000000");
        }
        let ha2 = hex(&Md5::digest(a2.as_bytes()));
        let kd = format!(
            "{}:{nonce}:{NONCE_COUNT}:{}:{}:{ha2}",
            hex(&self.ha1),
            self.cnonce,
            self.qop.as_str()
        );
        hex(&Md5::digest(kd.as_bytes()))
    }

    fn verify(&mut self, challenge: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(challenge).map_err(|_| Error::invalid("challenge is not UTF-8"))?;
        let directives = parse_directives(text)?;
        let rspauth = directives
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("rspauth"))
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| Error::invalid("missing rspauth"))?;
        if !rspauth.eq_ignore_ascii_case(&self.expected_rspauth) {
            return Err(Error::ServerAuthFailed("rspauth mismatch".into()));
        }
        if self.qop == Qop::AuthInt {
            self.layer = Some(IntegrityLayer::new(&self.ha1, self.server_maxbuf));
        }
        Ok(())
    }
}

impl Client for DigestMd5 {
    fn initial(&mut self, _creds: &Credentials) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn step(&mut self, creds: &Credentials, challenge: &[u8]) -> Result<Vec<u8>> {
        match self.stage {
            Stage::Challenge => {
                let response = self.respond(creds, challenge)?;
                self.stage = Stage::Rspauth;
                Ok(response)
            }
            Stage::Rspauth => {
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

    fn ssf(&self) -> u32 {
        if self.stage == Stage::Done && self.qop == Qop::AuthInt {
            INTEGRITY_SSF
        } else {
            0
        }
    }

    fn take_layer(&mut self) -> Option<Box<dyn SecurityLayer>> {
        self.layer
            .take()
            .map(|layer| Box::new(layer) as Box<dyn SecurityLayer>)
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Parses `key=value` and `key="quoted value"` pairs separated by commas.
fn parse_directives(text: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    let mut chars = text.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if chars.next() != Some('=') {
            return Err(Error::invalid(format!("directive without value: {}", key.trim())));
        }
        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => value.push(c),
                }
            }
            if !closed {
                return Err(Error::invalid("unterminated quoted string"));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        out.push((key.trim().to_string(), value.trim().to_string()));
    }
    Ok(out)
}

/// The `auth-int` record layer: each record is a 4-byte length followed by
/// the message, a 10-byte HMAC-MD5 prefix, the type `0x0001` and a 4-byte
/// sequence number.
pub(crate) struct IntegrityLayer {
    send_key: [u8; 16],
    recv_key: [u8; 16],
    send_seq: u32,
    recv_seq: u32,
    max_outbuf: usize,
    pending: Vec<u8>,
}

impl IntegrityLayer {
    fn new(ha1: &[u8; 16], server_maxbuf: usize) -> Self {
        let key = |magic: &[u8]| -> [u8; 16] {
            let mut hasher = Md5::new();
            hasher.update(ha1);
            hasher.update(magic);
            hasher.finalize().into()
        };
        Self {
            send_key: key(CLIENT_SIGN_MAGIC),
            recv_key: key(SERVER_SIGN_MAGIC),
            send_seq: 0,
            recv_seq: 0,
            max_outbuf: server_maxbuf.saturating_sub(TRAILER_LEN).max(1),
            pending: Vec::new(),
        }
    }

    fn mac(key: &[u8; 16], seq: u32, msg: &[u8]) -> Result<[u8; 10]> {
        let mut mac = HmacMd5::new_from_slice(key).map_err(|e| Error::Layer(e.to_string()))?;
        mac.update(&seq.to_be_bytes());
        mac.update(msg);
        let full = mac.finalize().into_bytes();
        let mut out = [0u8; 10];
        out.copy_from_slice(&full[..10]);
        Ok(out)
    }
}

impl SecurityLayer for IntegrityLayer {
    fn ssf(&self) -> u32 {
        INTEGRITY_SSF
    }

    fn max_outbuf(&self) -> usize {
        self.max_outbuf
    }

    fn encode(&mut self, plain: &[u8]) -> Result<Vec<u8>> {
        let mac = Self::mac(&self.send_key, self.send_seq, plain)?;
        let len = u32::try_from(plain.len() + TRAILER_LEN)
            .map_err(|_| Error::Layer("record too large".into()))?;
        let mut out = Vec::with_capacity(plain.len() + TRAILER_LEN + 4);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(plain);
        out.extend_from_slice(&mac);
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&self.send_seq.to_be_bytes());
        self.send_seq = self.send_seq.wrapping_add(1);
        Ok(out)
    }

    fn decode(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        self.pending.extend_from_slice(input);
        let mut out = Vec::new();
        loop {
            if self.pending.len() < 4 {
                break;
            }
            let len = u32::from_be_bytes([self.pending[0], self.pending[1], self.pending[2], self.pending[3]]) as usize;
            if !(TRAILER_LEN..=MAXBUF).contains(&len) {
                return Err(Error::Layer(format!("bad record length {len}")));
            }
            if self.pending.len() < len + 4 {
                break;
            }
            let record: Vec<u8> = self.pending.drain(..len + 4).skip(4).collect();
            let (msg, trailer) = record.split_at(len - TRAILER_LEN);
            let expected = Self::mac(&self.recv_key, self.recv_seq, msg)?;
            if trailer[..10] != expected
                || trailer[10..12] != [0, 1]
                || trailer[12..] != self.recv_seq.to_be_bytes()
            {
                return Err(Error::Layer("integrity check failed".into()));
            }
            self.recv_seq = self.recv_seq.wrapping_add(1);
            out.extend_from_slice(msg);
        }
        Ok(out)
    }
}
