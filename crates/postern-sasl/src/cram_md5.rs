//! CRAM-MD5 (RFC 2195).

use hmac::{Hmac, Mac};
use md5::Md5;

use crate::error::{Error, Result};
use crate::session::{Client, Credentials};

type HmacMd5 = Hmac<Md5>;

#[derive(Debug, Default)]
pub(crate) struct CramMd5 {
    done: bool,
}

/// Lower-case hex encoding.
pub(crate) fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

impl Client for CramMd5 {
    fn initial(&mut self, _creds: &Credentials) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn step(&mut self, creds: &Credentials, challenge: &[u8]) -> Result<Vec<u8>> {
        if challenge.is_empty() {
            return Err(Error::invalid("empty CRAM-MD5 challenge"));
        }
        let mut mac = HmacMd5::new_from_slice(creds.password.as_bytes())
            .map_err(|e| Error::invalid(e.to_string()))?;
        mac.update(challenge);
        let digest = mac.finalize().into_bytes();
        self.done = true;
        Ok(format!("{} {}", creds.authid, hex(&digest)).into_bytes())
    }

    fn is_complete(&self) -> bool {
        self.done
    }
}
