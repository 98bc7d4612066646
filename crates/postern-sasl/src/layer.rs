//! SASL security layers.

use crate::error::Result;

/// Largest buffer this client accepts from the server in one record.
pub const MAXBUF: usize = 65536;

/// Per-record protection negotiated during authentication.
///
/// `decode` may be called with arbitrary slices of the inbound byte stream;
/// implementations buffer incomplete records and return only the plaintext
/// of records completed so far, which may be empty.
pub trait SecurityLayer: Send {
    /// Security strength factor of the layer.
    fn ssf(&self) -> u32;

    /// Largest plaintext chunk that may be passed to `encode` at once.
    fn max_outbuf(&self) -> usize;

    /// Protects one chunk of outbound plaintext.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk cannot be protected.
    fn encode(&mut self, plain: &[u8]) -> Result<Vec<u8>>;

    /// Consumes inbound bytes and returns any plaintext now available.
    ///
    /// # Errors
    ///
    /// Returns an error if a record fails verification.
    fn decode(&mut self, input: &[u8]) -> Result<Vec<u8>>;
}

impl std::fmt::Debug for dyn SecurityLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityLayer")
            .field("ssf", &self.ssf())
            .field("max_outbuf", &self.max_outbuf())
            .finish()
    }
}
