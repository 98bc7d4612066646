//! Error types for SASL exchanges.

use thiserror::Error;

/// Errors that can occur during a SASL exchange.
#[derive(Debug, Error)]
pub enum Error {
    /// The mechanism name is not known.
    #[error("Unknown SASL mechanism: {0}")]
    UnknownMechanism(String),

    /// None of the server's mechanisms can be used.
    #[error("No usable SASL mechanism offered by server")]
    NoMechanism,

    /// The connection has no declared service.
    #[error("Unknown SASL profile")]
    NoService,

    /// A property the mechanism needs was not supplied.
    #[error("Missing SASL property: {0}")]
    MissingProperty(&'static str),

    /// The server sent a challenge the mechanism cannot parse.
    #[error("Invalid server challenge: {0}")]
    InvalidChallenge(String),

    /// The server failed to prove it knows the credentials.
    #[error("Server authentication failed: {0}")]
    ServerAuthFailed(String),

    /// A step was requested after the exchange completed.
    #[error("SASL exchange already complete")]
    Complete,

    /// The security layer rejected a record.
    #[error("SASL security layer error: {0}")]
    Layer(String),

    /// Invalid base64 from the server.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl Error {
    /// Creates an invalid-challenge error.
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidChallenge(msg.into())
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
