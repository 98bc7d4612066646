//! Error types for credential resolution.

use thiserror::Error;

use crate::account::Field;

/// Errors that can occur while resolving account credentials.
#[derive(Debug, Error)]
pub enum Error {
    /// Every source was consulted and none supplied the field.
    #[error("No {field} available for {host}")]
    Missing {
        /// The field that could not be resolved.
        field: Field,
        /// Host the account belongs to.
        host: String,
    },

    /// An external command could not be run or exited unsuccessfully.
    #[error("Command `{command}` failed: {reason}")]
    Subprocess {
        /// The command as configured.
        command: String,
        /// Decoded exit reason or spawn error.
        reason: String,
    },

    /// The OAuth refresh command printed nothing.
    #[error("OAuth refresh command returned an empty token")]
    EmptyToken,

    /// The OAuth token exceeds the size the mechanism allows.
    #[error("OAuth token is {len} bytes, limit is {limit}")]
    TokenTooLong {
        /// Length of the token returned by the command.
        len: usize,
        /// Limit for the requested mechanism.
        limit: usize,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Keychain access failed.
    #[error("Keychain error: {0}")]
    Keychain(#[from] keyring::Error),
}

impl Error {
    /// Creates a missing-field error.
    #[must_use]
    pub fn missing(field: Field, host: impl Into<String>) -> Self {
        Self::Missing {
            field,
            host: host.into(),
        }
    }

    /// Creates a subprocess error.
    #[must_use]
    pub fn subprocess(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Subprocess {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
