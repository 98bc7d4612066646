//! Error types for connections.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use postern_tls::CertErrorSet;
use thiserror::Error;

/// Broad category of a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required setting or credential is unavailable.
    ConfigMissing,
    /// The server's name could not be resolved.
    ResolveFailed,
    /// No address of the server accepted the connection.
    ConnectFailed,
    /// TLS could not be established.
    HandshakeFailed,
    /// A server certificate was refused.
    CertRejected,
    /// Authentication failed.
    AuthFailed,
    /// A helper command failed.
    SubprocessFailed,
    /// Reading from or writing to the connection failed.
    IoError,
    /// The user interrupted the operation.
    Interrupted,
    /// The peer sent something unexpected.
    ProtocolViolation,
    /// The operation is not available in this configuration.
    NotSupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConfigMissing => "config_missing",
            Self::ResolveFailed => "resolve_failed",
            Self::ConnectFailed => "connect_failed",
            Self::HandshakeFailed => "handshake_failed",
            Self::CertRejected => "cert_rejected",
            Self::AuthFailed => "auth_failed",
            Self::SubprocessFailed => "subprocess_failed",
            Self::IoError => "io_error",
            Self::Interrupted => "interrupted",
            Self::ProtocolViolation => "protocol_violation",
            Self::NotSupported => "not_supported",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while opening or using a connection.
#[derive(Debug, Error)]
pub enum Error {
    /// Credential resolution or token retrieval failed.
    #[error(transparent)]
    Account(#[from] postern_account::Error),

    /// SASL negotiation failed.
    #[error(transparent)]
    Sasl(#[from] postern_sasl::Error),

    /// TLS setup failed before the handshake started.
    #[error(transparent)]
    Tls(#[from] postern_tls::Error),

    /// Settings could not be loaded.
    #[error("Error reading {}: {message}", .path.display())]
    Settings {
        /// The settings file.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// The connection has no host to talk to.
    #[error("No host configured")]
    NoHost,

    /// A setting the transport depends on is unset.
    #[error("No {0} configured")]
    MissingSetting(&'static str),

    /// Name resolution failed.
    #[error("Could not find the host \"{host}\": {source}")]
    Resolve {
        /// The name that was looked up.
        host: String,
        /// The resolver's error.
        source: std::io::Error,
    },

    /// Every resolved address refused or timed out.
    #[error("Could not connect to {host} ({source})")]
    Connect {
        /// The server's name.
        host: String,
        /// The error from the last address tried.
        source: std::io::Error,
    },

    /// The connect timeout expired.
    #[error("Connection to {host} timed out after {timeout:?}")]
    ConnectTimeout {
        /// The server's name.
        host: String,
        /// The configured timeout.
        timeout: Duration,
    },

    /// The TLS handshake failed.
    #[error(
        "SSL/TLS handshake with {host} failed: {message}{}",
        .alert.as_ref().map(|a| format!(" (alert: {a})")).unwrap_or_default()
    )]
    Handshake {
        /// The server's name.
        host: String,
        /// Library error text.
        message: String,
        /// Alert sent by the peer, if any.
        alert: Option<String>,
    },

    /// The user, or batch mode, refused a server certificate.
    #[error("Certificate {} of the chain from {host} was rejected ({errors})", .index + 1)]
    CertRejected {
        /// The server's name.
        host: String,
        /// Position of the refused certificate; 0 is the leaf.
        index: usize,
        /// Problems with that certificate.
        errors: CertErrorSet,
    },

    /// The server rejected the credentials.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A helper command exited unsuccessfully.
    #[error("Command `{command}` failed: {reason}")]
    Subprocess {
        /// The command as configured.
        command: String,
        /// Decoded exit reason or spawn error.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection.
    #[error("Connection to {0} closed")]
    Closed(String),

    /// The connection is not open.
    #[error("Connection to {0} is not open")]
    NotOpen(String),

    /// The user interrupted the operation.
    #[error("Interrupted")]
    Interrupted,

    /// The peer violated the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The operation is not available.
    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl Error {
    /// Returns the category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Account(e) => match e {
                postern_account::Error::Subprocess { .. } => ErrorKind::SubprocessFailed,
                postern_account::Error::EmptyToken | postern_account::Error::TokenTooLong { .. } => {
                    ErrorKind::AuthFailed
                }
                postern_account::Error::Io(_) => ErrorKind::IoError,
                _ => ErrorKind::ConfigMissing,
            },
            Self::Sasl(e) => match e {
                postern_sasl::Error::NoService | postern_sasl::Error::MissingProperty(_) => {
                    ErrorKind::ConfigMissing
                }
                postern_sasl::Error::UnknownMechanism(_) | postern_sasl::Error::NoMechanism => {
                    ErrorKind::NotSupported
                }
                postern_sasl::Error::ServerAuthFailed(_) => ErrorKind::AuthFailed,
                _ => ErrorKind::ProtocolViolation,
            },
            Self::Tls(_) | Self::Handshake { .. } => ErrorKind::HandshakeFailed,
            Self::Settings { .. } | Self::NoHost | Self::MissingSetting(_) => ErrorKind::ConfigMissing,
            Self::Resolve { .. } => ErrorKind::ResolveFailed,
            Self::Connect { .. } | Self::ConnectTimeout { .. } => ErrorKind::ConnectFailed,
            Self::CertRejected { .. } => ErrorKind::CertRejected,
            Self::Auth(_) => ErrorKind::AuthFailed,
            Self::Subprocess { .. } => ErrorKind::SubprocessFailed,
            Self::Io(_) | Self::Closed(_) | Self::NotOpen(_) => ErrorKind::IoError,
            Self::Interrupted => ErrorKind::Interrupted,
            Self::Protocol(_) => ErrorKind::ProtocolViolation,
            Self::NotSupported(_) => ErrorKind::NotSupported,
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

    /// Returns true if the connection must be closed after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::IoError | ErrorKind::Interrupted | ErrorKind::HandshakeFailed
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(Error::Interrupted.kind(), ErrorKind::Interrupted);
        assert_eq!(Error::Closed("x".into()).kind(), ErrorKind::IoError);
        assert_eq!(
            Error::from(postern_sasl::Error::NoMechanism).kind(),
            ErrorKind::NotSupported
        );
        assert_eq!(
            Error::from(postern_tls::Error::AllProtocolsDisabled).kind(),
            ErrorKind::HandshakeFailed
        );
        assert_eq!(
            Error::from(postern_account::Error::subprocess("false", "exited with status 1")).kind(),
            ErrorKind::SubprocessFailed
        );
        assert!(Error::Interrupted.is_fatal());
        assert!(!Error::Auth("no".into()).is_fatal());
    }

    #[test]
    fn test_messages() {
        let err = Error::Handshake {
            host: "mail.example.org".into(),
            message: "received fatal alert".into(),
            alert: Some("HandshakeFailure".into()),
        };
        assert_eq!(
            err.to_string(),
            "SSL/TLS handshake with mail.example.org failed: received fatal alert (alert: HandshakeFailure)"
        );

        let err = Error::subprocess("ssh tunnel", "exited with status 255");
        assert_eq!(err.to_string(), "Command `ssh tunnel` failed: exited with status 255");

        let err = Error::CertRejected {
            host: "h".into(),
            index: 0,
            errors: CertErrorSet::EXPIRED,
        };
        assert_eq!(err.to_string(), "Certificate 1 of the chain from h was rejected (expired)");
    }
}
