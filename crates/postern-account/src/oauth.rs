//! `OAuth2` bearer token payloads.
//!
//! Implements the client initial responses for:
//! - OAUTHBEARER (RFC 7628)
//! - XOAUTH2 (Google/Microsoft proprietary, deprecated)
//!
//! The access token is obtained by running the account's refresh command,
//! which is looked up through the field source as [`Field::OauthCmd`].

use std::process::Stdio;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::process::Command;
use tracing::debug;
use zeroize::Zeroizing;

use crate::account::{Account, Field};
use crate::command::exit_reason;
use crate::error::{Error, Result};
use crate::resolver::{Resolver, lookup};

/// Bearer token mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthMechanism {
    /// OAUTHBEARER (RFC 7628).
    OAuthBearer,
    /// XOAUTH2.
    XOAuth2,
}

impl OAuthMechanism {
    /// Largest token accepted from the refresh command.
    #[must_use]
    pub const fn token_limit(self) -> usize {
        match self {
            Self::OAuthBearer => 512,
            Self::XOAuth2 => 4096,
        }
    }

    /// SASL mechanism name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::OAuthBearer => "OAUTHBEARER",
            Self::XOAuth2 => "XOAUTH2",
        }
    }
}

/// Builds the OAUTHBEARER payload (RFC 7628).
///
/// Format: `n,a=<login>,\x01host=<host>\x01port=<port>\x01auth=Bearer <token>\x01\x01`
#[must_use]
pub fn oauthbearer_payload(login: &str, host: &str, port: u16, token: &str) -> String {
    format!("n,a={login},\x01host={host}\x01port={port}\x01auth=Bearer {token}\x01\x01")
}

/// Builds the XOAUTH2 payload.
///
/// Format: `user=<login>\x01auth=Bearer <token>\x01\x01`
#[must_use]
pub fn xoauth2_payload(login: &str, token: &str) -> String {
    format!("user={login}\x01auth=Bearer {token}\x01\x01")
}

/// Runs `command` and returns the first line it prints.
async fn fetch_token(command: &str, limit: usize) -> Result<Zeroizing<String>> {
    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .await
        .map_err(|e| Error::subprocess(command, e.to_string()))?;

    if !output.status.success() {
        return Err(Error::subprocess(command, exit_reason(output.status)));
    }

    let stdout = Zeroizing::new(output.stdout);
    let text = String::from_utf8_lossy(&stdout);
    let token = text.lines().next().unwrap_or("").trim();
    if token.is_empty() {
        return Err(Error::EmptyToken);
    }
    if token.len() > limit {
        return Err(Error::TokenTooLong {
            len: token.len(),
            limit,
        });
    }
    Ok(Zeroizing::new(token.to_string()))
}

/// Builds the raw client initial response for `mechanism`.
///
/// Resolves the login, runs the refresh command and assembles the payload.
///
/// # Errors
///
/// Returns an error if the login or refresh command is unavailable, the
/// command fails, or the token is empty or too long.
pub async fn payload(
    account: &mut Account,
    resolver: &Resolver,
    mechanism: OAuthMechanism,
) -> Result<Zeroizing<String>> {
    resolver.login(account).await?;
    let command =
        lookup(account, Field::OauthCmd).ok_or_else(|| Error::missing(Field::OauthCmd, account.host()))?;
    debug!(mechanism = mechanism.name(), host = account.host(), "Refreshing OAuth token");

    let token = fetch_token(&command, mechanism.token_limit()).await?;
    let login = account.login().unwrap_or_default();
    Ok(Zeroizing::new(match mechanism {
        OAuthMechanism::OAuthBearer => {
            oauthbearer_payload(login, account.host(), account.port(), &token)
        }
        OAuthMechanism::XOAuth2 => xoauth2_payload(login, &token),
    }))
}

/// Builds the base64 client initial response for `mechanism`.
///
/// # Errors
///
/// See [`payload`].
pub async fn initial_response(
    account: &mut Account,
    resolver: &Resolver,
    mechanism: OAuthMechanism,
) -> Result<String> {
    let payload = payload(account, resolver, mechanism).await?;
    Ok(STANDARD.encode(payload.as_bytes()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::account::{FieldSource, Service};

    struct TokenCommand(&'static str);

    impl FieldSource for TokenCommand {
        fn get_field(&self, field: Field, _account: &Account) -> Option<String> {
            (field == Field::OauthCmd).then(|| self.0.to_string())
        }
    }

    fn decode(s: &str) -> String {
        String::from_utf8(STANDARD.decode(s).unwrap()).unwrap()
    }

    #[test]
    fn test_oauthbearer_payload() {
        let payload = oauthbearer_payload("user@example.com", "imap.example.com", 993, "tok");
        assert_eq!(
            payload,
            "n,a=user@example.com,\x01host=imap.example.com\x01port=993\x01auth=Bearer tok\x01\x01"
        );
    }

    #[test]
    fn test_xoauth2_payload() {
        let payload = xoauth2_payload("user@example.com", "tok");
        assert_eq!(payload, "user=user@example.com\x01auth=Bearer tok\x01\x01");
    }

    #[tokio::test]
    async fn test_initial_response_round_trips() {
        let mut account = Account::new(Service::Imap, "imap.example.com")
            .with_tls(true)
            .with_login("alice@example.com")
            .with_field_source(Arc::new(TokenCommand("echo ya29.token; echo ignored")));
        let response = initial_response(&mut account, &Resolver::new(), OAuthMechanism::OAuthBearer)
            .await
            .unwrap();
        assert_eq!(
            decode(&response),
            "n,a=alice@example.com,\x01host=imap.example.com\x01port=993\x01auth=Bearer ya29.token\x01\x01"
        );
    }

    #[tokio::test]
    async fn test_empty_token_is_error() {
        let mut account = Account::new(Service::Smtp, "smtp.example.com")
            .with_login("alice")
            .with_field_source(Arc::new(TokenCommand("true")));
        let err = initial_response(&mut account, &Resolver::new(), OAuthMechanism::XOAuth2)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyToken));
    }

    #[tokio::test]
    async fn test_token_limit() {
        let mut account = Account::new(Service::Imap, "x")
            .with_login("alice")
            .with_field_source(Arc::new(TokenCommand("head -c 600 /dev/zero | tr '\\0' a")));
        let err = initial_response(&mut account, &Resolver::new(), OAuthMechanism::OAuthBearer)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenTooLong { len: 600, limit: 512 }));

        let response = initial_response(&mut account, &Resolver::new(), OAuthMechanism::XOAuth2)
            .await
            .unwrap();
        assert!(decode(&response).starts_with("user=alice\x01auth=Bearer aaaa"));
    }

    #[tokio::test]
    async fn test_missing_command() {
        let mut account = Account::new(Service::Imap, "x").with_login("alice");
        let err = initial_response(&mut account, &Resolver::new(), OAuthMechanism::OAuthBearer)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Missing {
                field: Field::OauthCmd,
                ..
            }
        ));
    }
}
