//! # postern-account
//!
//! Account credentials for mail server connections.
//!
//! This crate provides:
//! - The [`Account`] record with per-field presence tracking
//! - The [`Resolver`], which fills missing fields from configuration, an
//!   external command, the platform keychain or an interactive prompt
//! - `OAuth2` client initial responses (OAUTHBEARER and XOAUTH2)
//!
//! ## Example
//!
//! ```ignore
//! use postern_account::{Account, Resolver, Service};
//!
//! let mut account = Account::new(Service::Imap, "imap.example.org").with_tls(true);
//! let resolver = Resolver::new().account_command("~/bin/mail-credentials");
//! resolver.login(&mut account).await?;
//! resolver.pass(&mut account).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod account;
mod command;
mod error;
pub mod keychain;
pub mod oauth;
mod resolver;

pub use account::{Account, Field, FieldSource, Present, Prompt, Service};
pub use command::exit_reason;
pub use error::{Error, Result};
pub use oauth::OAuthMechanism;
pub use resolver::Resolver;
