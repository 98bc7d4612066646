//! # postern-sasl
//!
//! Client side of SASL (RFC 4422) for mail protocols.
//!
//! This crate provides:
//! - Mechanism name validation and automatic selection
//! - PLAIN, LOGIN, CRAM-MD5, DIGEST-MD5, SCRAM-SHA-1, SCRAM-SHA-256,
//!   EXTERNAL, ANONYMOUS, OAUTHBEARER and XOAUTH2 clients
//! - The DIGEST-MD5 integrity layer, exposed through [`SecurityLayer`]
//!
//! The crate performs no I/O: the caller moves challenges and responses
//! over its own protocol and installs any negotiated layer on its stream.
//!
//! ## Example
//!
//! ```
//! use postern_sasl::{Credentials, Session, suggest_mechanism};
//!
//! let mech = suggest_mechanism(&["PLAIN", "LOGIN"], None).unwrap();
//! let creds = Credentials {
//!     authid: "alice".into(),
//!     password: "s3cret".to_string().into(),
//!     service: "imap".into(),
//!     hostname: "imap.example.org".into(),
//!     ..Credentials::default()
//! };
//! let mut session = Session::new(mech, creds).unwrap();
//! let first = session.initial_response_base64().unwrap();
//! assert_eq!(first.as_deref(), Some("AGFsaWNlAHMzY3JldA=="));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cram_md5;
mod digest_md5;
mod error;
mod layer;
mod mechanism;
mod scram;
mod session;
mod simple;

pub use error::{Error, Result};
pub use layer::{MAXBUF, SecurityLayer};
pub use mechanism::{AUTHENTICATORS, Mechanism, is_valid_authenticator, suggest_mechanism};
pub use session::{Credentials, Session};
