//! # postern-tls
//!
//! TLS client setup and interactive certificate trust for mail connections.
//!
//! Server certificates are checked in two passes. A chain that verifies
//! cleanly, or that reaches a certificate the user pinned earlier, is
//! accepted without asking. Otherwise every problematic certificate is shown
//! to a [`TrustPrompt`], from the root toward the leaf, and the user decides
//! whether to reject it, accept it for this run, save it to the pinned
//! certificate file, or skip it.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use postern_tls::{NonInteractive, TlsClient, TlsPolicy, TrustStore};
//!
//! let store = TrustStore::new();
//! let client = TlsClient::new(
//!     &TlsPolicy::default(),
//!     "imap.example.org",
//!     &store,
//!     Arc::new(NonInteractive),
//!     None,
//! )?;
//! let _config = client.config();
//! # Ok::<(), postern_tls::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cert;
mod config;
mod error;
mod pinned;
mod policy;
mod prompt;
mod status;
mod store;
mod verifier;
mod verify;

pub use cert::{CertInfo, FingerprintAlg, NameParts, format_fingerprint, normalize_fingerprint};
pub use config::{TlsClient, client_key_is_encrypted, sni_name, ssf_for_suite, supported_cipher_suites};
pub use error::{Error, Result};
pub use pinned::{HostOverride, PinnedFile, to_pem};
pub use policy::TlsPolicy;
pub use prompt::{NonInteractive, TrustDecision, TrustPrompt};
pub use status::CertErrorSet;
pub use store::TrustStore;
pub use verifier::VerifyOutcome;
pub use verify::Rejection;
