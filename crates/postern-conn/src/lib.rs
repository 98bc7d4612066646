//! # postern-conn
//!
//! Byte-stream connections to mail servers.
//!
//! A [`Connection`] opens one of three transports, plain TCP, a tunnel
//! command, or TLS, and can later stack further layers on top: STARTTLS,
//! a SASL security layer, and deflate compression. Protocol code above it
//! sees only lines and bytes.
//!
//! Connections of one run share a [`SessionContext`]: the settings, the
//! certificate trust cache, the trust prompt and the interrupt token.
//!
//! ## Example
//!
//! ```no_run
//! use postern_account::{Account, Service};
//! use postern_conn::{SessionContext, Settings};
//!
//! # async fn example() -> postern_conn::Result<()> {
//! let ctx = SessionContext::new(Settings::default());
//! let account = Account::new(Service::Imap, "imap.example.org").with_tls(true);
//! let mut conn = ctx.connection(account);
//!
//! conn.open().await?;
//! let greeting = conn.read_line().await?;
//! println!("{}", String::from_utf8_lossy(&greeting));
//! conn.write_all(b"a1 LOGOUT\r\n").await?;
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod compress;
mod connection;
mod context;
mod error;
mod interrupt;
mod raw;
mod sasl;
mod settings;
mod stream;
mod tls;
mod tunnel;

pub use connection::{Connection, TransportKind};
pub use context::SessionContext;
pub use error::{Error, ErrorKind, Result};
pub use interrupt::Interrupt;
pub use settings::{Settings, expand_path};
