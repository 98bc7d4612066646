//! Account credential record.
//!
//! An [`Account`] names a remote endpoint and carries the identities and
//! secret used to authenticate against it. Every identity field is paired
//! with a presence bit: a field is only meaningful once its bit is set,
//! either by the caller or by a [`Resolver`](crate::Resolver) call that
//! returned success.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use zeroize::Zeroizing;

/// Mail service an account talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Service {
    /// IMAP mailbox access.
    Imap,
    /// POP3 mailbox access.
    Pop,
    /// SMTP submission.
    Smtp,
    /// NNTP news access.
    Nntp,
    /// No declared service.
    #[default]
    None,
}

impl Service {
    /// Returns the service name used by SASL and external commands.
    #[must_use]
    pub const fn as_str(self) -> Option<&'static str> {
        match self {
            Self::Imap => Some("imap"),
            Self::Pop => Some("pop"),
            Self::Smtp => Some("smtp"),
            Self::Nntp => Some("nntp"),
            Self::None => None,
        }
    }

    /// Returns the well-known port for this service.
    #[must_use]
    pub const fn default_port(self, tls: bool) -> u16 {
        match (self, tls) {
            (Self::Imap, false) => 143,
            (Self::Imap, true) => 993,
            (Self::Pop, false) => 110,
            (Self::Pop, true) => 995,
            (Self::Smtp, false) => 25,
            (Self::Smtp, true) => 465,
            (Self::Nntp, false) => 119,
            (Self::Nntp, true) => 563,
            (Self::None, _) => 0,
        }
    }
}

/// A credential field that can be requested from a [`FieldSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// Server hostname.
    Host,
    /// Identity the server authenticates.
    Login,
    /// Identity whose data is accessed.
    User,
    /// Password.
    Pass,
    /// Command that prints a fresh `OAuth2` access token.
    OauthCmd,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Host => "host",
            Self::Login => "login",
            Self::User => "username",
            Self::Pass => "password",
            Self::OauthCmd => "OAuth refresh command",
        };
        f.write_str(name)
    }
}

/// Set of account fields that currently hold a valid value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Present(u8);

impl Present {
    /// The `user` field.
    pub const USER: Self = Self(1 << 0);
    /// The `login` field.
    pub const LOGIN: Self = Self(1 << 1);
    /// The `pass` field.
    pub const PASS: Self = Self(1 << 2);
    /// The `port` field.
    pub const PORT: Self = Self(1 << 3);

    /// Returns an empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns true if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the bits of `other`.
    pub const fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the bits of `other`.
    pub const fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for Present {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// An interactive question put to the user.
#[derive(Debug, Clone, Copy)]
pub struct Prompt<'a> {
    /// Field being asked for.
    pub field: Field,
    /// Text shown to the user.
    pub label: &'a str,
    /// Whether the answer must not be echoed.
    pub hidden: bool,
}

/// Pluggable source of credential fields, usually backed by configuration
/// and the user interface.
pub trait FieldSource: Send + Sync {
    /// Looks up a configured value for `field`.
    fn get_field(&self, field: Field, account: &Account) -> Option<String>;

    /// Asks the user for a value. Returns `None` when no interactive UI is
    /// available or the user cancelled.
    fn prompt(&self, prompt: &Prompt<'_>) -> Option<String> {
        let _ = prompt;
        None
    }
}

/// Connection credentials for one remote account.
#[derive(Clone, Default)]
pub struct Account {
    host: String,
    port: u16,
    service: Service,
    uses_tls: bool,
    user: String,
    login: String,
    pass: Zeroizing<String>,
    present: Present,
    source: Option<Arc<dyn FieldSource>>,
}

impl Account {
    /// Creates an account for `service` on `host`.
    #[must_use]
    pub fn new(service: Service, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            service,
            ..Self::default()
        }
    }

    /// Sets an explicit port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self.present.insert(Present::PORT);
        self
    }

    /// Marks the account as using implicit TLS.
    #[must_use]
    pub const fn with_tls(mut self, tls: bool) -> Self {
        self.uses_tls = tls;
        self
    }

    /// Sets the user (authorization identity).
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.set_user(user);
        self
    }

    /// Sets the login (authentication identity).
    #[must_use]
    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        self.set_login(login);
        self
    }

    /// Sets the password.
    #[must_use]
    pub fn with_pass(mut self, pass: impl Into<String>) -> Self {
        self.set_pass(pass);
        self
    }

    /// Installs the field source used for lookups and prompts.
    #[must_use]
    pub fn with_field_source(mut self, source: Arc<dyn FieldSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Returns the hostname.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port, falling back to the service's well-known port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        if self.present.contains(Present::PORT) {
            self.port
        } else {
            self.service.default_port(self.uses_tls)
        }
    }

    /// Returns the service.
    #[must_use]
    pub const fn service(&self) -> Service {
        self.service
    }

    /// Returns true if the account uses implicit TLS.
    #[must_use]
    pub const fn uses_tls(&self) -> bool {
        self.uses_tls
    }

    /// Returns the set of fields holding a value.
    #[must_use]
    pub const fn present(&self) -> Present {
        self.present
    }

    /// Returns the user, if present.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.present
            .contains(Present::USER)
            .then_some(self.user.as_str())
    }

    /// Returns the login, if present.
    #[must_use]
    pub fn login(&self) -> Option<&str> {
        self.present
            .contains(Present::LOGIN)
            .then_some(self.login.as_str())
    }

    /// Returns the password, if present.
    #[must_use]
    pub fn pass(&self) -> Option<&str> {
        self.present
            .contains(Present::PASS)
            .then_some(self.pass.as_str())
    }

    /// Returns the installed field source.
    #[must_use]
    pub fn field_source(&self) -> Option<&Arc<dyn FieldSource>> {
        self.source.as_ref()
    }

    /// Sets the user and its presence bit.
    pub fn set_user(&mut self, user: impl Into<String>) {
        self.user = user.into();
        self.present.insert(Present::USER);
    }

    /// Sets the login and its presence bit.
    pub fn set_login(&mut self, login: impl Into<String>) {
        self.login = login.into();
        self.present.insert(Present::LOGIN);
    }

    /// Replaces the password and sets its presence bit.
    ///
    /// The previous password is zeroed when it is dropped.
    pub fn set_pass(&mut self, pass: impl Into<String>) {
        self.pass = Zeroizing::new(pass.into());
        self.present.insert(Present::PASS);
    }

    /// Zeroes the password and clears its presence bit.
    pub fn unset_pass(&mut self) {
        self.pass = Zeroizing::new(String::new());
        self.present.remove(Present::PASS);
    }

    /// Returns the value passed as `--type` to external commands, e.g. `imaps`.
    #[must_use]
    pub fn type_name(&self) -> Option<String> {
        self.service.as_str().map(|name| {
            if self.uses_tls {
                format!("{name}s")
            } else {
                name.to_string()
            }
        })
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("host", &self.host)
            .field("port", &self.port())
            .field("service", &self.service)
            .field("uses_tls", &self.uses_tls)
            .field("user", &self.user())
            .field("login", &self.login())
            .field("pass", &self.pass().map(|_| "<redacted>"))
            .field("present", &self.present)
            .field("field_source", &self.source.is_some())
            .finish()
    }
}
