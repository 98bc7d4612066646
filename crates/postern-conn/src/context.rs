//! State shared by every connection of a session.

use std::fmt;
use std::sync::Arc;

use postern_account::{Account, Resolver};
use postern_tls::{NonInteractive, TlsPolicy, TrustPrompt, TrustStore};

use crate::connection::{Connection, TransportKind};
use crate::interrupt::Interrupt;
use crate::settings::Settings;

/// Settings, trust cache, trust prompt and interrupt token for a session.
///
/// Clones share the trust cache and the interrupt token, so a certificate
/// accepted on one connection is trusted by the next, and one Ctrl-C stops
/// every connection.
#[derive(Clone)]
pub struct SessionContext {
    pub(crate) settings: Arc<Settings>,
    pub(crate) policy: Arc<TlsPolicy>,
    pub(crate) resolver: Resolver,
    pub(crate) store: TrustStore,
    pub(crate) prompt: Arc<dyn TrustPrompt>,
    pub(crate) interrupt: Interrupt,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("settings", &self.settings)
            .field("trusted", &self.store.len())
            .field("interrupted", &self.interrupt.is_triggered())
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Creates a context that rejects every questionable certificate.
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            policy: Arc::new(settings.tls_policy()),
            resolver: settings.resolver(),
            settings: Arc::new(settings),
            store: TrustStore::new(),
            prompt: Arc::new(NonInteractive),
            interrupt: Interrupt::new(),
        }
    }

    /// Sets the trust prompt.
    #[must_use]
    pub fn trust_prompt(mut self, prompt: Arc<dyn TrustPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Shares an existing trust cache.
    #[must_use]
    pub fn trust_store(mut self, store: TrustStore) -> Self {
        self.store = store;
        self
    }

    /// Shares an existing interrupt token.
    #[must_use]
    pub fn interrupt_with(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Returns the settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Returns the trust cache.
    #[must_use]
    pub const fn store(&self) -> &TrustStore {
        &self.store
    }

    /// Returns the interrupt token.
    #[must_use]
    pub const fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Returns the credential resolver.
    #[must_use]
    pub const fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Picks the transport for `account`: the tunnel when one is configured,
    /// otherwise TLS or plain TCP according to the account.
    #[must_use]
    pub fn transport_for(&self, account: &Account) -> TransportKind {
        if self.settings.tunnel.is_some() {
            TransportKind::Tunnel
        } else if account.uses_tls() {
            TransportKind::Tls
        } else {
            TransportKind::Plain
        }
    }

    /// Creates an unopened connection for `account`.
    #[must_use]
    pub fn connection(&self, account: Account) -> Connection {
        let kind = self.transport_for(&account);
        Connection::new(account, kind, self.clone())
    }
}

#[cfg(test)]
mod tests {
    use postern_account::Service;

    use super::*;

    #[test]
    fn test_transport_choice() {
        let ctx = SessionContext::new(Settings::default());
        let plain = Account::new(Service::Imap, "imap.example.org");
        let tls = Account::new(Service::Imap, "imap.example.org").with_tls(true);
        assert_eq!(ctx.transport_for(&plain), TransportKind::Plain);
        assert_eq!(ctx.transport_for(&tls), TransportKind::Tls);

        let ctx = SessionContext::new(Settings::default().tunnel("ssh mail imapd"));
        assert_eq!(ctx.transport_for(&tls), TransportKind::Tunnel);
    }

    #[test]
    fn test_clones_share_state() {
        let ctx = SessionContext::new(Settings::default());
        let other = ctx.clone();
        other.interrupt().trigger();
        assert!(ctx.interrupt().is_triggered());
    }
}
