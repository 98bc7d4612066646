//! Password lookup in the platform keychain.
//!
//! Uses the platform's native credential storage:
//! - Linux: Secret Service (GNOME Keyring, `KWallet`)
//! - macOS: Keychain
//! - Windows: Credential Manager
//!
//! Entries are keyed by an internet-password style service name,
//! `<type>://<host>:<port>`, and the account's user name.

use keyring::Entry;
use tracing::debug;

use crate::account::Account;
use crate::error::Result;

/// Builds the keychain service name for an account.
pub(crate) fn service_name(account: &Account) -> String {
    let kind = account.type_name().unwrap_or_else(|| "mail".to_string());
    format!("{kind}://{}:{}", account.host(), account.port())
}

/// Returns the name the entry is stored under: the login, else the user.
fn entry_user(account: &Account) -> Option<&str> {
    account.login().or_else(|| account.user())
}

/// Looks up the password for `account`.
///
/// Returns `Ok(None)` when no user is known yet or no entry exists.
///
/// # Errors
///
/// Returns an error if the keyring operation fails.
pub fn lookup_password(account: &Account) -> Result<Option<String>> {
    let Some(user) = entry_user(account) else {
        return Ok(None);
    };
    let service = service_name(account);
    let entry = Entry::new(&service, user)?;
    match entry.get_password() {
        Ok(password) => Ok(Some(password)),
        Err(keyring::Error::NoEntry) => {
            debug!(service = %service, "No keychain entry");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
