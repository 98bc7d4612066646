//! Credential resolution.
//!
//! Missing account fields are filled from, in order: the account's
//! [`FieldSource`](crate::FieldSource), the external account command, the
//! platform keychain (passwords only) and finally an interactive prompt.
//! Failures of individual sources are logged and the next source is tried;
//! only exhausting every source is an error.

use tracing::{debug, warn};

use crate::account::{Account, Field, Prompt};
use crate::command;
use crate::error::{Error, Result};
use crate::keychain;

/// Resolves missing credential fields.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    account_command: Option<String>,
    keychain: bool,
}

impl Resolver {
    /// Creates a resolver that only consults the field source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the external credential command.
    #[must_use]
    pub fn account_command(mut self, command: impl Into<String>) -> Self {
        self.account_command = Some(command.into());
        self
    }

    /// Enables or disables the platform keychain.
    #[must_use]
    pub const fn keychain(mut self, enabled: bool) -> Self {
        self.keychain = enabled;
        self
    }

    /// Ensures `field` is present on `account`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Missing`] once every source has been exhausted.
    pub async fn resolve(&self, account: &mut Account, field: Field) -> Result<()> {
        match field {
            Field::User => self.user(account).await,
            Field::Login => self.login(account).await,
            Field::Pass => self.pass(account).await,
            Field::Host => Ok(()),
            Field::OauthCmd => lookup(account, Field::OauthCmd)
                .map(|_| ())
                .ok_or_else(|| Error::missing(field, account.host())),
        }
    }

    /// Ensures the user (authorization identity) is present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Missing`] if no source supplies a user.
    pub async fn user(&self, account: &mut Account) -> Result<()> {
        if account.user().is_some() {
            return Ok(());
        }
        if let Some(user) = lookup(account, Field::User) {
            account.set_user(user);
            return Ok(());
        }
        self.run_command(account).await;
        if account.user().is_some() {
            return Ok(());
        }

        let label = format!("Username at {}: ", account.host());
        match ask(account, Field::User, &label, false) {
            Some(user) if !user.is_empty() => {
                account.set_user(user);
                Ok(())
            }
            _ => Err(Error::missing(Field::User, account.host())),
        }
    }

    /// Ensures the login (authentication identity) is present.
    ///
    /// When nothing supplies a login, the user is resolved and used instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Missing`] if neither a login nor a user can be found.
    pub async fn login(&self, account: &mut Account) -> Result<()> {
        if account.login().is_some() {
            return Ok(());
        }
        if let Some(login) = lookup(account, Field::Login) {
            account.set_login(login);
            return Ok(());
        }
        self.run_command(account).await;
        if account.login().is_some() {
            return Ok(());
        }

        self.user(account)
            .await
            .map_err(|_| Error::missing(Field::Login, account.host()))?;
        match account.user().map(str::to_owned) {
            Some(user) => {
                account.set_login(user);
                Ok(())
            }
            None => Err(Error::missing(Field::Login, account.host())),
        }
    }

    /// Ensures the password is present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Missing`] if no source supplies a password.
    pub async fn pass(&self, account: &mut Account) -> Result<()> {
        if account.pass().is_some() {
            return Ok(());
        }
        if let Some(pass) = lookup(account, Field::Pass) {
            account.set_pass(pass);
            return Ok(());
        }
        self.run_command(account).await;
        if account.pass().is_some() {
            return Ok(());
        }

        if self.keychain {
            match keychain::lookup_password(account) {
                Ok(Some(pass)) => {
                    account.set_pass(pass);
                    return Ok(());
                }
                Ok(None) => {}
                Err(e) => debug!("Keychain lookup failed: {e}"),
            }
        }

        let who = account.login().or_else(|| account.user()).unwrap_or("");
        let label = format!("Password for {who}@{}: ", account.host());
        match ask(account, Field::Pass, &label, true) {
            Some(pass) => {
                account.set_pass(pass);
                Ok(())
            }
            None => Err(Error::missing(Field::Pass, account.host())),
        }
    }

    /// Runs the account command, if configured, and copies every reported
    /// field that is not already present.
    async fn run_command(&self, account: &mut Account) {
        let Some(cmd) = self.account_command.as_deref() else {
            return;
        };
        let output = match command::run(cmd, account).await {
            Ok(output) => output,
            Err(e) => {
                warn!("{e}");
                return;
            }
        };
        if let Some(login) = output.login
            && account.login().is_none()
        {
            account.set_login(login);
        }
        if let Some(user) = output.user
            && account.user().is_none()
        {
            account.set_user(user);
        }
        if let Some(pass) = output.pass
            && account.pass().is_none()
        {
            account.set_pass(pass);
        }
    }
}

/// Asks the account's field source for a configured value.
pub(crate) fn lookup(account: &Account, field: Field) -> Option<String> {
    account
        .field_source()
        .and_then(|source| source.get_field(field, account))
}

/// Prompts through the account's field source.
fn ask(account: &Account, field: Field, label: &str, hidden: bool) -> Option<String> {
    let source = account.field_source()?;
    source.prompt(&Prompt {
        field,
        label,
        hidden,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::similar_names)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::account::{FieldSource, Present, Service};

    #[derive(Default)]
    struct Scripted {
        fields: HashMap<Field, String>,
        answers: HashMap<Field, String>,
        prompts: Mutex<Vec<(String, bool)>>,
    }

    impl FieldSource for Scripted {
        fn get_field(&self, field: Field, _account: &Account) -> Option<String> {
            self.fields.get(&field).cloned()
        }

        fn prompt(&self, prompt: &Prompt<'_>) -> Option<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.label.to_string(), prompt.hidden));
            self.answers.get(&prompt.field).cloned()
        }
    }

    #[tokio::test]
    async fn test_present_field_is_kept() {
        let mut account = Account::new(Service::Imap, "x").with_login("alice");
        Resolver::new().login(&mut account).await.unwrap();
        assert_eq!(account.login(), Some("alice"));
    }

    #[tokio::test]
    async fn test_field_source_wins() {
        let source = Scripted {
            fields: HashMap::from([(Field::Pass, "from-config".to_string())]),
            ..Scripted::default()
        };
        let mut account = Account::new(Service::Imap, "x").with_field_source(Arc::new(source));
        Resolver::new().pass(&mut account).await.unwrap();
        assert_eq!(account.pass(), Some("from-config"));
    }

    #[tokio::test]
    async fn test_no_source_fails_with_missing() {
        let mut account = Account::new(Service::Imap, "imap.example.org");
        let err = Resolver::new().pass(&mut account).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Missing {
                field: Field::Pass,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_account_command_fills_fields() {
        let mut account = Account::new(Service::Imap, "x").with_tls(true);
        let resolver =
            Resolver::new().account_command("printf 'login: alice\\npassword: s3cret\\n'; :");
        resolver.login(&mut account).await.unwrap();
        resolver.pass(&mut account).await.unwrap();
        assert_eq!(account.login(), Some("alice"));
        assert_eq!(account.pass(), Some("s3cret"));
        assert!(account.present().contains(Present::LOGIN | Present::PASS));
    }

    #[tokio::test]
    async fn test_failing_command_falls_through_to_prompt() {
        let source = Scripted {
            answers: HashMap::from([(Field::Pass, "typed".to_string())]),
            ..Scripted::default()
        };
        let source = Arc::new(source);
        let mut account = Account::new(Service::Smtp, "smtp.example.org")
            .with_login("bob")
            .with_field_source(source.clone());
        let resolver = Resolver::new().account_command("exit 1;");
        resolver.pass(&mut account).await.unwrap();
        assert_eq!(account.pass(), Some("typed"));
        let prompts = source.prompts.lock().unwrap();
        assert_eq!(
            prompts.as_slice(),
            [("Password for bob@smtp.example.org: ".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_login_falls_back_to_user() {
        let source = Scripted {
            answers: HashMap::from([(Field::User, "carol".to_string())]),
            ..Scripted::default()
        };
        let source = Arc::new(source);
        let mut account = Account::new(Service::Pop, "pop.example.org")
            .with_field_source(source.clone());
        Resolver::new().login(&mut account).await.unwrap();
        assert_eq!(account.user(), Some("carol"));
        assert_eq!(account.login(), Some("carol"));
        let prompts = source.prompts.lock().unwrap();
        assert_eq!(prompts[0], ("Username at pop.example.org: ".to_string(), false));
    }

    #[tokio::test]
    async fn test_empty_user_answer_is_rejected() {
        let source = Scripted {
            answers: HashMap::from([(Field::User, String::new())]),
            ..Scripted::default()
        };
        let mut account = Account::new(Service::Imap, "x").with_field_source(Arc::new(source));
        assert!(Resolver::new().user(&mut account).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_oauth_command_requires_source() {
        let mut account = Account::new(Service::Imap, "x");
        let err = Resolver::new()
            .resolve(&mut account, Field::OauthCmd)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("OAuth refresh command"));
    }
}
