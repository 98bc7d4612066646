//! External credential command.
//!
//! The command is run through `/bin/sh -c` with `--hostname <host>`,
//! `--username <user>` (when known) and `--type <service>[s]` appended as
//! separate arguments. It reads nothing from stdin and prints
//! `key: value` lines, where `key` is one of `login`, `username` or
//! `password`.

use std::process::{ExitStatus, Stdio};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::account::Account;
use crate::error::{Error, Result};

/// Fields reported by one run of the account command.
#[derive(Default, PartialEq, Eq)]
pub(crate) struct CommandOutput {
    pub login: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
}

impl std::fmt::Debug for CommandOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandOutput")
            .field("login", &self.login)
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Builds the argument list passed to the account command.
pub(crate) fn arguments(account: &Account) -> Vec<String> {
    let mut args = vec!["--hostname".to_string(), account.host().to_string()];
    if let Some(user) = account.user() {
        args.push("--username".to_string());
        args.push(user.to_string());
    }
    if let Some(kind) = account.type_name() {
        args.push("--type".to_string());
        args.push(kind);
    }
    args
}

/// Parses the command's standard output.
pub(crate) fn parse_output(output: &str) -> CommandOutput {
    let mut parsed = CommandOutput::default();
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            warn!("Ignoring malformed line from account command");
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "login" => parsed.login = Some(value),
            "username" => parsed.user = Some(value),
            "password" => parsed.pass = Some(value),
            other => warn!(key = other, "Unknown key from account command"),
        }
    }
    parsed
}

/// Formats an exit status the way the shell reports it.
pub fn exit_reason(status: ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by signal {signal}");
        }
    }
    status.code().map_or_else(
        || status.to_string(),
        |code| format!("exited with status {code}"),
    )
}

/// Runs the account command and parses what it prints.
pub(crate) async fn run(command: &str, account: &Account) -> Result<CommandOutput> {
    let args = arguments(account);
    debug!(host = account.host(), "Running account command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(format!("{command} \"$@\""))
        .arg("sh")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .await
        .map_err(|e| Error::subprocess(command, e.to_string()))?;

    if !output.status.success() {
        return Err(Error::subprocess(command, exit_reason(output.status)));
    }

    Ok(parse_output(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::account::Service;

    #[test]
    fn test_arguments_with_tls() {
        let account = Account::new(Service::Imap, "x").with_tls(true);
        assert_eq!(arguments(&account), ["--hostname", "x", "--type", "imaps"]);
    }

    #[test]
    fn test_arguments_with_user() {
        let account = Account::new(Service::Smtp, "mail.example.org").with_user("bob");
        assert_eq!(
            arguments(&account),
            [
                "--hostname",
                "mail.example.org",
                "--username",
                "bob",
                "--type",
                "smtp"
            ]
        );
    }

    #[test]
    fn test_arguments_without_service() {
        let account = Account::new(Service::None, "x");
        assert_eq!(arguments(&account), ["--hostname", "x"]);
    }

    #[test]
    fn test_parse_output() {
        let parsed = parse_output("login: alice\npassword: s3cret\n");
        assert_eq!(parsed.login.as_deref(), Some("alice"));
        assert_eq!(parsed.pass.as_deref(), Some("s3cret"));
        assert_eq!(parsed.user, None);
    }

    #[test]
    fn test_parse_output_whitespace_and_colons() {
        let parsed = parse_output("  username :  bob  \npassword: a:b:c\n");
        assert_eq!(parsed.user.as_deref(), Some("bob"));
        assert_eq!(parsed.pass.as_deref(), Some("a:b:c"));
    }

    #[test]
    fn test_parse_output_ignores_unknown_and_malformed() {
        let parsed = parse_output("token: abc\nnonsense\n\nlogin: carol\n");
        assert_eq!(
            parsed,
            CommandOutput {
                login: Some("carol".to_string()),
                ..CommandOutput::default()
            }
        );
    }

    #[tokio::test]
    async fn test_run_passes_arguments() {
        let account = Account::new(Service::Pop, "pop.example.org").with_tls(true);
        let output = run("printf 'login: %s\\n' \"$2\"; :", &account)
            .await
            .unwrap();
        assert_eq!(output.login.as_deref(), Some("pop.example.org"));
    }

    #[tokio::test]
    async fn test_run_failure_reports_status() {
        let account = Account::new(Service::Imap, "x");
        let err = run("exit 3;", &account).await.unwrap_err();
        assert!(err.to_string().contains("exited with status 3"), "{err}");
    }
}
