//! Terminal prompts for credentials and certificates.

use std::io::{self, BufRead, Write};

use nix::sys::termios::{self, LocalFlags, SetArg};
use postern_account::{Account, Field, FieldSource, Prompt};
use postern_tls::{TrustDecision, TrustPrompt};
use tracing::warn;
use zeroize::Zeroizing;

fn read_answer() -> io::Result<Option<String>> {
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let len = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(len);
    Ok(Some(line))
}

/// Reads one line with terminal echo switched off.
fn read_hidden() -> io::Result<Option<Zeroizing<String>>> {
    let stdin = io::stdin();
    let Ok(original) = termios::tcgetattr(&stdin) else {
        // Not a terminal; read as is.
        return Ok(read_answer()?.map(Zeroizing::new));
    };
    let mut silent = original.clone();
    silent.local_flags.remove(LocalFlags::ECHO);
    termios::tcsetattr(&stdin, SetArg::TCSAFLUSH, &silent)?;

    let answer = read_answer();
    termios::tcsetattr(&stdin, SetArg::TCSAFLUSH, &original)?;
    eprintln!();
    Ok(answer?.map(Zeroizing::new))
}

/// Asks for missing credential fields on the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalSource;

impl FieldSource for TerminalSource {
    fn get_field(&self, _field: Field, _account: &Account) -> Option<String> {
        None
    }

    fn prompt(&self, prompt: &Prompt<'_>) -> Option<String> {
        eprint!("{}", prompt.label);
        io::stderr().flush().ok();
        let answer = if prompt.hidden {
            read_hidden().map(|answer| answer.map(|secret| secret.as_str().to_string()))
        } else {
            read_answer()
        };
        match answer {
            Ok(answer) => answer.filter(|value| !value.is_empty()),
            Err(e) => {
                warn!(field = ?prompt.field, error = %e, "Failed to read from terminal");
                None
            }
        }
    }
}

/// Menu text and accepted keys for one certificate question.
fn choices(allow_always: bool, allow_skip: bool) -> (String, Vec<(char, TrustDecision)>) {
    let mut labels = vec!["(r)eject", "accept (o)nce"];
    let mut keys = vec![('r', TrustDecision::Reject), ('o', TrustDecision::AcceptOnce)];
    if allow_always {
        labels.push("(a)ccept always");
        keys.push(('a', TrustDecision::AcceptAlways));
    }
    if allow_skip {
        labels.push("(s)kip");
        keys.push(('s', TrustDecision::Skip));
    }
    (labels.join(", "), keys)
}

/// Shows certificates on stderr and reads the decision from stdin.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl TrustPrompt for TerminalPrompt {
    fn verify_cert(&self, title: &str, lines: &[String], allow_always: bool, allow_skip: bool) -> TrustDecision {
        let (menu, keys) = choices(allow_always, allow_skip);
        eprintln!("\n{title}\n");
        for line in lines {
            eprintln!("{line}");
        }
        loop {
            eprint!("\n{menu}? ");
            io::stderr().flush().ok();
            let answer = match read_answer() {
                Ok(Some(answer)) => answer,
                Ok(None) => return TrustDecision::Reject,
                Err(e) => {
                    warn!(error = %e, "Failed to read from terminal");
                    return TrustDecision::Reject;
                }
            };
            let key = answer.trim().chars().next().map(|c| c.to_ascii_lowercase());
            if let Some(&(_, decision)) = keys.iter().find(|(k, _)| Some(*k) == key) {
                return decision;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choices_follow_permissions() {
        let (menu, keys) = choices(false, false);
        assert_eq!(menu, "(r)eject, accept (o)nce");
        assert_eq!(keys.len(), 2);

        let (menu, keys) = choices(true, true);
        assert_eq!(menu, "(r)eject, accept (o)nce, (a)ccept always, (s)kip");
        assert!(keys.contains(&('s', TrustDecision::Skip)));

        let (menu, _) = choices(false, true);
        assert_eq!(menu, "(r)eject, accept (o)nce, (s)kip");
    }
}
