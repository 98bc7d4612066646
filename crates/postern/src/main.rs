//! `postern` - try out a mail server connection.
//!
//! Opens a connection the way a mail client would, with the same settings,
//! certificate checks and credential prompts, and shows the conversation.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod args;
mod session;
mod terminal;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use postern_account::Account;
use postern_conn::{SessionContext, Settings};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use args::{Args, USAGE};
use terminal::{TerminalPrompt, TerminalSource};

fn load_settings(args: &Args) -> Result<Settings> {
    if let Some(path) = &args.settings {
        return Settings::load(path).with_context(|| format!("reading {}", path.display()));
    }
    match Settings::default_path() {
        Some(path) if path.exists() => Ok(Settings::load(&path)?),
        _ => {
            debug!("No settings file, using defaults");
            Ok(Settings::default())
        }
    }
}

fn account(args: &Args) -> Account {
    let mut account = Account::new(args.service, args.host.as_str()).with_tls(args.tls);
    if let Some(port) = args.port {
        account = account.with_port(port);
    }
    if let Some(user) = &args.user {
        account = account.with_user(user.as_str());
    }
    if let Some(login) = &args.login {
        account = account.with_login(login.as_str());
    }
    if !args.batch {
        account = account.with_field_source(Arc::new(TerminalSource));
    }
    account
}

async fn run(args: Args) -> Result<()> {
    let settings = load_settings(&args)?;
    let mut ctx = SessionContext::new(settings);
    if !args.batch {
        ctx = ctx.trust_prompt(Arc::new(TerminalPrompt));
    }

    let interrupt = ctx.interrupt().clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted");
            interrupt.trigger();
        }
    });

    let mut conn = ctx.connection(account(&args));
    info!(host = conn.host(), port = conn.port(), kind = ?conn.kind(), "Connecting");
    let result = session::run(&mut conn, &args).await;
    if result.is_err() {
        conn.close().await.ok();
    }
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "postern=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("postern: {e:#}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("postern: {e:#}");
            ExitCode::FAILURE
        }
    }
}
