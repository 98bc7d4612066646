//! Command-line arguments.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use postern_account::Service;

pub const USAGE: &str = "\
usage: postern <imap|pop|smtp|nntp> <host> [options]

options:
  --port <n>          connect to port <n> instead of the service default
  --tls               use implicit TLS
  --starttls          upgrade a plain connection with STARTTLS
  --user <name>       account user name
  --login <name>      login name, if different from the user
  --auth <mech>       authenticate with a SASL mechanism (IMAP only)
  --compress          enable COMPRESS=DEFLATE after authenticating (IMAP only)
  --settings <path>   read settings from <path>
  --batch             never prompt; reject untrusted certificates
";

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub service: Service,
    pub host: String,
    pub port: Option<u16>,
    pub tls: bool,
    pub starttls: bool,
    pub user: Option<String>,
    pub login: Option<String>,
    pub auth: Option<String>,
    pub compress: bool,
    pub settings: Option<PathBuf>,
    pub batch: bool,
}

fn service(name: &str) -> Result<Service> {
    Ok(match name.to_ascii_lowercase().as_str() {
        "imap" => Service::Imap,
        "pop" | "pop3" => Service::Pop,
        "smtp" => Service::Smtp,
        "nntp" => Service::Nntp,
        other => bail!("unknown service '{other}'"),
    })
}

impl Args {
    /// Parses arguments, excluding the program name.
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let service = service(&args.next().context("missing service")?)?;
        let host = args.next().context("missing host")?;
        let mut parsed = Self {
            service,
            host,
            port: None,
            tls: false,
            starttls: false,
            user: None,
            login: None,
            auth: None,
            compress: false,
            settings: None,
            batch: false,
        };

        while let Some(flag) = args.next() {
            let mut value = || args.next().with_context(|| format!("{flag} needs a value"));
            match flag.as_str() {
                "--port" => {
                    let port = value()?;
                    parsed.port = Some(port.parse().with_context(|| format!("invalid port '{port}'"))?);
                }
                "--tls" => parsed.tls = true,
                "--starttls" => parsed.starttls = true,
                "--user" => parsed.user = Some(value()?),
                "--login" => parsed.login = Some(value()?),
                "--auth" => parsed.auth = Some(value()?),
                "--compress" => parsed.compress = true,
                "--settings" => parsed.settings = Some(PathBuf::from(value()?)),
                "--batch" => parsed.batch = true,
                other => bail!("unknown option '{other}'"),
            }
        }

        if parsed.tls && parsed.starttls {
            bail!("--tls and --starttls are mutually exclusive");
        }
        if (parsed.auth.is_some() || parsed.compress) && parsed.service != Service::Imap {
            bail!("--auth and --compress are only supported for IMAP");
        }
        Ok(parsed)
    }
}
