//! A short scripted session: greeting, optional STARTTLS, optional
//! authentication, logout.

use anyhow::{Context, Result, bail};
use postern_account::Service;
use postern_conn::Connection;
use postern_sasl::Mechanism;
use tracing::debug;

use crate::args::Args;

fn show(direction: &str, line: &[u8]) {
    println!("{direction} {}", String::from_utf8_lossy(line));
}

async fn send(conn: &mut Connection, line: &str) -> Result<()> {
    show("C:", line.as_bytes());
    conn.write_all(format!("{line}\r\n").as_bytes()).await?;
    Ok(())
}

/// Reads one server response, following SMTP continuation lines.
async fn response(conn: &mut Connection) -> Result<Vec<u8>> {
    loop {
        let line = conn.read_line().await?;
        show("S:", &line);
        let continued = conn.account().service() == Service::Smtp && line.get(3) == Some(&b'-');
        if !continued {
            return Ok(line);
        }
    }
}

fn is_ok(service: Service, tag: &str, line: &[u8]) -> bool {
    match service {
        Service::Imap => line.starts_with(format!("{tag} OK").as_bytes()),
        Service::Pop => line.starts_with(b"+OK"),
        Service::Smtp | Service::Nntp => line.first() == Some(&b'2'),
        Service::None => false,
    }
}

async fn starttls(conn: &mut Connection) -> Result<()> {
    let service = conn.account().service();
    if service == Service::Smtp {
        send(conn, "EHLO postern").await?;
        response(conn).await?;
    }
    let command = match service {
        Service::Imap => "a1 STARTTLS",
        Service::Pop => "STLS",
        Service::Smtp | Service::Nntp => "STARTTLS",
        Service::None => bail!("STARTTLS needs a service"),
    };
    send(conn, command).await?;
    let reply = response(conn).await?;
    if !is_ok(service, "a1", &reply) {
        bail!("server refused STARTTLS");
    }
    conn.starttls().await?;
    Ok(())
}

async fn authenticate(conn: &mut Connection, name: &str) -> Result<()> {
    let mechanism = Mechanism::from_name(name).with_context(|| format!("unknown SASL mechanism '{name}'"))?;
    let mut session = conn.sasl_session(mechanism).await?;
    send(conn, &format!("a2 AUTHENTICATE {}", mechanism.name())).await?;

    loop {
        let line = conn.read_line().await?;
        if let Some(challenge) = line.strip_prefix(b"+") {
            debug!(mechanism = mechanism.name(), "Server challenge");
            let challenge = String::from_utf8_lossy(challenge);
            let answer = session.step_base64(&challenge)?;
            show("C:", b"<credentials>");
            conn.write_all(format!("{answer}\r\n").as_bytes()).await?;
            continue;
        }
        show("S:", &line);
        if is_ok(Service::Imap, "a2", &line) {
            break;
        }
        if line.starts_with(b"a2 ") {
            bail!("authentication failed");
        }
    }

    conn.install_sasl(&mut session)?;
    Ok(())
}

async fn compress(conn: &mut Connection) -> Result<()> {
    send(conn, "a3 COMPRESS DEFLATE").await?;
    let reply = response(conn).await?;
    if !is_ok(Service::Imap, "a3", &reply) {
        bail!("server refused compression");
    }
    conn.compress()?;
    Ok(())
}

async fn logout(conn: &mut Connection) -> Result<()> {
    let command = match conn.account().service() {
        Service::Imap => "a9 LOGOUT",
        _ => "QUIT",
    };
    send(conn, command).await?;
    while conn.poll(std::time::Duration::from_secs(2)).await? {
        match conn.read_line().await {
            Ok(line) => show("S:", &line),
            Err(_) => break,
        }
    }
    Ok(())
}

/// Runs the scripted session over an unopened connection.
pub async fn run(conn: &mut Connection, args: &Args) -> Result<()> {
    conn.open().await?;
    match conn.peer_addr() {
        Some(peer) => println!("Connected to {} ({peer})", conn.host()),
        None => println!("Connected to {} via tunnel", conn.host()),
    }
    response(conn).await?;

    if args.starttls {
        starttls(conn).await?;
    }
    println!("Security strength: {} ({})", conn.ssf(), if conn.is_tls() { "TLS" } else { "plain" });

    if let Some(name) = &args.auth {
        authenticate(conn, name).await?;
        println!("Authenticated; security strength now {}", conn.ssf());
    }
    if args.compress {
        compress(conn).await?;
    }

    logout(conn).await?;
    conn.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_ok() {
        assert!(is_ok(Service::Imap, "a1", b"a1 OK Begin TLS"));
        assert!(!is_ok(Service::Imap, "a1", b"a1 NO later"));
        assert!(is_ok(Service::Pop, "", b"+OK ready"));
        assert!(!is_ok(Service::Pop, "", b"-ERR no"));
        assert!(is_ok(Service::Smtp, "", b"220 go ahead"));
        assert!(!is_ok(Service::Nntp, "", b"502 no"));
    }
}
