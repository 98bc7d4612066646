//! Tunnels, STARTTLS and SASL over real transports.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;

use common::{TlsServer, server_config, settings, tls_account};
use postern_account::{Account, Service};
use postern_conn::{Connection, ErrorKind, SessionContext, Settings, TransportKind};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

fn tunnel_account() -> Account {
    Account::new(Service::Imap, "mail.example.org")
}

#[tokio::test]
async fn test_tunnel_round_trip() {
    let ctx = SessionContext::new(
        Settings::default().tunnel("printf '* PREAUTH tunnel\\r\\n'; read line; echo \"got $line\""),
    );
    let mut conn = ctx.connection(tunnel_account());
    assert_eq!(conn.kind(), TransportKind::Tunnel);

    conn.open().await.unwrap();
    assert_eq!(conn.ssf(), 1);
    assert!(conn.peer_addr().is_none());
    assert_eq!(conn.read_line().await.unwrap(), b"* PREAUTH tunnel");
    conn.write_all(b"hello\n").await.unwrap();
    assert_eq!(conn.read_line().await.unwrap(), b"got hello");
    conn.close().await.unwrap();
    assert!(!conn.is_open());
}

#[tokio::test]
async fn test_insecure_tunnel_has_no_strength() {
    let ctx = SessionContext::new(Settings::default().tunnel("cat").tunnel_is_secure(false));
    let mut conn = ctx.connection(tunnel_account());
    conn.open().await.unwrap();
    assert_eq!(conn.ssf(), 0);
    conn.write_all(b"ping\r\n").await.unwrap();
    assert_eq!(conn.read_line().await.unwrap(), b"ping");
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_tunnel_exit_status_reported_on_close() {
    let ctx = SessionContext::new(Settings::default().tunnel("read line; exit 3"));
    let mut conn = ctx.connection(tunnel_account());
    conn.open().await.unwrap();
    conn.write_all(b"bye\n").await.unwrap();

    let err = conn.close().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SubprocessFailed);
    assert!(err.to_string().ends_with("exited with status 3"), "{err}");
    assert!(!conn.is_open());
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_tunnel_without_command() {
    let ctx = SessionContext::new(Settings::default());
    let mut conn = Connection::new(tunnel_account(), TransportKind::Tunnel, ctx);
    let err = conn.open().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigMissing);
}

#[tokio::test]
async fn test_preconnect_runs_before_open() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let ctx = SessionContext::new(
        Settings::default()
            .preconnect(format!("touch '{}'", marker.display()))
            .tunnel("cat"),
    );
    let mut conn = ctx.connection(tunnel_account());
    conn.open().await.unwrap();
    assert!(marker.exists());
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_starttls_waits_for_tunnel() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("exited");
    let ctx = SessionContext::new(settings().tunnel(format!(
        "head -c 1 >/dev/null; printf 'garbage\\r\\n'; cat >/dev/null; touch '{}'",
        marker.display()
    )));
    let mut conn = ctx.connection(tunnel_account());
    conn.open().await.unwrap();

    let err = conn.starttls().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandshakeFailed);
    assert!(!conn.is_open());
    assert!(marker.exists(), "tunnel command was not waited for");
}

#[tokio::test]
async fn test_starttls_reverts_to_plain_on_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let acceptor = TlsAcceptor::from(Arc::new(server_config("localhost", rustls::DEFAULT_VERSIONS, false)));
    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut plain = BufReader::new(tcp);
        plain.write_all(b"* OK plain\r\n").await.unwrap();
        let mut line = String::new();
        plain.read_line(&mut line).await.unwrap();
        assert_eq!(line, "a1 STARTTLS\r\n");
        plain.write_all(b"a1 OK begin TLS\r\n").await.unwrap();

        let mut tls = acceptor.accept(plain.into_inner()).await.unwrap();
        tls.write_all(b"* OK secure\r\n").await.unwrap();
        tls.flush().await.unwrap();

        let (mut tcp, _) = listener.accept().await.unwrap();
        tcp.write_all(b"* OK plain again\r\n").await.unwrap();
    });

    let account = Account::new(Service::Imap, "localhost").with_port(port);
    let mut conn = SessionContext::new(settings()).connection(account);
    assert_eq!(conn.kind(), TransportKind::Plain);
    conn.open().await.unwrap();
    assert_eq!(conn.read_line().await.unwrap(), b"* OK plain");
    conn.write_all(b"a1 STARTTLS\r\n").await.unwrap();
    assert_eq!(conn.read_line().await.unwrap(), b"a1 OK begin TLS");

    conn.starttls().await.unwrap();
    assert!(conn.is_tls());
    assert!(conn.ssf() >= 128);
    assert_eq!(conn.read_line().await.unwrap(), b"* OK secure");
    assert_eq!(
        conn.starttls().await.unwrap_err().kind(),
        ErrorKind::NotSupported
    );

    conn.close().await.unwrap();
    assert_eq!(conn.kind(), TransportKind::Plain);
    conn.open().await.unwrap();
    assert!(!conn.is_tls());
    assert_eq!(conn.ssf(), 0);
    assert_eq!(conn.read_line().await.unwrap(), b"* OK plain again");
    conn.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_sasl_plain_over_tls() {
    let server = TlsServer::serving("localhost").await;
    let port = server.port;
    let task = tokio::spawn(async move {
        let tls = server.accept().await.unwrap();
        let mut stream = BufReader::new(tls);
        stream.write_all(b"* OK ready\r\n").await.unwrap();
        stream.flush().await.unwrap();

        let mut line = String::new();
        stream.read_line(&mut line).await.unwrap();
        assert_eq!(line, "a1 AUTHENTICATE PLAIN AGFsaWNlAHMzY3JldA==\r\n");
        stream.write_all(b"a1 OK authenticated\r\n").await.unwrap();
        stream.flush().await.unwrap();

        line.clear();
        stream.read_line(&mut line).await.unwrap();
        assert_eq!(line, "a2 NOOP\r\n");
        stream.write_all(b"a2 OK\r\n").await.unwrap();
        stream.flush().await.unwrap();
    });

    let account = tls_account(port).with_login("alice").with_pass("s3cret");
    let mut conn = SessionContext::new(settings()).connection(account);
    conn.open().await.unwrap();
    assert_eq!(conn.read_line().await.unwrap(), b"* OK ready");
    let tls_ssf = conn.ssf();

    let mut session = conn.sasl_start(&["login", "plain"], Some("PLAIN")).await.unwrap();
    let initial = session.initial_response_base64().unwrap().unwrap();
    conn.write_all(format!("a1 AUTHENTICATE PLAIN {initial}\r\n").as_bytes())
        .await
        .unwrap();
    assert_eq!(conn.read_line().await.unwrap(), b"a1 OK authenticated");

    conn.install_sasl(&mut session).unwrap();
    assert_eq!(conn.ssf(), tls_ssf);
    conn.write_all(b"a2 NOOP\r\n").await.unwrap();
    assert_eq!(conn.read_line().await.unwrap(), b"a2 OK");
    conn.close().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_sasl_requires_service() {
    let ctx = SessionContext::new(Settings::default().tunnel("cat"));
    let account = Account::new(Service::None, "mail.example.org")
        .with_login("alice")
        .with_pass("s3cret");
    let mut conn = ctx.connection(account);
    let err = conn
        .sasl_session(postern_sasl::Mechanism::Plain)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigMissing);
}
