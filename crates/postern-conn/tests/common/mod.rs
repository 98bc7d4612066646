//! Loopback servers and scripted prompts shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use postern_account::{Account, Service};
use postern_conn::{SessionContext, Settings};
use postern_tls::{TrustDecision, TrustPrompt};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, SupportedProtocolVersion};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;

/// Returns the path of a file under `tests/fixtures`.
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn certs(name: &str) -> Vec<CertificateDer<'static>> {
    CertificateDer::pem_file_iter(fixture(name))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Builds a server presenting `<name>.pem` with `<name>.key`.
pub fn server_config(name: &str, versions: &[&'static SupportedProtocolVersion], client_auth: bool) -> ServerConfig {
    let key = PrivateKeyDer::from_pem_file(fixture(&format!("{name}.key"))).unwrap();
    let builder = ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(versions)
        .unwrap();
    let builder = if client_auth {
        let mut roots = RootCertStore::empty();
        roots.add_parsable_certificates(certs("ca.pem"));
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider())
            .build()
            .unwrap();
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };
    builder.with_single_cert(certs(&format!("{name}.pem")), key).unwrap()
}

/// A TLS server on 127.0.0.1 accepting connections with `config`.
pub struct TlsServer {
    pub port: u16,
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

impl TlsServer {
    pub async fn start(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self {
            port: listener.local_addr().unwrap().port(),
            listener,
            acceptor: TlsAcceptor::from(Arc::new(config)),
        }
    }

    pub async fn serving(name: &str) -> Self {
        Self::start(server_config(
            name,
            rustls::DEFAULT_VERSIONS,
            false,
        ))
        .await
    }

    /// Accepts one connection. Returns `None` if the handshake failed.
    pub async fn accept(&self) -> Option<TlsStream<tokio::net::TcpStream>> {
        let (tcp, _) = self.listener.accept().await.unwrap();
        self.acceptor.accept(tcp).await.ok()
    }
}

/// Settings trusting only the test CA, connecting over IPv4.
pub fn settings() -> Settings {
    Settings::default()
        .use_ipv6(false)
        .use_system_certs(false)
        .ca_certificates_file(fixture("ca.pem"))
}

/// An IMAP account on `localhost:port` using implicit TLS.
pub fn tls_account(port: u16) -> Account {
    Account::new(Service::Imap, "localhost").with_port(port).with_tls(true)
}

/// One recorded call of the trust prompt.
#[derive(Debug, Clone)]
pub struct PromptCall {
    pub title: String,
    pub lines: Vec<String>,
    pub allow_always: bool,
    pub allow_skip: bool,
}

/// Trust prompt answering every question with one decision.
#[derive(Debug)]
pub struct Recording {
    answer: TrustDecision,
    pub calls: Mutex<Vec<PromptCall>>,
}

impl Recording {
    pub fn new(answer: TrustDecision) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl TrustPrompt for Recording {
    fn verify_cert(&self, title: &str, lines: &[String], allow_always: bool, allow_skip: bool) -> TrustDecision {
        self.calls.lock().push(PromptCall {
            title: title.to_string(),
            lines: lines.to_vec(),
            allow_always,
            allow_skip,
        });
        self.answer
    }
}

/// Builds a context over `settings` that asks `prompt`.
pub fn context(settings: Settings, prompt: Arc<Recording>) -> SessionContext {
    SessionContext::new(settings).trust_prompt(prompt)
}
