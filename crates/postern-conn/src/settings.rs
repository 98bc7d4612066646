//! Connection settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use postern_account::Resolver;
use postern_tls::TlsPolicy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Settings consumed by connections, named after their configuration keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct Settings {
    /// Seconds to wait for a TCP connect; 0 waits indefinitely.
    pub connect_timeout: u64,
    /// Resolve IPv6 addresses as well as IPv4.
    pub use_ipv6: bool,
    /// Shell command run before every connection attempt.
    pub preconnect: Option<String>,
    /// Shell command whose standard input and output replace the socket.
    pub tunnel: Option<String>,
    /// Treat the tunnel as encrypted.
    pub tunnel_is_secure: bool,
    /// External credential command.
    pub account_command: Option<String>,
    /// Consult the platform keychain for passwords.
    pub use_keychain: bool,
    /// Pinned certificates and hostname overrides.
    pub certificate_file: Option<PathBuf>,
    /// Additional CA certificates.
    pub ssl_ca_certificates_file: Option<PathBuf>,
    /// Client certificate and key.
    pub ssl_client_cert: Option<PathBuf>,
    /// Cipher suite list.
    pub ssl_ciphers: Option<String>,
    /// Trust the bundled web PKI roots.
    pub ssl_use_system_certs: bool,
    /// Allow SSLv3.
    pub ssl_use_sslv3: bool,
    /// Allow TLS 1.0.
    pub ssl_use_tlsv1: bool,
    /// Allow TLS 1.1.
    pub ssl_use_tlsv1_1: bool,
    /// Allow TLS 1.2.
    pub ssl_use_tlsv1_2: bool,
    /// Allow TLS 1.3.
    pub ssl_use_tlsv1_3: bool,
    /// Minimum Diffie-Hellman prime size.
    pub ssl_min_dh_prime_bits: u32,
    /// Check certificate validity periods.
    pub ssl_verify_dates: bool,
    /// Check that the leaf certificate names the server.
    pub ssl_verify_host: bool,
    /// Allow skipping intermediate certificates.
    pub ssl_verify_partial_chains: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connect_timeout: 30,
            use_ipv6: true,
            preconnect: None,
            tunnel: None,
            tunnel_is_secure: true,
            account_command: None,
            use_keychain: false,
            certificate_file: None,
            ssl_ca_certificates_file: None,
            ssl_client_cert: None,
            ssl_ciphers: None,
            ssl_use_system_certs: true,
            ssl_use_sslv3: false,
            ssl_use_tlsv1: false,
            ssl_use_tlsv1_1: false,
            ssl_use_tlsv1_2: true,
            ssl_use_tlsv1_3: true,
            ssl_min_dh_prime_bits: 0,
            ssl_verify_dates: true,
            ssl_verify_host: true,
            ssl_verify_partial_chains: false,
        }
    }
}

/// Expands a leading `~/` against the home directory.
#[must_use]
pub fn expand_path(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

impl Settings {
    /// Loads settings from a JSON file. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Settings`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings_err = |message: String| Error::Settings {
            path: path.to_path_buf(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| settings_err(e.to_string()))?;
        let settings: Self = serde_json::from_str(&text).map_err(|e| settings_err(e.to_string()))?;
        debug!(path = %path.display(), "Loaded settings");
        Ok(settings.expanded())
    }

    /// Returns the default settings file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("postern").join("settings.json"))
    }

    /// Expands `~/` in every path setting.
    #[must_use]
    pub fn expanded(mut self) -> Self {
        for path in [
            &mut self.certificate_file,
            &mut self.ssl_ca_certificates_file,
            &mut self.ssl_client_cert,
        ]
        .into_iter()
        .flatten()
        {
            *path = expand_path(path);
        }
        self
    }

    /// Returns the connect timeout, or `None` to wait indefinitely.
    #[must_use]
    pub const fn connect_timeout_duration(&self) -> Option<Duration> {
        if self.connect_timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(self.connect_timeout))
        }
    }

    /// Returns the TLS part of the settings.
    #[must_use]
    pub fn tls_policy(&self) -> TlsPolicy {
        TlsPolicy {
            certificate_file: self.certificate_file.as_deref().map(expand_path),
            ca_certificates_file: self.ssl_ca_certificates_file.as_deref().map(expand_path),
            client_cert: self.ssl_client_cert.as_deref().map(expand_path),
            ciphers: self.ssl_ciphers.clone(),
            use_sslv3: self.ssl_use_sslv3,
            use_tlsv1: self.ssl_use_tlsv1,
            use_tlsv1_1: self.ssl_use_tlsv1_1,
            use_tlsv1_2: self.ssl_use_tlsv1_2,
            use_tlsv1_3: self.ssl_use_tlsv1_3,
            min_dh_prime_bits: self.ssl_min_dh_prime_bits,
            use_system_certs: self.ssl_use_system_certs,
            verify_dates: self.ssl_verify_dates,
            verify_host: self.ssl_verify_host,
            verify_partial_chains: self.ssl_verify_partial_chains,
        }
    }

    /// Returns a credential resolver for these settings.
    #[must_use]
    pub fn resolver(&self) -> Resolver {
        let resolver = Resolver::new().keychain(self.use_keychain);
        match &self.account_command {
            Some(command) => resolver.account_command(command.clone()),
            None => resolver,
        }
    }

    /// Sets the connect timeout in seconds.
    #[must_use]
    pub const fn connect_timeout(mut self, seconds: u64) -> Self {
        self.connect_timeout = seconds;
        self
    }

    /// Enables or disables IPv6.
    #[must_use]
    pub const fn use_ipv6(mut self, enabled: bool) -> Self {
        self.use_ipv6 = enabled;
        self
    }

    /// Sets the pre-connect command.
    #[must_use]
    pub fn preconnect(mut self, command: impl Into<String>) -> Self {
        self.preconnect = Some(command.into());
        self
    }

    /// Sets the tunnel command.
    #[must_use]
    pub fn tunnel(mut self, command: impl Into<String>) -> Self {
        self.tunnel = Some(command.into());
        self
    }

    /// Declares whether the tunnel is encrypted.
    #[must_use]
    pub const fn tunnel_is_secure(mut self, secure: bool) -> Self {
        self.tunnel_is_secure = secure;
        self
    }

    /// Sets the external credential command.
    #[must_use]
    pub fn account_command(mut self, command: impl Into<String>) -> Self {
        self.account_command = Some(command.into());
        self
    }

    /// Sets the pinned-certificate file.
    #[must_use]
    pub fn certificate_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.certificate_file = Some(path.into());
        self
    }

    /// Sets the CA certificate file.
    #[must_use]
    pub fn ca_certificates_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssl_ca_certificates_file = Some(path.into());
        self
    }

    /// Sets the client certificate file.
    #[must_use]
    pub fn client_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssl_client_cert = Some(path.into());
        self
    }

    /// Enables or disables the bundled web PKI roots.
    #[must_use]
    pub const fn use_system_certs(mut self, enabled: bool) -> Self {
        self.ssl_use_system_certs = enabled;
        self
    }

    /// Enables or disables partial chain verification.
    #[must_use]
    pub const fn verify_partial_chains(mut self, enabled: bool) -> Self {
        self.ssl_verify_partial_chains = enabled;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.connect_timeout_duration(), Some(Duration::from_secs(30)));
        assert!(settings.tunnel_is_secure);
        let policy = settings.tls_policy();
        assert!(policy.use_tlsv1_2 && policy.use_tlsv1_3);
        assert!(!policy.use_tlsv1);
        assert!(policy.verify_dates && policy.verify_host);
        assert!(!policy.verify_partial_chains);
    }

    #[test]
    fn test_zero_timeout_disables() {
        assert_eq!(Settings::default().connect_timeout(0).connect_timeout_duration(), None);
    }

    #[test]
    fn test_load_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"tunnel": "ssh mail imapd", "tunnel_is_secure": false, "ssl_use_tlsv1_3": false}"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.tunnel.as_deref(), Some("ssh mail imapd"));
        assert!(!settings.tunnel_is_secure);
        assert!(!settings.ssl_use_tlsv1_3);
        assert_eq!(settings.connect_timeout, 30);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        assert!(matches!(Settings::load(&path), Err(Error::Settings { .. })));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Settings::load(&path), Err(Error::Settings { .. })));
    }

    #[test]
    fn test_expand_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(expand_path(Path::new("~/.postern/certs")), home.join(".postern/certs"));
        assert_eq!(expand_path(Path::new("/etc/certs")), PathBuf::from("/etc/certs"));
        assert_eq!(expand_path(Path::new("~user/certs")), PathBuf::from("~user/certs"));
    }

    #[test]
    fn test_builder() {
        let settings = Settings::default()
            .tunnel("cat")
            .tunnel_is_secure(false)
            .certificate_file("/tmp/certs")
            .use_system_certs(false);
        assert_eq!(settings.tunnel.as_deref(), Some("cat"));
        let policy = settings.tls_policy();
        assert_eq!(policy.certificate_file, Some(PathBuf::from("/tmp/certs")));
        assert!(!policy.use_system_certs);
    }
}
