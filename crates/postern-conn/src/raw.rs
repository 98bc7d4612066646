//! TCP transport.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::interrupt::Interrupt;

/// Converts `host` to the ASCII form used for resolution.
///
/// IP literals, with or without brackets, are returned unchanged.
pub(crate) fn ascii_host(host: &str) -> Result<String> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() {
        return Ok(bare.to_string());
    }
    match url::Host::parse(host) {
        Ok(url::Host::Domain(domain)) => Ok(domain),
        Ok(other) => Ok(other.to_string()),
        Err(e) => Err(Error::Resolve {
            host: host.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
        }),
    }
}

/// Resolves `host`, keeping only IPv4 addresses unless `use_ipv6` is set.
pub(crate) async fn resolve(host: &str, port: u16, use_ipv6: bool) -> Result<Vec<SocketAddr>> {
    let ascii = ascii_host(host)?;
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((ascii.as_str(), port))
        .await
        .map_err(|source| Error::Resolve {
            host: host.to_string(),
            source,
        })?
        .filter(|addr| use_ipv6 || addr.is_ipv4())
        .collect();

    if addrs.is_empty() {
        return Err(Error::Resolve {
            host: host.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no usable address"),
        });
    }
    Ok(addrs)
}

/// Connects to the first address of `host` that accepts.
///
/// Each attempt is bounded by `timeout`. The attempt is abandoned as soon as
/// `interrupt` is triggered.
pub(crate) async fn connect(
    host: &str,
    port: u16,
    use_ipv6: bool,
    timeout: Option<Duration>,
    interrupt: &Interrupt,
) -> Result<TcpStream> {
    let addrs = resolve(host, port, use_ipv6).await?;
    connect_addrs(host, &addrs, timeout, interrupt).await
}

/// Tries `addrs` in order; the first that accepts wins.
///
/// A refused or timed out address moves on to the next one. The error
/// describes the last attempt.
pub(crate) async fn connect_addrs(
    host: &str,
    addrs: &[SocketAddr],
    timeout: Option<Duration>,
    interrupt: &Interrupt,
) -> Result<TcpStream> {
    debug!(host, candidates = addrs.len(), "Connecting");

    let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no address tried");
    let mut timed_out = None;
    for &addr in addrs {
        let attempt = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, TcpStream::connect(addr)).await {
                    Ok(result) => result.map_err(Some),
                    Err(_) => Err(None),
                },
                None => TcpStream::connect(addr).await.map_err(Some),
            }
        };

        let result = tokio::select! {
            biased;
            () = interrupt.triggered() => return Err(Error::Interrupted),
            result = attempt => result,
        };
        match result {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Could not disable Nagle's algorithm");
                }
                debug!(host, %addr, "Connected");
                return Ok(stream);
            }
            Err(Some(e)) => {
                debug!(%addr, error = %e, "Connect failed");
                last_error = e;
                timed_out = None;
            }
            Err(None) => {
                warn!(host, %addr, "Connect timed out");
                last_error = io::Error::new(io::ErrorKind::TimedOut, "connect timed out");
                timed_out = timeout;
            }
        }
    }

    if let Some(limit) = timed_out {
        return Err(Error::ConnectTimeout {
            host: host.to_string(),
            timeout: limit,
        });
    }
    Err(Error::Connect {
        host: host.to_string(),
        source: last_error,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn test_ascii_host() {
        assert_eq!(ascii_host("imap.example.org").unwrap(), "imap.example.org");
        assert_eq!(ascii_host("bücher.example").unwrap(), "xn--bcher-kva.example");
        assert_eq!(ascii_host("127.0.0.1").unwrap(), "127.0.0.1");
        assert_eq!(ascii_host("[::1]").unwrap(), "::1");
        assert!(ascii_host("bad host name").is_err());
    }

    #[tokio::test]
    async fn test_resolve_ipv4_only() {
        let addrs = resolve("127.0.0.1", 143, false).await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:143".parse().unwrap()]);

        let err = resolve("::1", 143, false).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ResolveFailed);
    }

    #[tokio::test]
    async fn test_connect_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = connect("127.0.0.1", port, true, Some(Duration::from_secs(5)), &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = connect("127.0.0.1", port, false, None, &Interrupt::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ConnectFailed);
    }

    #[tokio::test]
    async fn test_connect_moves_past_dead_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = listener.local_addr().unwrap();
        // TEST-NET-1 never answers; it either times out or is unreachable.
        let dead: SocketAddr = "192.0.2.1:143".parse().unwrap();

        let stream = connect_addrs(
            "mail.example.org",
            &[dead, live],
            Some(Duration::from_millis(200)),
            &Interrupt::new(),
        )
        .await
        .unwrap();
        assert_eq!(stream.peer_addr().unwrap(), live);
    }

    #[tokio::test]
    async fn test_connect_reports_last_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let refused = listener.local_addr().unwrap();
        drop(listener);
        let dead: SocketAddr = "192.0.2.1:143".parse().unwrap();

        let err = connect_addrs(
            "mail.example.org",
            &[dead, refused],
            Some(Duration::from_millis(200)),
            &Interrupt::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Connect { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_connect_interrupted() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let err = connect("127.0.0.1", port, false, None, &interrupt).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Interrupted);
    }
}
