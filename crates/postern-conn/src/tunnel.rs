//! Shell-command transports.
//!
//! A tunnel runs a user command through `/bin/sh -c` and uses its standard
//! input and output as the connection. Standard error is discarded and the
//! child runs in its own process group, so terminal signals meant for the
//! user interface do not reach it.

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use postern_account::exit_reason;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, error};

use crate::error::{Error, Result};

fn shell(command: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command);
    cmd
}

/// Runs the pre-connect command and waits for it.
///
/// # Errors
///
/// Returns [`Error::Subprocess`] if the command cannot be started or exits
/// unsuccessfully.
pub(crate) async fn preconnect(command: &str) -> Result<()> {
    debug!(command, "Running pre-connect command");
    let status = shell(command)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|e| Error::subprocess(command, e.to_string()))?;
    if status.success() {
        Ok(())
    } else {
        let reason = exit_reason(status);
        error!(command, %reason, "Pre-connect command failed");
        Err(Error::subprocess(command, reason))
    }
}

/// A running tunnel command.
///
/// A tunnel dropped without [`Tunnel::close`] kills its command and reaps it
/// in the background.
#[derive(Debug)]
pub struct Tunnel {
    command: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
}

impl Tunnel {
    /// Starts `command`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Subprocess`] if the command cannot be started.
    pub(crate) fn open(command: &str) -> Result<Self> {
        debug!(command, "Opening tunnel");
        let mut cmd = shell(command);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::subprocess(command, e.to_string()))?;
        let tunnel = Self {
            command: command.to_string(),
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            child: Some(child),
        };
        if tunnel.stdin.is_none() || tunnel.stdout.is_none() {
            return Err(Error::subprocess(command, "standard streams unavailable"));
        }
        Ok(tunnel)
    }

    /// Closes both pipes and waits for the command to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Subprocess`] with the decoded exit reason if the
    /// command exited unsuccessfully.
    pub(crate) async fn close(mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take()
            && let Err(e) = stdin.shutdown().await
        {
            debug!(error = %e, "Tunnel input already closed");
        }
        self.stdout = None;

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child
            .wait()
            .await
            .map_err(|e| Error::subprocess(&self.command, e.to_string()))?;
        if status.success() {
            debug!(command = %self.command, "Tunnel closed");
            Ok(())
        } else {
            Err(Error::subprocess(&self.command, exit_reason(status)))
        }
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        self.stdin = None;
        self.stdout = None;
        debug!(command = %self.command, "Tunnel dropped while running; stopping it");
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "Tunnel command already gone");
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = child.wait().await {
                        debug!(error = %e, "Couldn't reap tunnel command");
                    }
                });
            }
            Err(_) => {
                child.try_wait().ok();
            }
        }
    }
}

impl AsyncRead for Tunnel {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().stdout {
            Some(stdout) => Pin::new(stdout).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

fn closed_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "tunnel input closed")
}

impl AsyncWrite for Tunnel {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().stdin {
            Some(stdin) => Pin::new(stdin).poll_write(cx, buf),
            None => Poll::Ready(Err(closed_pipe())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().stdin {
            Some(stdin) => Pin::new(stdin).poll_flush(cx),
            None => Poll::Ready(Err(closed_pipe())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().stdin {
            Some(stdin) => Pin::new(stdin).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader};

    use super::*;
    use crate::ErrorKind;

    #[tokio::test]
    async fn test_echo_through_tunnel() {
        let mut tunnel = Tunnel::open("read line; echo \"got $line\"").unwrap();
        tunnel.write_all(b"hello\n").await.unwrap();
        tunnel.flush().await.unwrap();

        let mut reader = BufReader::new(&mut tunnel);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "got hello\n");
        tunnel.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_status_reported() {
        let tunnel = Tunnel::open("exit 3").unwrap();
        let err = tunnel.close().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SubprocessFailed);
        assert!(err.to_string().ends_with("exited with status 3"), "{err}");
    }

    #[tokio::test]
    async fn test_stderr_discarded() {
        let mut tunnel = Tunnel::open("echo noise >&2; echo out").unwrap();
        let mut reader = BufReader::new(&mut tunnel);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "out\n");
        tunnel.close().await.unwrap();
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_dropped_tunnel_is_reaped() {
        let tunnel = Tunnel::open("sleep 30").unwrap();
        let pid = tunnel.child.as_ref().and_then(Child::id).unwrap();
        let proc_entry = std::path::PathBuf::from(format!("/proc/{pid}"));
        assert!(proc_entry.exists());

        drop(tunnel);
        for _ in 0..100 {
            if !proc_entry.exists() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("tunnel command {pid} was not reaped");
    }

    #[tokio::test]
    async fn test_preconnect() {
        preconnect("true").await.unwrap();
        let err = preconnect("exit 7").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SubprocessFailed);
    }
}
