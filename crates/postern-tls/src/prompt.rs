//! The trust decision boundary.

use tracing::debug;

/// The user's answer about one certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// Abort the connection.
    Reject,
    /// Trust the certificate for this run.
    AcceptOnce,
    /// Trust the certificate and save it to the pinned-certificate file.
    AcceptAlways,
    /// Move on to the next certificate without trusting this one.
    Skip,
}

/// Asks the user whether to trust a certificate.
///
/// Called from inside the TLS handshake; implementations may block on
/// terminal input.
pub trait TrustPrompt: Send + Sync {
    /// Presents `lines` under `title` and returns the user's decision.
    ///
    /// `AcceptAlways` must only be returned when `allow_always` is set, and
    /// `Skip` only when `allow_skip` is set.
    fn verify_cert(
        &self,
        title: &str,
        lines: &[String],
        allow_always: bool,
        allow_skip: bool,
    ) -> TrustDecision;
}

/// Prompt for batch mode: rejects every certificate it is asked about.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive;

impl TrustPrompt for NonInteractive {
    fn verify_cert(&self, title: &str, _lines: &[String], _allow_always: bool, _allow_skip: bool) -> TrustDecision {
        debug!(title, "Unable to prompt for certificate in batch mode");
        TrustDecision::Reject
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_interactive_rejects() {
        let decision = NonInteractive.verify_cert("title", &[], true, true);
        assert_eq!(decision, TrustDecision::Reject);
    }
}
