//! Per-certificate verification problems.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Set of problems found with one certificate of a chain.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CertErrorSet(u8);

impl CertErrorSet {
    /// The current time is after the certificate's `notAfter`.
    pub const EXPIRED: Self = Self(1);
    /// The current time is before the certificate's `notBefore`.
    pub const NOT_YET_VALID: Self = Self(1 << 1);
    /// The certificate has been revoked.
    pub const REVOKED: Self = Self(1 << 2);
    /// The chain does not lead to a trusted anchor.
    pub const NOT_TRUSTED: Self = Self(1 << 3);
    /// The leaf does not name the server.
    pub const HOSTNAME: Self = Self(1 << 4);
    /// A signer in the chain is not a CA.
    pub const SIGNER_NOT_CA: Self = Self(1 << 5);
    /// A signature uses an insecure or unsupported algorithm.
    pub const INSECURE_ALG: Self = Self(1 << 6);
    /// Any other problem reported by the TLS library.
    pub const OTHER: Self = Self(1 << 7);

    /// Problems that always need fresh confirmation.
    pub const UNCACHEABLE: Self = Self(Self::EXPIRED.0 | Self::NOT_YET_VALID.0 | Self::REVOKED.0);

    /// Returns the empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns true if no problem is recorded.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if every problem in `other` is recorded.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any problem in `other` is recorded.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Adds the problems in `other`.
    pub const fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Removes the problems in `other`.
    pub const fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Returns the problems in `self` that are not in `other`.
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for CertErrorSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CertErrorSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

const NAMES: [(CertErrorSet, &str); 8] = [
    (CertErrorSet::EXPIRED, "expired"),
    (CertErrorSet::NOT_YET_VALID, "not-yet-valid"),
    (CertErrorSet::REVOKED, "revoked"),
    (CertErrorSet::NOT_TRUSTED, "untrusted"),
    (CertErrorSet::HOSTNAME, "hostname-mismatch"),
    (CertErrorSet::SIGNER_NOT_CA, "signer-not-CA"),
    (CertErrorSet::INSECURE_ALG, "insecure-algorithm"),
    (CertErrorSet::OTHER, "other"),
];

impl fmt::Debug for CertErrorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(
                NAMES
                    .iter()
                    .filter(|(bit, _)| self.contains(*bit))
                    .map(|(_, name)| name),
            )
            .finish()
    }
}

impl fmt::Display for CertErrorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("valid");
        }
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_operations() {
        let mut set = CertErrorSet::EXPIRED | CertErrorSet::HOSTNAME;
        assert!(set.contains(CertErrorSet::HOSTNAME));
        assert!(set.intersects(CertErrorSet::UNCACHEABLE));
        set.remove(CertErrorSet::EXPIRED);
        assert!(!set.intersects(CertErrorSet::UNCACHEABLE));
        assert_eq!(set.bits(), 16);
        assert_eq!(set.difference(CertErrorSet::HOSTNAME), CertErrorSet::empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(CertErrorSet::empty().to_string(), "valid");
        let set = CertErrorSet::NOT_TRUSTED | CertErrorSet::EXPIRED;
        assert_eq!(set.to_string(), "expired, untrusted");
        assert_eq!(format!("{set:?}"), "{\"expired\", \"untrusted\"}");
    }
}
