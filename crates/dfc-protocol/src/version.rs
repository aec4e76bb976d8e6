//! Protocol versioning for safe fleet upgrades.
//!
//! Devices in the field update on their own schedule, so the coordinator
//! must be able to tell an old-but-compatible player from one speaking a
//! different protocol generation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol version carried in every REGISTER envelope.
///
/// Semantic pair: major.minor. A major bump is a breaking change and
/// registration is rejected; minor bumps are additive and interoperate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    /// Current protocol version.
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Compatibility is decided by major version alone.
    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility_by_major() {
        let v1_0 = ProtocolVersion::new(1, 0);
        let v1_3 = ProtocolVersion::new(1, 3);
        let v2_0 = ProtocolVersion::new(2, 0);

        assert!(v1_0.is_compatible_with(&v1_3));
        assert!(v1_3.is_compatible_with(&v1_0));
        assert!(!v1_0.is_compatible_with(&v2_0));
    }

    #[test]
    fn test_display() {
        assert_eq!(ProtocolVersion::new(1, 2).to_string(), "1.2");
    }

    #[test]
    fn test_serde_roundtrip() {
        let json = serde_json::to_string(&ProtocolVersion::CURRENT).expect("serialize");
        let parsed: ProtocolVersion = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed, ProtocolVersion::CURRENT);
    }
}
