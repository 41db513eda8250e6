//! Protocol version identifiers.
//!
//! Connectors declare the protocol version they speak as a three-part
//! `MAJOR.MINOR.PATCH` string (for example inside a `SPEC` message). Only
//! the major component selects a wire schema family; minor and patch are
//! carried through for diagnostics.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// The protocol version this engine emits and migrates messages to.
pub const CURRENT_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(1, 0, 0);

/// Version assumed when detection finds no `SPEC` message in the lookahead
/// window. Old connectors predate version advertising entirely.
pub const FALLBACK_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(0, 2, 0);

/// A three-part semantic protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProtocolVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

/// Error parsing a protocol version string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid protocol version {0:?}: expected MAJOR.MINOR.PATCH")]
pub struct ParseVersionError(pub String);

impl FromStr for ProtocolVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = || -> Result<u32, ParseVersionError> {
            parts
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .ok_or_else(|| ParseVersionError(s.to_string()))
        };
        let (major, minor, patch) = (next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(ParseVersionError(s.to_string()));
        }
        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let v: ProtocolVersion = "1.2.0".parse().unwrap();
        assert_eq!(v, ProtocolVersion::new(1, 2, 0));
        assert_eq!(v.to_string(), "1.2.0");
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        for bad in ["", "1", "1.2", "1.2.3.4", "a.b.c", "1..0", "1.2.x"] {
            assert!(bad.parse::<ProtocolVersion>().is_err(), "{bad:?} parsed");
        }
    }

    #[test]
    fn test_serde_as_string() {
        let v = ProtocolVersion::new(0, 2, 0);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"0.2.0\"");
        let back: ProtocolVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_ordering_by_component() {
        let a = ProtocolVersion::new(0, 9, 9);
        let b = ProtocolVersion::new(1, 0, 0);
        assert!(a < b);
    }
}
