//! The identifier component of a repository reference.
//!
//! An identifier is the hex-encoded SHA-256 digest of a layer's canonical
//! representation. A full identifier is exactly 64 hex characters; any
//! shorter hex prefix is a "short identifier" usable wherever the store can
//! disambiguate it.

use serde::{Deserialize, Serialize};

use super::error::{Component, ErrorKind, ParseError};

/// Number of hex characters in a full identifier.
pub const FULL_LENGTH: usize = 64;

/// Hex characters shown when an identifier is abbreviated for display.
pub const SHORT_LENGTH: usize = 8;

/// A content-addressed commit identifier (full or short).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier(String);

impl Identifier {
    /// Parses an identifier. Accepts a bare hex string or one prefixed with
    /// `sha256:` / `@sha256:`; anything carrying a name or tag is rejected
    /// with the matching error kind.
    pub fn parse(id: &str) -> Result<Self, ParseError> {
        let err = |kind| ParseError::new(Component::Identifier, kind);

        if id.is_empty() {
            return Err(err(ErrorKind::InvalidFormat));
        }
        if let Some((head, rest)) = id.split_once('@') {
            if !head.is_empty() {
                return Err(err(ErrorKind::IdContainsName));
            }
            return match rest.strip_prefix("sha256:") {
                Some(hex) => Self::from_hex(hex),
                None => Err(err(ErrorKind::IdContainsNoDigest)),
            };
        }
        if id.contains('/') {
            return Err(err(ErrorKind::IdContainsName));
        }
        if id.contains(':') {
            return match id.strip_prefix("sha256:") {
                Some(hex) => Self::from_hex(hex),
                None => Err(err(ErrorKind::IdContainsTag)),
            };
        }

        Self::from_hex(id)
    }

    /// Validates a bare hex digest: 1 to 64 lowercase hex characters.
    pub fn from_hex(hex: &str) -> Result<Self, ParseError> {
        let valid = !hex.is_empty()
            && hex.len() <= FULL_LENGTH
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(ParseError::new(Component::Identifier, ErrorKind::InvalidFormat));
        }

        Ok(Identifier(hex.to_string()))
    }

    /// True if this is a full 64-character identifier rather than a prefix.
    pub fn is_full(&self) -> bool {
        self.0.len() == FULL_LENGTH
    }

    /// The abbreviated display form.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(SHORT_LENGTH)]
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::error::ErrorKind;

    const FULL: &str = "c07b565814ed2ab787ebc839780f034a4e0dd37c32d87bac8fc541023c61bd6a";

    #[test]
    fn test_parse_full_identifier() {
        let id = Identifier::parse(FULL).unwrap();
        assert!(id.is_full());
        assert_eq!(id.as_hex(), FULL);
        assert_eq!(id.short(), "c07b5658");
    }

    #[test]
    fn test_parse_short_identifier() {
        let id = Identifier::parse("c07b56").unwrap();
        assert!(!id.is_full());
        assert_eq!(id.short(), "c07b56");
    }

    #[test]
    fn test_parse_prefixed_forms() {
        assert_eq!(Identifier::parse(&format!("sha256:{FULL}")).unwrap().as_hex(), FULL);
        assert_eq!(Identifier::parse(&format!("@sha256:{FULL}")).unwrap().as_hex(), FULL);
    }

    #[test]
    fn test_parse_decorated_references() {
        let err = Identifier::parse(&format!("alpine@sha256:{FULL}")).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::IdContainsName);

        let err = Identifier::parse("library/alpine").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::IdContainsName);

        let err = Identifier::parse("alpine:latest").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::IdContainsTag);

        let err = Identifier::parse("@cafe").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::IdContainsNoDigest);
    }

    #[test]
    fn test_parse_invalid_hex() {
        for input in ["", "xyz", "ABCDEF12", &format!("{FULL}ff")] {
            assert!(Identifier::parse(input).is_err(), "input {:?}", input);
        }
    }
}
