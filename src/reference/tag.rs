//! The tag component of a repository reference.

use serde::{Deserialize, Serialize};

use super::error::{Component, ErrorKind, ParseError};

/// The movable tag marking a repository's current position.
pub const HEAD: &str = "HEAD";

/// Transient tag marking the replay tip of an active rebase session.
pub const REBASE_HEAD: &str = "REBASE_HEAD";

/// Default tag of remote references.
pub const LATEST: &str = "latest";

/// Tags with local-only semantics, forbidden in remote references.
pub const RESERVED_TAGS: [&str; 2] = [HEAD, REBASE_HEAD];

/// A validated symbolic tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag(String);

impl Tag {
    /// Parses a tag: an alphanumeric or underscore start followed by up to
    /// 127 alphanumerics, dots, underscores or dashes.
    pub fn parse(tag: &str) -> Result<Self, ParseError> {
        let bytes = tag.as_bytes();
        let valid = !bytes.is_empty()
            && bytes.len() <= 128
            && (bytes[0].is_ascii_alphanumeric() || bytes[0] == b'_')
            && bytes[1..]
                .iter()
                .all(|&b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-');
        if !valid {
            return Err(ParseError::new(Component::Tag, ErrorKind::InvalidFormat));
        }

        Ok(Tag(tag.to_string()))
    }

    pub fn head() -> Self {
        Tag(HEAD.to_string())
    }

    pub fn rebase_head() -> Self {
        Tag(REBASE_HEAD.to_string())
    }

    pub fn latest() -> Self {
        Tag(LATEST.to_string())
    }

    /// True for `HEAD` and `REBASE_HEAD`.
    pub fn is_reserved(&self) -> bool {
        RESERVED_TAGS.contains(&self.0.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
