//! Relative references: a base reference plus a commit offset.

use serde::{Deserialize, Serialize};

use super::error::{Component, ErrorKind, ParseError};
use super::{Reference, Tag};

/// A reference to the commit reached by walking back `offset` commits from
/// `base`. Printed as `BASE~N`; an offset of zero prints as the bare base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativeRef {
    base: Reference,
    offset: usize,
}

impl RelativeRef {
    /// Parses a relative reference. A trailing `~N` or `^…^` run is the
    /// offset; the remainder parses as a reference with default tag `HEAD`.
    pub fn parse(reference: &str) -> Result<Self, ParseError> {
        let (base, offset) = match split_offset(reference) {
            Some((base, raw_offset)) => {
                let offset = parse_offset(raw_offset)?;
                // Strip a separator colon left behind by the offset,
                // as in `archlinux:^^`.
                (base.strip_suffix(':').unwrap_or(base), offset)
            }
            None => (reference, 0),
        };

        let base =
            Reference::parse_with_default(base, Tag::head(), Component::RelativeReference)?;

        Ok(RelativeRef { base, offset })
    }

    pub fn new(base: Reference, offset: usize) -> Self {
        RelativeRef { base, offset }
    }

    pub fn base(&self) -> &Reference {
        &self.base
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl std::fmt::Display for RelativeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.offset == 0 {
            write!(f, "{}", self.base)
        } else {
            write!(f, "{}~{}", self.base, self.offset)
        }
    }
}

/// Splits a trailing `~N` or `^…^` offset off a reference string. Returns
/// `None` when no well-formed offset suffix is present.
fn split_offset(reference: &str) -> Option<(&str, &str)> {
    let bytes = reference.as_bytes();
    if bytes.is_empty() {
        return None;
    }

    if bytes[bytes.len() - 1] == b'^' {
        let start = bytes
            .iter()
            .rposition(|&b| b != b'^')
            .map(|i| i + 1)
            .unwrap_or(0);
        return Some(reference.split_at(start));
    }

    if bytes[bytes.len() - 1].is_ascii_digit() {
        let digits = bytes
            .iter()
            .rposition(|&b| !b.is_ascii_digit())
            .map(|i| i + 1)
            .unwrap_or(0);
        if digits > 0 && bytes[digits - 1] == b'~' {
            return Some(reference.split_at(digits - 1));
        }
    }

    None
}

/// Computes the offset value of a stripped suffix: the run length for
/// `^…^`, the decimal value for `~N`.
fn parse_offset(offset: &str) -> Result<usize, ParseError> {
    let err = || ParseError::new(Component::RelativeReference, ErrorKind::InvalidOffsetFormat);

    match offset.as_bytes().first() {
        Some(b'^') => Ok(offset.len()),
        Some(b'~') => offset[1..].parse::<usize>().map_err(|_| err()),
        _ => Err(err()),
    }
}
