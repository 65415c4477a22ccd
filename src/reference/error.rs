//! Typed parse errors for the reference algebra.
//!
//! Every parse failure carries the component that was being parsed so the
//! rendered message reads `failed to parse repository <component>: <cause>`.

use thiserror::Error;

/// The reference component a parse error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Name,
    Tag,
    Identifier,
    LocalReference,
    RemoteReference,
    RelativeReference,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Component::Name => "name",
            Component::Tag => "tag",
            Component::Identifier => "identifier",
            Component::LocalReference => "local reference",
            Component::RemoteReference => "remote reference",
            Component::RelativeReference => "relative reference",
        };
        f.write_str(s)
    }
}

/// The cause of a reference parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("invalid format")]
    InvalidFormat,
    #[error("missing name component")]
    MissingName,
    #[error("name contains tag or digest")]
    NameContainsTagOrDigest,
    #[error("tag {0:?} is reserved")]
    ReservedTag(String),
    #[error("identifier contains name")]
    IdContainsName,
    #[error("identifier contains tag")]
    IdContainsTag,
    #[error("identifier contains no digest")]
    IdContainsNoDigest,
    #[error("not an identifier nor a tag")]
    NotIdentifierNorTag,
    #[error("invalid offset format")]
    InvalidOffsetFormat,
}

/// A reference parse failure, tagged with the component being parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to parse repository {component}: {kind}")]
pub struct ParseError {
    component: Component,
    kind: ErrorKind,
}

impl ParseError {
    pub(crate) fn new(component: Component, kind: ErrorKind) -> Self {
        Self { component, kind }
    }

    /// The component that failed to parse.
    pub fn component(&self) -> Component {
        self.component
    }

    /// The underlying cause.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Re-tags the error with another component, preserving the cause.
    /// Used when a composite parser delegates to a component parser.
    pub(crate) fn retag(self, component: Component) -> Self {
        Self {
            component,
            kind: self.kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_names_component() {
        let err = ParseError::new(Component::RemoteReference, ErrorKind::ReservedTag("HEAD".into()));
        assert_eq!(
            err.to_string(),
            "failed to parse repository remote reference: tag \"HEAD\" is reserved"
        );

        let err = ParseError::new(Component::Name, ErrorKind::NameContainsTagOrDigest);
        assert_eq!(
            err.to_string(),
            "failed to parse repository name: name contains tag or digest"
        );
    }
}
