//! Remote repository references.

use serde::{Deserialize, Serialize};

use super::error::{Component, ErrorKind, ParseError};
use super::{Identifier, Name, Tag, Target};

/// A reference addressing a repository on a remote registry. The default
/// tag is `latest`; the reserved local tags (`HEAD`, `REBASE_HEAD`) are
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    name: Name,
    target: Target,
}

impl RemoteRef {
    /// Parses a remote reference, defaulting the tag to `latest`.
    pub fn parse(reference: &str) -> Result<Self, ParseError> {
        let (name, target) =
            super::parse_named(reference, Tag::latest(), Component::RemoteReference)?;
        Self::new(name, target)
    }

    /// Builds a remote reference, enforcing the reserved-tag exclusion.
    pub fn new(name: Name, target: Target) -> Result<Self, ParseError> {
        if let Target::Tag(tag) = &target {
            if tag.is_reserved() {
                return Err(ParseError::new(
                    Component::RemoteReference,
                    ErrorKind::ReservedTag(tag.as_str().to_string()),
                ));
            }
        }

        Ok(RemoteRef { name, target })
    }

    /// The `name:latest` reference of a repository.
    pub fn latest(name: Name) -> Self {
        RemoteRef {
            name,
            target: Target::Tag(Tag::latest()),
        }
    }

    pub fn with_tag(name: Name, tag: Tag) -> Result<Self, ParseError> {
        Self::new(name, Target::Tag(tag))
    }

    pub fn with_id(name: Name, id: Identifier) -> Self {
        RemoteRef {
            name,
            target: Target::Id(id),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn tag(&self) -> Option<&Tag> {
        self.target.tag()
    }

    /// The decorated tag-or-identifier view, e.g. `:latest`.
    pub fn id_or_tag(&self) -> String {
        format!("{}", self.target)
    }

    pub(super) fn into_parts(self) -> (Name, Target) {
        (self.name, self.target)
    }
}

impl std::fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.name, self.target)
    }
}
