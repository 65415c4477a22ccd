//! Local repository references.

use serde::{Deserialize, Serialize};

use super::error::{Component, ErrorKind, ParseError};
use super::{Identifier, Name, Reference, Tag, Target};

/// A reference to a repository in local storage. Any named reference is a
/// valid local reference; the default tag is `HEAD`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRef {
    name: Name,
    target: Target,
}

impl LocalRef {
    /// Parses a local reference, defaulting the tag to `HEAD`.
    pub fn parse(reference: &str) -> Result<Self, ParseError> {
        let (name, target) =
            super::parse_named(reference, Tag::head(), Component::LocalReference)?;
        Ok(LocalRef { name, target })
    }

    pub fn new(name: Name, target: Target) -> Self {
        LocalRef { name, target }
    }

    /// The `name:HEAD` reference of a repository.
    pub fn head(name: Name) -> Self {
        LocalRef {
            name,
            target: Target::Tag(Tag::head()),
        }
    }

    /// The `name:REBASE_HEAD` reference of a repository.
    pub fn rebase_head(name: Name) -> Self {
        LocalRef {
            name,
            target: Target::Tag(Tag::rebase_head()),
        }
    }

    pub fn with_tag(name: Name, tag: Tag) -> Self {
        LocalRef {
            name,
            target: Target::Tag(tag),
        }
    }

    pub fn with_id(name: Name, id: Identifier) -> Self {
        LocalRef {
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

    /// The decorated tag-or-identifier view, e.g. `:HEAD`.
    pub fn id_or_tag(&self) -> String {
        format!("{}", self.target)
    }

    pub(super) fn into_parts(self) -> (Name, Target) {
        (self.name, self.target)
    }
}

impl std::fmt::Display for LocalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.name, self.target)
    }
}

impl From<super::RemoteRef> for LocalRef {
    /// Every remote reference is also a valid local reference.
    fn from(remote: super::RemoteRef) -> Self {
        let (name, target) = remote.into_parts();
        LocalRef { name, target }
    }
}

impl TryFrom<Reference> for LocalRef {
    type Error = ParseError;

    fn try_from(reference: Reference) -> Result<Self, ParseError> {
        match reference {
            Reference::Tagged { name, tag } => Ok(LocalRef::with_tag(name, tag)),
            Reference::Digested { name, id } => Ok(LocalRef::with_id(name, id)),
            Reference::Id(_) => Err(ParseError::new(
                Component::LocalReference,
                ErrorKind::MissingName,
            )),
        }
    }
}
