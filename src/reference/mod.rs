//! Reference algebra over repository names, tags and content identifiers.
//!
//! A reference names a repository plus a position inside it, printed as
//! `NAME:TAG`, `NAME@sha256:HEX` or a bare hex identifier. Local and remote
//! references share the grammar but differ in defaults and validity:
//! [`LocalRef`] defaults to the `HEAD` tag, [`RemoteRef`] defaults to
//! `latest` and rejects the reserved local tags. [`RelativeRef`] pairs a
//! base reference with a `~N` / `^…^` offset walking back the commit chain.
//!
//! This module is a pure value library: no I/O, no store access.

pub mod error;
mod identifier;
mod local;
mod name;
mod relative;
mod remote;
mod tag;

pub use error::{Component, ErrorKind, ParseError};
pub use identifier::Identifier;
pub use local::LocalRef;
pub use name::Name;
pub use relative::RelativeRef;
pub use remote::RemoteRef;
pub use tag::{Tag, HEAD, LATEST, REBASE_HEAD, RESERVED_TAGS};

use serde::{Deserialize, Serialize};

/// Textual prefix of an identifier inside a printed reference.
pub const ID_PREFIX: &str = "@sha256:";

/// Textual prefix of a tag inside a printed reference.
pub const TAG_PREFIX: &str = ":";

/// The tag-or-identifier half of a named reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Tag(Tag),
    Id(Identifier),
}

impl Target {
    /// Parses a free-form tag-or-identifier component: a full identifier
    /// wins, anything else must be a valid tag.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        if let Ok(id) = Identifier::from_hex(raw) {
            if id.is_full() {
                return Ok(Target::Id(id));
            }
        }
        Tag::parse(raw).map(Target::Tag).map_err(|_| {
            ParseError::new(Component::Tag, ErrorKind::NotIdentifierNorTag)
        })
    }

    pub fn tag(&self) -> Option<&Tag> {
        match self {
            Target::Tag(tag) => Some(tag),
            Target::Id(_) => None,
        }
    }

    pub fn id(&self) -> Option<&Identifier> {
        match self {
            Target::Id(id) => Some(id),
            Target::Tag(_) => None,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Tag(tag) => write!(f, "{TAG_PREFIX}{tag}"),
            Target::Id(id) => write!(f, "{ID_PREFIX}{id}"),
        }
    }
}

/// A repository reference: a named tag, a named identifier, or a bare
/// identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reference {
    Tagged { name: Name, tag: Tag },
    Digested { name: Name, id: Identifier },
    Id(Identifier),
}

impl Reference {
    /// Parses a reference, applying `default_tag` when the string names a
    /// repository without a tag or identifier. A bare full identifier parses
    /// to [`Reference::Id`].
    pub fn parse_with_default(
        reference: &str,
        default_tag: Tag,
        component: Component,
    ) -> Result<Self, ParseError> {
        // A bare full identifier is unambiguous; anything else is a named
        // reference.
        if let (bare, None) = split_components(reference) {
            if let Ok(id) = Identifier::from_hex(bare) {
                if id.is_full() {
                    return Ok(Reference::Id(id));
                }
            }
        }

        let (name, target) = parse_named(reference, default_tag, component)?;
        Ok(match target {
            Target::Tag(tag) => Reference::Tagged { name, tag },
            Target::Id(id) => Reference::Digested { name, id },
        })
    }

    /// The name component, absent for bare identifiers.
    pub fn name(&self) -> Option<&Name> {
        match self {
            Reference::Tagged { name, .. } | Reference::Digested { name, .. } => Some(name),
            Reference::Id(_) => None,
        }
    }

    /// The decorated tag-or-identifier view (`:TAG`, `@sha256:HEX`, or the
    /// bare hex for identifier-only references).
    pub fn id_or_tag(&self) -> String {
        match self {
            Reference::Tagged { tag, .. } => format!("{TAG_PREFIX}{tag}"),
            Reference::Digested { id, .. } => format!("{ID_PREFIX}{id}"),
            Reference::Id(id) => id.as_hex().to_string(),
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reference::Tagged { name, tag } => write!(f, "{name}{TAG_PREFIX}{tag}"),
            Reference::Digested { name, id } => write!(f, "{name}{ID_PREFIX}{id}"),
            Reference::Id(id) => write!(f, "{id}"),
        }
    }
}

impl From<LocalRef> for Reference {
    fn from(local: LocalRef) -> Self {
        let (name, target) = local.into_parts();
        match target {
            Target::Tag(tag) => Reference::Tagged { name, tag },
            Target::Id(id) => Reference::Digested { name, id },
        }
    }
}

impl From<RemoteRef> for Reference {
    fn from(remote: RemoteRef) -> Self {
        let (name, target) = remote.into_parts();
        match target {
            Target::Tag(tag) => Reference::Tagged { name, tag },
            Target::Id(id) => Reference::Digested { name, id },
        }
    }
}

/// Parses a named reference string into its components, applying
/// `default_tag` when the string carries neither tag nor identifier.
/// Shared by the local and remote parsers, which differ only in defaults
/// and reserved-tag policy.
pub(crate) fn parse_named(
    reference: &str,
    default_tag: Tag,
    component: Component,
) -> Result<(Name, Target), ParseError> {
    match split_components(reference) {
        (name, Some(RawTarget::Id(hex))) => {
            if name.is_empty() {
                return Err(ParseError::new(component, ErrorKind::MissingName));
            }
            Ok((
                Name::parse(name).map_err(|e| e.retag(component))?,
                Target::Id(Identifier::from_hex(hex).map_err(|e| e.retag(component))?),
            ))
        }
        (name, Some(RawTarget::Tag(tag))) => Ok((
            Name::parse(name).map_err(|e| e.retag(component))?,
            Target::Tag(Tag::parse(tag).map_err(|e| e.retag(component))?),
        )),
        (bare, None) => {
            if bare.is_empty() {
                return Err(ParseError::new(component, ErrorKind::MissingName));
            }
            Ok((
                Name::parse(bare).map_err(|e| e.retag(component))?,
                Target::Tag(default_tag),
            ))
        }
    }
}

/// Raw, unvalidated tag-or-identifier half of a split reference string.
enum RawTarget<'a> {
    Tag(&'a str),
    Id(&'a str),
}

/// Splits a reference string into its name part and an optional raw target.
/// An `@sha256:` marker wins over a colon; a colon only separates a tag when
/// it appears after the last slash (a colon before it is a registry port).
fn split_components(reference: &str) -> (&str, Option<RawTarget<'_>>) {
    if let Some(at) = reference.find(ID_PREFIX) {
        return (
            &reference[..at],
            Some(RawTarget::Id(&reference[at + ID_PREFIX.len()..])),
        );
    }
    let after_slash = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    if let Some(colon) = reference[after_slash..].find(':') {
        let colon = after_slash + colon;
        return (
            &reference[..colon],
            Some(RawTarget::Tag(&reference[colon + 1..])),
        );
    }
    (reference, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "c07b565814ed2ab787ebc839780f034a4e0dd37c32d87bac8fc541023c61bd6a";

    #[test]
    fn test_parse_named_tag() {
        let reference = Reference::parse_with_default(
            "archlinux:edge",
            Tag::head(),
            Component::LocalReference,
        )
        .unwrap();
        assert_eq!(reference.to_string(), "docker.io/library/archlinux:edge");
        assert_eq!(reference.id_or_tag(), ":edge");
    }

    #[test]
    fn test_parse_applies_default_tag() {
        let reference =
            Reference::parse_with_default("archlinux", Tag::head(), Component::LocalReference)
                .unwrap();
        assert_eq!(reference.to_string(), "docker.io/library/archlinux:HEAD");
    }

    #[test]
    fn test_parse_named_identifier() {
        let raw = format!("docker.io/library/archlinux@sha256:{FULL}");
        let reference =
            Reference::parse_with_default(&raw, Tag::head(), Component::LocalReference).unwrap();
        assert_eq!(reference.to_string(), raw);
        assert_eq!(reference.id_or_tag(), format!("@sha256:{FULL}"));
    }

    #[test]
    fn test_parse_bare_identifier() {
        let reference =
            Reference::parse_with_default(FULL, Tag::head(), Component::LocalReference).unwrap();
        assert!(matches!(reference, Reference::Id(_)));
        assert_eq!(reference.to_string(), FULL);
        assert_eq!(reference.name(), None);
    }

    #[test]
    fn test_port_is_not_a_tag() {
        let reference = Reference::parse_with_default(
            "registry.example:5000/image",
            Tag::head(),
            Component::LocalReference,
        )
        .unwrap();
        assert_eq!(reference.to_string(), "registry.example:5000/image:HEAD");
    }

    #[test]
    fn test_target_parse_prefers_full_identifier() {
        match Target::parse(FULL).unwrap() {
            Target::Id(id) => assert_eq!(id.as_hex(), FULL),
            other => panic!("expected identifier target, got {other:?}"),
        }
        match Target::parse("edge").unwrap() {
            Target::Tag(tag) => assert_eq!(tag.as_str(), "edge"),
            other => panic!("expected tag target, got {other:?}"),
        }
        // Short hex is a tag, not an identifier.
        assert!(matches!(Target::parse("c07b5658").unwrap(), Target::Tag(_)));

        let err = Target::parse("...").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::NotIdentifierNorTag);
    }

    #[test]
    fn test_parse_empty_identifier_part() {
        let err = Reference::parse_with_default(
            "archlinux@sha256:",
            Tag::head(),
            Component::LocalReference,
        )
        .unwrap_err();
        assert_eq!(err.component(), Component::LocalReference);
    }
}
