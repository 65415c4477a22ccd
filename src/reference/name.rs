//! The name component of a repository reference.
//!
//! A name is the registry-qualified path of a repository, e.g.
//! `docker.io/library/alpine`. Short forms normalize against the default
//! registry and namespace: `alpine` becomes `docker.io/library/alpine`,
//! `org/image` becomes `docker.io/org/image`.

use serde::{Deserialize, Serialize};

use super::error::{Component, ErrorKind, ParseError};

/// Registry used when a name carries no domain.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Namespace prepended to single-component names on the default registry.
pub const DEFAULT_NAMESPACE: &str = "library";

/// A validated, fully qualified repository name. Carries no tag and no digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Name(String);

impl Name {
    /// Parses and normalizes a repository name.
    ///
    /// Fails with [`ErrorKind::NameContainsTagOrDigest`] if the input carries
    /// a tag or digest decoration, and [`ErrorKind::MissingName`] on empty
    /// input.
    pub fn parse(name: &str) -> Result<Self, ParseError> {
        let err = |kind| ParseError::new(Component::Name, kind);

        if name.is_empty() {
            return Err(err(ErrorKind::MissingName));
        }
        if name.contains('@') {
            return Err(err(ErrorKind::NameContainsTagOrDigest));
        }
        // A colon after the last slash is a tag separator. A colon before it
        // can only be a registry port, which is part of the name grammar.
        let after_slash = name.rfind('/').map(|i| &name[i + 1..]).unwrap_or(name);
        if after_slash.contains(':') {
            return Err(err(ErrorKind::NameContainsTagOrDigest));
        }

        let (domain, path) = split_domain(name);
        if path.is_empty() {
            return Err(err(ErrorKind::MissingName));
        }
        if !valid_domain(domain) {
            return Err(err(ErrorKind::InvalidFormat));
        }
        let mut components: Vec<&str> = path.split('/').collect();
        if components.iter().any(|c| !valid_path_component(c)) {
            return Err(err(ErrorKind::InvalidFormat));
        }
        if domain == DEFAULT_REGISTRY && components.len() == 1 {
            components.insert(0, DEFAULT_NAMESPACE);
        }

        Ok(Name(format!("{}/{}", domain, components.join("/"))))
    }

    /// The fully qualified name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Splits a name into its domain and repository path. A leading component
/// only counts as a domain when it looks like a hostname (contains a dot or
/// a port, or is `localhost`); otherwise the default registry applies.
fn split_domain(name: &str) -> (&str, &str) {
    if let Some(slash) = name.find('/') {
        let first = &name[..slash];
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return (first, &name[slash + 1..]);
        }
    }
    (DEFAULT_REGISTRY, name)
}

fn valid_domain(domain: &str) -> bool {
    let (host, port) = match domain.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (domain, None),
    };
    if let Some(port) = port {
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
    }
    !host.is_empty()
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        })
}

/// Path components are runs of lowercase alphanumerics joined by `.`, `_`,
/// `__` or one or more dashes.
fn valid_path_component(component: &str) -> bool {
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    let bytes = component.as_bytes();
    if bytes.is_empty() || !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }

    let mut separator = String::new();
    for &b in bytes {
        if alnum(b) {
            if !separator.is_empty() && !valid_separator(&separator) {
                return false;
            }
            separator.clear();
        } else if b == b'.' || b == b'_' || b == b'-' {
            separator.push(b as char);
        } else {
            return false;
        }
    }
    separator.is_empty()
}

fn valid_separator(sep: &str) -> bool {
    matches!(sep, "." | "_" | "__") || sep.bytes().all(|b| b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::error::{Component, ErrorKind};

    #[test]
    fn test_parse_normalizes_short_names() {
        for (input, expected) in [
            ("alpine", "docker.io/library/alpine"),
            ("org/image", "docker.io/org/image"),
            ("docker.io/library/archlinux", "docker.io/library/archlinux"),
            ("negrel.dev/archlinux", "negrel.dev/archlinux"),
            ("localhost/image", "localhost/image"),
            ("registry.example:5000/org/image", "registry.example:5000/org/image"),
            ("registry.example/org/sub/image", "registry.example/org/sub/image"),
        ] {
            let name = Name::parse(input).unwrap();
            assert_eq!(name.as_str(), expected, "input {:?}", input);
        }
    }

    #[test]
    fn test_parse_is_idempotent() {
        let once = Name::parse("alpine").unwrap();
        let twice = Name::parse(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_parse_rejects_decorations() {
        for input in [
            "docker.io/library/archlinux:latest",
            "archlinux:HEAD",
            "docker.io/library/archlinux@sha256:cbbf2f9a99b47fc460d422812b6a5adff7dfee951d8fa2e4a98caa0382cfbdbf",
        ] {
            let err = Name::parse(input).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::NameContainsTagOrDigest, "input {:?}", input);
            assert_eq!(err.component(), Component::Name);
        }
    }

    #[test]
    fn test_parse_rejects_invalid_grammar() {
        for input in [
            "§archlinux",
            "docker.io/library/§archlinux§",
            ".docker.io/library/archlinux",
            "UPPER/case",
            "foo//bar",
            "foo/bar..baz",
            "foo/-bar",
        ] {
            let err = Name::parse(input).unwrap_err();
            assert!(
                matches!(err.kind(), ErrorKind::InvalidFormat | ErrorKind::MissingName),
                "input {:?} gave {:?}",
                input,
                err
            );
        }
    }

    #[test]
    fn test_parse_rejects_empty() {
        let err = Name::parse("").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::MissingName);
    }

    #[test]
    fn test_path_component_separators() {
        assert!(valid_path_component("a-b"));
        assert!(valid_path_component("a--b"));
        assert!(valid_path_component("a__b"));
        assert!(valid_path_component("a.b.c"));
        assert!(!valid_path_component("a._b"));
        assert!(!valid_path_component("a...b"));
        assert!(!valid_path_component("_ab"));
    }
}
