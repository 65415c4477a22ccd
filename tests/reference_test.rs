//! Reference algebra properties: round-trip printing, normalization,
//! reserved-tag exclusion and relative-offset grammar.

use ocitree::reference::{
    ErrorKind, Identifier, LocalRef, Name, Reference, RelativeRef, RemoteRef, Tag,
};

const FULL_ID: &str = "c07b565814ed2ab787ebc839780f034a4e0dd37c32d87bac8fc541023c61bd6a";

#[test]
fn test_short_local_name_normalizes_to_head() {
    // `archlinux` → docker.io/library/archlinux:HEAD
    let reference = LocalRef::parse("archlinux").unwrap();
    assert_eq!(reference.name().as_str(), "docker.io/library/archlinux");
    assert_eq!(reference.tag().unwrap().as_str(), "HEAD");
    assert_eq!(reference.to_string(), "docker.io/library/archlinux:HEAD");
}

#[test]
fn test_remote_head_tag_is_rejected() {
    let err = RemoteRef::parse("docker.io/library/archlinux:HEAD").unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::ReservedTag("HEAD".to_string()));
}

#[test]
fn test_relative_with_identifier_base() {
    let reference = RelativeRef::parse(&format!("{FULL_ID}:~4")).unwrap();
    match reference.base() {
        Reference::Id(id) => assert_eq!(id.as_hex(), FULL_ID),
        other => panic!("expected identifier base, got {other:?}"),
    }
    assert_eq!(reference.offset(), 4);
}

#[test]
fn test_local_round_trip() {
    // print(parse(s)) == s for every normalized local reference.
    for input in [
        "docker.io/library/archlinux:HEAD",
        "docker.io/library/archlinux:latest",
        "docker.io/library/archlinux:edge",
        "negrel.dev/archlinux:latest",
        "localhost/archlinux:edge",
        "registry.example:5000/org/image:v1",
        &format!("docker.io/library/archlinux@sha256:{FULL_ID}"),
    ] {
        let reference = LocalRef::parse(input).unwrap();
        assert_eq!(reference.to_string(), input, "input {:?}", input);
    }
}

#[test]
fn test_remote_round_trip() {
    for input in [
        "docker.io/library/archlinux:latest",
        "docker.io/library/archlinux:edge",
        "negrel.dev/library/archlinux:latest",
        &format!("docker.io/library/archlinux@sha256:{FULL_ID}"),
    ] {
        let reference = RemoteRef::parse(input).unwrap();
        assert_eq!(reference.to_string(), input, "input {:?}", input);
    }
}

#[test]
fn test_normalization_is_idempotent() {
    for input in ["archlinux", "org/image", "archlinux:edge", "alpine:3.15"] {
        let once = LocalRef::parse(input).unwrap();
        let twice = LocalRef::parse(&once.to_string()).unwrap();
        assert_eq!(once, twice, "input {:?}", input);

        let once = RemoteRef::parse(input).unwrap();
        let twice = RemoteRef::parse(&once.to_string()).unwrap();
        assert_eq!(once, twice, "input {:?}", input);
    }
}

#[test]
fn test_name_round_trip() {
    for input in ["docker.io/library/archlinux", "negrel.dev/archlinux"] {
        assert_eq!(Name::parse(input).unwrap().as_str(), input);
    }
}

#[test]
fn test_tag_and_identifier_round_trip() {
    for input in ["latest", "3.15", "HEAD", "v1.0-rc.1"] {
        assert_eq!(Tag::parse(input).unwrap().as_str(), input);
    }
    assert_eq!(Identifier::parse(FULL_ID).unwrap().as_hex(), FULL_ID);
}

#[test]
fn test_reserved_tag_exclusion_is_exact() {
    // parseRemoteRef(name + ":" + T) fails iff T is a reserved tag.
    for (tag, reserved) in [
        ("HEAD", true),
        ("REBASE_HEAD", true),
        ("head", false),
        ("latest", false),
        ("HEAD2", false),
        ("edge", false),
    ] {
        let result = RemoteRef::parse(&format!("archlinux:{tag}"));
        assert_eq!(result.is_err(), reserved, "tag {:?}", tag);
        if reserved {
            // The same string stays valid as a local reference.
            assert!(LocalRef::parse(&format!("archlinux:{tag}")).is_ok());
        }
    }
}

#[test]
fn test_relative_offset_grammar() {
    // `~N` extracts the decimal value, a `^` run its length.
    for n in [1usize, 2, 3, 7, 42, 99] {
        let reference = RelativeRef::parse(&format!("archlinux~{n}")).unwrap();
        assert_eq!(reference.offset(), n, "offset ~{n}");

        let carets = "^".repeat(n);
        let reference = RelativeRef::parse(&format!("archlinux:{carets}")).unwrap();
        assert_eq!(reference.offset(), n, "offset {carets:?}");
    }

    let reference = RelativeRef::parse("archlinux").unwrap();
    assert_eq!(reference.offset(), 0);
}

#[test]
fn test_relative_base_defaults_to_head() {
    let reference = RelativeRef::parse("archlinux~2").unwrap();
    assert_eq!(
        reference.base().to_string(),
        "docker.io/library/archlinux:HEAD"
    );
}

#[test]
fn test_name_rejects_decorations() {
    for input in ["archlinux:latest", &format!("archlinux@sha256:{FULL_ID}")] {
        let err = Name::parse(input).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::NameContainsTagOrDigest, "input {:?}", input);
    }
}
