//! Repository operations over a seeded store: tags, checkout, content
//! commits and the single-HEAD invariant.

mod common;

use ocitree::manager::{CloneOptions, FetchOptions, Manager};
use ocitree::reference::{LocalRef, Name, Reference, RemoteRef, Tag};
use ocitree::repository::{AddOptions, ExecOptions};
use ocitree::store::{Filter, Store};

fn cloned_alpine(store: &ocitree::store::LocalStore) -> Manager<ocitree::store::LocalStore> {
    let manager = Manager::new(store.clone());
    let remote = RemoteRef::parse("alpine:latest").unwrap();
    manager
        .clone_repository(&remote, &CloneOptions::default())
        .unwrap();
    manager
}

fn assert_single_head(store: &ocitree::store::LocalStore, name: &str) {
    let heads = store
        .list_images(&[Filter::Reference(format!("{name}:HEAD"))])
        .unwrap();
    assert_eq!(heads.len(), 1, "exactly one image must carry {name}:HEAD");
}

#[test]
fn test_head_tags_follow_tag_operations() {
    let store = common::seeded_store();
    let manager = cloned_alpine(&store);
    let name = Name::parse("alpine").unwrap();

    let mut repository = manager.repository(&name).unwrap();
    assert_eq!(repository.head_other_tags(), vec!["latest".to_string()]);

    // Add a tag, reload, and find it on HEAD.
    repository.add_tag(&Tag::parse("edge").unwrap()).unwrap();
    repository.reload_head().unwrap();
    let mut tags = repository.head_other_tags();
    tags.sort();
    assert_eq!(tags, vec!["edge".to_string(), "latest".to_string()]);

    // Remove the original tag.
    repository.remove_tag(&Tag::parse("latest").unwrap()).unwrap();
    repository.reload_head().unwrap();
    assert_eq!(repository.head_other_tags(), vec!["edge".to_string()]);
}

#[test]
fn test_add_tag_rejects_reserved() {
    let store = common::seeded_store();
    let manager = cloned_alpine(&store);
    let name = Name::parse("alpine").unwrap();

    let mut repository = manager.repository(&name).unwrap();
    assert!(repository.add_tag(&Tag::head()).is_err());
    assert!(repository.add_tag(&Tag::rebase_head()).is_err());
    assert!(repository.remove_tag(&Tag::head()).is_err());
}

#[test]
fn test_other_tags_bound_to_repository() {
    let store = common::seeded_store();
    let manager = cloned_alpine(&store);
    let name = Name::parse("alpine").unwrap();

    let repository = manager.repository(&name).unwrap();
    assert!(repository.other_tags().unwrap().is_empty());

    // Fetching another tag of the same repository makes it an "other" tag.
    let remote = RemoteRef::parse("alpine:3.15").unwrap();
    manager.fetch(&remote, &FetchOptions::default()).unwrap();
    assert_eq!(repository.other_tags().unwrap(), vec!["3.15".to_string()]);

    // A different repository's tags never show up.
    manager
        .clone_repository(
            &RemoteRef::parse("busybox:latest").unwrap(),
            &CloneOptions::default(),
        )
        .unwrap();
    assert_eq!(repository.other_tags().unwrap(), vec!["3.15".to_string()]);
}

#[test]
fn test_checkout_moves_head() {
    let store = common::seeded_store();
    let manager = cloned_alpine(&store);
    let name = Name::parse("alpine").unwrap();

    let remote = RemoteRef::parse("alpine:3.15").unwrap();
    manager.fetch(&remote, &FetchOptions::default()).unwrap();

    let mut repository = manager.repository(&name).unwrap();
    assert_eq!(repository.head_other_tags(), vec!["latest".to_string()]);

    repository
        .checkout(&Reference::from(LocalRef::parse("alpine:3.15").unwrap()))
        .unwrap();
    assert_eq!(repository.head_other_tags(), vec!["3.15".to_string()]);
    assert_single_head(&store, "docker.io/library/alpine");
}

#[test]
fn test_checkout_foreign_image_fails() {
    let store = common::seeded_store();
    let manager = cloned_alpine(&store);
    manager
        .clone_repository(
            &RemoteRef::parse("busybox:latest").unwrap(),
            &CloneOptions::default(),
        )
        .unwrap();

    let name = Name::parse("alpine").unwrap();
    let mut repository = manager.repository(&name).unwrap();

    // busybox's image is not part of the alpine repository.
    let err = repository
        .checkout(&Reference::from(LocalRef::parse("busybox:latest").unwrap()))
        .unwrap_err();
    assert!(
        err.to_string().contains("not part of repository"),
        "unexpected error: {err:#}"
    );
}

#[test]
fn test_add_commits_files_to_head() {
    let store = common::seeded_store();
    let manager = cloned_alpine(&store);
    let name = Name::parse("alpine").unwrap();
    let mut repository = manager.repository(&name).unwrap();

    let before = repository.commits().unwrap().len();

    let source = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(source.path(), b"configuration").unwrap();
    let source_path = source.path().to_string_lossy().to_string();

    repository
        .add(
            "/etc/app.conf",
            AddOptions {
                chmod: String::new(),
                chown: String::new(),
                message: "add app configuration".to_string(),
            },
            &[source_path.clone()],
        )
        .unwrap();

    let commits = repository.commits().unwrap();
    assert_eq!(commits.len(), before + 1);
    assert_eq!(commits[0].message(), "add app configuration");
    assert_eq!(
        commits[0].created_by(),
        format!("/bin/sh -c #(ocitree) ADD --chown=\"\" --chmod=\"\" [\"{source_path}\"] /etc/app.conf")
    );
    assert_eq!(commits[0].operation(), ocitree::commit::CommitOperation::Add);
    assert_eq!(commits[0].id(), repository.id(), "HEAD must point at the new commit");
    assert_single_head(&store, "docker.io/library/alpine");

    let mountpoint = repository.mount().unwrap();
    assert_eq!(
        std::fs::read(mountpoint.join("etc/app.conf")).unwrap(),
        b"configuration"
    );
    repository.unmount().unwrap();
}

#[test]
fn test_exec_commits_command_result() {
    let store = common::seeded_store();
    let manager = cloned_alpine(&store);
    let name = Name::parse("alpine").unwrap();
    let mut repository = manager.repository(&name).unwrap();

    repository
        .exec(
            ExecOptions {
                message: "record build stamp".to_string(),
                quiet: true,
            },
            "/bin/sh",
            &["-c".to_string(), "echo stamped > ./build-stamp".to_string()],
        )
        .unwrap();

    let commits = repository.commits().unwrap();
    assert_eq!(commits[0].message(), "record build stamp");
    assert_eq!(
        commits[0].created_by(),
        "/bin/sh -c #(ocitree) EXEC [\"/bin/sh\" \"-c\" \"echo stamped > ./build-stamp\"]"
    );
    assert_eq!(commits[0].operation(), ocitree::commit::CommitOperation::Exec);

    let mountpoint = repository.mount().unwrap();
    assert_eq!(
        std::fs::read_to_string(mountpoint.join("build-stamp")).unwrap(),
        "stamped\n"
    );
    repository.unmount().unwrap();
}

#[test]
fn test_failed_exec_leaves_history_untouched() {
    let store = common::seeded_store();
    let manager = cloned_alpine(&store);
    let name = Name::parse("alpine").unwrap();
    let mut repository = manager.repository(&name).unwrap();

    let before = repository.commits().unwrap().len();
    let result = repository.exec(
        ExecOptions {
            message: String::new(),
            quiet: true,
        },
        "/bin/sh",
        &["-c".to_string(), "exit 7".to_string()],
    );
    assert!(result.is_err());

    assert_eq!(repository.commits().unwrap().len(), before);
    assert_single_head(&store, "docker.io/library/alpine");
}

#[test]
fn test_commits_are_linear_with_parent_links() {
    let store = common::seeded_store();
    let manager = cloned_alpine(&store);
    let name = Name::parse("alpine").unwrap();
    let repository = manager.repository(&name).unwrap();

    let commits = repository.commits().unwrap();
    assert!(commits.len() >= 2);
    for i in 0..commits.len() {
        match commits.parent(i) {
            Some(parent) => assert_eq!(commits[i + 1].id(), parent.id()),
            None => assert_eq!(i, commits.len() - 1, "only the root has no parent"),
        }
    }
}
