//! Commit model: an immutable, linear view of an image's layer history.
//!
//! History is read-only. Mutation happens by producing a new image layer and
//! rebinding `HEAD`, never by editing a commit.

use chrono::{DateTime, Utc};

use crate::store::HistoryEntry;

/// `created_by` prefix marking a layer as authored by this tool.
pub const COMMIT_PREFIX: &str = "/bin/sh -c #(ocitree) ";

/// The operation that produced an authored commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOperation {
    Unknown,
    Exec,
    Add,
}

impl CommitOperation {
    fn from_token(token: &str) -> Self {
        match token {
            "EXEC" => CommitOperation::Exec,
            "ADD" => CommitOperation::Add,
            _ => CommitOperation::Unknown,
        }
    }
}

impl std::fmt::Display for CommitOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommitOperation::Exec => "EXEC",
            CommitOperation::Add => "ADD",
            CommitOperation::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// One layer of an image's history. The root commit has no parent; a commit
/// whose layer has no stored image carries an empty id.
#[derive(Debug, Clone)]
pub struct Commit {
    entry: HistoryEntry,
    parent: Option<usize>,
}

impl Commit {
    /// The image id associated with this commit; empty for missing layers.
    pub fn id(&self) -> &str {
        &self.entry.id
    }

    /// The commit message, with the build-tool suffix stripped.
    pub fn message(&self) -> &str {
        match self.entry.comment.split_once("\nFROM") {
            Some((message, _)) => message,
            None => &self.entry.comment,
        }
    }

    /// The command string that produced this layer.
    pub fn created_by(&self) -> &str {
        &self.entry.created_by
    }

    /// Symbolic labels currently on this layer.
    pub fn tags(&self) -> &[String] {
        &self.entry.tags
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.entry.created
    }

    /// Size of the rootfs change contained in this commit.
    pub fn size(&self) -> i64 {
        self.entry.size
    }

    /// True if the commit was produced by this tool.
    pub fn is_ocitree_authored(&self) -> bool {
        self.entry.created_by.starts_with(COMMIT_PREFIX)
    }

    /// The operation that created this commit, `Unknown` for foreign layers.
    pub fn operation(&self) -> CommitOperation {
        if !self.is_ocitree_authored() {
            return CommitOperation::Unknown;
        }

        let rest = &self.entry.created_by[COMMIT_PREFIX.len()..];
        let token = rest.split_whitespace().next().unwrap_or("");
        CommitOperation::from_token(token)
    }

    /// Arena index of the parent commit, `None` for the root.
    pub fn parent_index(&self) -> Option<usize> {
        self.parent
    }
}

/// The commit chain of a repository, ordered newest to oldest. Commits live
/// in a contiguous arena; each carries the index of its parent.
#[derive(Debug, Clone, Default)]
pub struct Commits {
    commits: Vec<Commit>,
}

impl Commits {
    /// Builds the linear chain from history entries (newest first). Each
    /// commit's parent is the next entry; the tail commit has none.
    pub fn from_history(history: Vec<HistoryEntry>) -> Self {
        let last = history.len().checked_sub(1);
        let commits = history
            .into_iter()
            .enumerate()
            .map(|(i, entry)| Commit {
                entry,
                parent: match last {
                    Some(last) if i < last => Some(i + 1),
                    _ => None,
                },
            })
            .collect();

        Commits { commits }
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Commit> {
        self.commits.get(index)
    }

    /// The parent of the commit at `index`, `None` for the root.
    pub fn parent(&self, index: usize) -> Option<&Commit> {
        self.commits
            .get(index)
            .and_then(|c| c.parent)
            .and_then(|p| self.commits.get(p))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Commit> {
        self.commits.iter()
    }
}

impl std::ops::Index<usize> for Commits {
    type Output = Commit;

    fn index(&self, index: usize) -> &Commit {
        &self.commits[index]
    }
}

impl<'a> IntoIterator for &'a Commits {
    type Item = &'a Commit;
    type IntoIter = std::slice::Iter<'a, Commit>;

    fn into_iter(self) -> Self::IntoIter {
        self.commits.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, created_by: &str, comment: &str) -> HistoryEntry {
        HistoryEntry {
            id: id.to_string(),
            created: None,
            created_by: created_by.to_string(),
            size: 0,
            comment: comment.to_string(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_parent_links() {
        let commits = Commits::from_history(vec![
            entry("c", "/bin/sh -c #(ocitree) EXEC [\"touch\" \"/c\"]", ""),
            entry("b", "/bin/sh -c #(ocitree) ADD --chown=\"\" --chmod=\"\" [\".\"] /", ""),
            entry("a", "/bin/sh -c #(nop) ADD file:deadbeef in / ", ""),
        ]);

        assert_eq!(commits.len(), 3);
        assert_eq!(commits[0].parent_index(), Some(1));
        assert_eq!(commits[1].parent_index(), Some(2));
        assert_eq!(commits[2].parent_index(), None);
        assert_eq!(commits.parent(0).unwrap().id(), "b");
        assert!(commits.parent(2).is_none());
    }

    #[test]
    fn test_single_commit_has_no_parent() {
        let commits = Commits::from_history(vec![entry("a", "", "")]);
        assert_eq!(commits[0].parent_index(), None);
    }

    #[test]
    fn test_authorship_detection() {
        let authored = Commits::from_history(vec![entry(
            "a",
            "/bin/sh -c #(ocitree) EXEC [\"ls\"]",
            "",
        )]);
        assert!(authored[0].is_ocitree_authored());
        assert_eq!(authored[0].operation(), CommitOperation::Exec);

        let foreign = Commits::from_history(vec![entry("a", "/bin/sh -c touch /x", "")]);
        assert!(!foreign[0].is_ocitree_authored());
        assert_eq!(foreign[0].operation(), CommitOperation::Unknown);
    }

    #[test]
    fn test_operation_tokens() {
        for (created_by, operation) in [
            ("/bin/sh -c #(ocitree) ADD --chown=\"\" [] /", CommitOperation::Add),
            ("/bin/sh -c #(ocitree) EXEC [\"true\"]", CommitOperation::Exec),
            ("/bin/sh -c #(ocitree) FROB something", CommitOperation::Unknown),
        ] {
            let commits = Commits::from_history(vec![entry("a", created_by, "")]);
            assert_eq!(commits[0].operation(), operation, "created_by {:?}", created_by);
        }
    }

    #[test]
    fn test_message_strips_build_suffix() {
        let commits = Commits::from_history(vec![entry(
            "a",
            "",
            "my message\nFROM docker.io/library/alpine:latest",
        )]);
        assert_eq!(commits[0].message(), "my message");

        let commits = Commits::from_history(vec![entry("a", "", "plain")]);
        assert_eq!(commits[0].message(), "plain");
    }
}
