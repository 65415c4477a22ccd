//! Interactive rebase: replay chosen commits onto a new base image.
//!
//! A session tags the new base as `REBASE_HEAD`, collects the repository's
//! replayable commits (the contiguous run of tool-authored commits above
//! the base), lets the caller pick or drop each one, then replays the picks
//! oldest first by applying each commit's layer diff onto the growing
//! `REBASE_HEAD`. On success `HEAD` moves to the replay tip and the
//! transient tag is removed.

use std::collections::BTreeSet;
use std::io::Write;
use std::process::Command;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::commit::Commit;
use crate::diff::LayerDiff;
use crate::reference::{LocalRef, Reference, Tag};
use crate::repository::Repository;
use crate::store::{
    BuilderCommitOptions, Compression, ImageHandle, LayerBuilder, Store,
};

/// Editor used when `$EDITOR` is unset.
const FALLBACK_EDITOR: &str = "nano";

/// Shortest commit id prefix accepted in an instruction line. The rendered
/// lines use exactly this many characters, so shorter prefixes can only
/// come from hand-edited input where collisions would be silent.
const MIN_ID_PREFIX: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RebaseError {
    #[error("unknown rebase choice {0:?}")]
    UnknownChoice(String),
    #[error("invalid rebase commit id")]
    InvalidCommitId,
    #[error("rebase commit line already parsed")]
    DuplicateCommit,
    #[error("rebase instruction list is empty")]
    EmptyInstructionList,
    #[error("nothing to rebase")]
    NothingToRebase,
    #[error("rebase image not part of repository")]
    ImageNotPartOfRepository,
    #[error("rebase session is not reusable")]
    SessionConsumed,
    #[error("can't pick commit number {0}: no image associated with it")]
    PickMissingImage(usize),
}

/// One instruction line failed to parse.
#[derive(Debug, Error)]
#[error("failed to parse line {line:?}: {cause}")]
pub struct ParseChoiceError {
    line: String,
    #[source]
    cause: RebaseError,
}

impl ParseChoiceError {
    pub fn cause(&self) -> &RebaseError {
        &self.cause
    }
}

/// What to do with a commit during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseChoice {
    Pick,
    Drop,
}

impl RebaseChoice {
    /// Maps an instruction token, case-insensitively.
    fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "p" | "pick" => Some(RebaseChoice::Pick),
            "d" | "drop" => Some(RebaseChoice::Drop),
            _ => None,
        }
    }
}

impl std::fmt::Display for RebaseChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RebaseChoice::Pick => f.write_str("pick"),
            RebaseChoice::Drop => f.write_str("drop"),
        }
    }
}

/// A commit selected into a rebase session, with its parent and choice.
#[derive(Debug, Clone)]
pub struct RebaseCommit {
    commit: Commit,
    parent: Commit,
    pub choice: RebaseChoice,
}

impl RebaseCommit {
    pub fn commit(&self) -> &Commit {
        &self.commit
    }

    pub fn parent(&self) -> &Commit {
        &self.parent
    }

    fn short_id(&self) -> &str {
        let id = self.commit.id();
        &id[..id.len().min(MIN_ID_PREFIX)]
    }
}

/// The ordered, editable commit list of a session, oldest first. The order
/// is the replay order: instruction lines are executed top to bottom.
#[derive(Debug, Default)]
pub struct RebaseCommits {
    commits: Vec<RebaseCommit>,
}

impl RebaseCommits {
    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RebaseCommit> {
        self.commits.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut RebaseCommit> {
        self.commits.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RebaseCommit> {
        self.commits.iter()
    }

    /// Applies an edited instruction list back onto the session.
    ///
    /// Lines are `<choice> <id-prefix> …`; empty lines and `#` comments are
    /// ignored, as are lines with fewer than two tokens. The commit list is
    /// reordered to match the line order; commits not referenced by any
    /// line are dropped. Zero significant lines aborts the rebase with
    /// [`RebaseError::EmptyInstructionList`] so that emptying the buffer is
    /// distinguishable from dropping everything.
    pub fn parse_choices(&mut self, text: &str) -> Result<()> {
        let mut parsed = 0usize;
        let mut significant = 0usize;
        let mut seen: BTreeSet<String> = BTreeSet::new();

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            significant += 1;

            let mut tokens = line.split_whitespace();
            let (Some(choice_token), Some(id_token)) = (tokens.next(), tokens.next()) else {
                continue;
            };
            let fail = |cause: RebaseError| ParseChoiceError {
                line: line.to_string(),
                cause,
            };

            let choice = RebaseChoice::parse(choice_token)
                .ok_or_else(|| fail(RebaseError::UnknownChoice(choice_token.to_string())))?;

            if id_token.len() < MIN_ID_PREFIX {
                return Err(fail(RebaseError::InvalidCommitId).into());
            }
            let index = self
                .commits
                .iter()
                .position(|commit| commit.commit.id().starts_with(id_token))
                .ok_or_else(|| fail(RebaseError::InvalidCommitId))?;
            if !seen.insert(self.commits[index].commit.id().to_string()) {
                return Err(fail(RebaseError::DuplicateCommit).into());
            }

            self.commits.swap(index, parsed);
            self.commits[parsed].choice = choice;
            parsed += 1;
        }

        if significant == 0 {
            return Err(RebaseError::EmptyInstructionList.into());
        }
        for commit in &mut self.commits[parsed..] {
            commit.choice = RebaseChoice::Drop;
        }

        Ok(())
    }
}

impl std::fmt::Display for RebaseCommits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for commit in &self.commits {
            writeln!(
                f,
                "{} {} {}",
                commit.choice,
                commit.short_id(),
                commit.commit.message().trim_end()
            )?;
        }
        Ok(())
    }
}

impl std::ops::Index<usize> for RebaseCommits {
    type Output = RebaseCommit;

    fn index(&self, index: usize) -> &RebaseCommit {
        &self.commits[index]
    }
}

impl std::ops::IndexMut<usize> for RebaseCommits {
    fn index_mut(&mut self, index: usize) -> &mut RebaseCommit {
        &mut self.commits[index]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Draft,
    Applying,
    Done,
    Failed,
}

/// An in-flight rebase of one repository onto a new base image.
#[derive(Debug)]
pub struct RebaseSession<'r, S: Store> {
    store: S,
    repository: &'r mut Repository<S>,
    base: S::Image,
    commits: RebaseCommits,
    state: SessionState,
}

impl<'r, S: Store> RebaseSession<'r, S> {
    /// Starts a session: validates that the base belongs to the repository,
    /// tags it `REBASE_HEAD` and collects the replayable commits.
    pub(crate) fn new(repository: &'r mut Repository<S>, base: S::Image) -> Result<Self> {
        let repo_name = repository.name().clone();
        let part_of_repo = base
            .names()
            .iter()
            .filter_map(|name| LocalRef::parse(name).ok())
            .any(|reference| reference.name() == &repo_name);
        if !part_of_repo {
            return Err(RebaseError::ImageNotPartOfRepository.into());
        }

        let rebase_head = LocalRef::rebase_head(repo_name);
        base.tag(&rebase_head.to_string())
            .context("failed to tag rebase head")?;

        let commits = repository
            .commits()
            .context("failed to retrieve repository commits")?;

        // The replayable run: newest-first until the first commit that is
        // missing, is the base itself, is foreign, or is the root. Reversed
        // so the list reads oldest first, which is the replay order.
        let base_id = base.id();
        let mut selected = Vec::new();
        for (i, commit) in commits.iter().enumerate() {
            let Some(parent) = commits.parent(i) else {
                break;
            };
            if commit.id().is_empty() || commit.id() == base_id || !commit.is_ocitree_authored() {
                break;
            }
            selected.push(RebaseCommit {
                commit: commit.clone(),
                parent: parent.clone(),
                choice: RebaseChoice::Pick,
            });
        }
        selected.reverse();

        Ok(RebaseSession {
            store: repository.store().clone(),
            repository,
            base,
            commits: RebaseCommits { commits: selected },
            state: SessionState::Draft,
        })
    }

    /// The image the session rebases onto.
    pub fn base_image(&self) -> &S::Image {
        &self.base
    }

    pub fn commits(&self) -> &RebaseCommits {
        &self.commits
    }

    pub fn commits_mut(&mut self) -> &mut RebaseCommits {
        &mut self.commits
    }

    /// The `name:REBASE_HEAD` reference of the owning repository.
    pub fn rebase_head_ref(&self) -> LocalRef {
        LocalRef::rebase_head(self.repository.name().clone())
    }

    /// The full editor buffer: instruction lines followed by the help
    /// trailer.
    pub fn edit_text(&self) -> String {
        let repo_id = self.repository.id();
        let base_id = self.base.id();
        let newest = self
            .commits
            .commits
            .last()
            .map(|commit| commit.short_id().to_string())
            .unwrap_or_default();

        let mut text = self.commits.to_string();
        text.push('\n');
        text.push_str(&format!(
            "# Rebase {}..{} onto {} ({} command(s))\n",
            &repo_id[..repo_id.len().min(MIN_ID_PREFIX)],
            newest,
            &base_id[..base_id.len().min(MIN_ID_PREFIX)],
            self.commits.len(),
        ));
        text.push_str("# Commands:\n");
        text.push_str("# p, pick <commit> = use commit\n");
        text.push_str("# d, drop <commit> = remove commit\n");
        text.push_str("# These lines can be re-ordered; they are executed from top to bottom.\n");
        text.push_str("# If you remove a line here THAT COMMIT WILL BE LOST.\n");
        text.push_str("# However, if you remove everything, the rebase will be aborted.\n");
        text
    }

    /// Writes the instruction list to a temporary file, opens `$EDITOR` on
    /// it and parses the result back. An editor failure is logged and the
    /// buffer is parsed as-is; the file is removed when the call returns.
    pub fn interactive_edit(&mut self) -> Result<()> {
        if self.commits.is_empty() {
            return Err(RebaseError::NothingToRebase.into());
        }

        let mut file = tempfile::Builder::new()
            .prefix("ocitree-rebase-")
            .suffix(".txt")
            .tempfile()
            .context("failed to create rebase edit buffer")?;
        file.write_all(self.edit_text().as_bytes())
            .context("failed to write rebase edit buffer")?;
        file.flush().context("failed to flush rebase edit buffer")?;

        let editor = std::env::var("EDITOR").unwrap_or_else(|_| FALLBACK_EDITOR.to_string());
        match Command::new(&editor).arg(file.path()).status() {
            Ok(status) if status.success() => {}
            Ok(status) => {
                log::warn!("editor {editor:?} exited with {status}, parsing the buffer anyway");
            }
            Err(err) => {
                log::warn!("failed to launch editor {editor:?}: {err}, parsing the unedited buffer");
            }
        }

        let edited = std::fs::read_to_string(file.path())
            .context("failed to read back rebase edit buffer")?;
        self.commits.parse_choices(&edited)
    }

    /// Replays the picked commits onto the base and moves `HEAD` to the
    /// result. Consumes the session: a finished or failed session rejects
    /// further calls.
    pub fn apply(&mut self) -> Result<()> {
        if self.state != SessionState::Draft {
            return Err(RebaseError::SessionConsumed.into());
        }
        for (i, commit) in self.commits.iter().enumerate() {
            if commit.choice == RebaseChoice::Pick && commit.commit.id().is_empty() {
                return Err(RebaseError::PickMissingImage(i).into());
            }
        }
        if self.commits.is_empty() {
            // Nothing to replay; just drop the transient tag off the base.
            let removed = self.base.untag(&self.rebase_head_ref().to_string());
            self.state = SessionState::Done;
            removed.context("failed to remove rebase head tag")?;
            return Ok(());
        }

        self.state = SessionState::Applying;
        log::debug!("rebase commits:\n{}", self.commits);
        let result = self.replay();
        self.state = if result.is_ok() {
            SessionState::Done
        } else {
            SessionState::Failed
        };
        result
    }

    fn replay(&mut self) -> Result<()> {
        for i in 0..self.commits.len() {
            let commit = &self.commits[i];
            match commit.choice {
                RebaseChoice::Drop => continue,
                RebaseChoice::Pick => {
                    log::debug!("picking commit {} ({})", i, commit.commit.id());
                    self.pick(commit).with_context(|| {
                        format!("failed to pick commit {} ({})", i, commit.commit.id())
                    })?;
                }
            }
        }

        self.repository
            .checkout(&Reference::from(self.rebase_head_ref()))
            .context("failed to checkout to rebase head")?;
        self.repository
            .remove_local_tag(&Tag::rebase_head())
            .context("failed to remove rebase head tag")?;

        Ok(())
    }

    /// Replays one commit: materialize its diff against its parent, apply
    /// it atop the current `REBASE_HEAD` and commit the result back under
    /// the same `created_by` and message.
    fn pick(&self, commit: &RebaseCommit) -> Result<()> {
        let stream = self.store.diff(&commit.parent, &commit.commit).with_context(|| {
            format!(
                "failed to compute diff between commit {} and {}",
                commit.parent.id(),
                commit.commit.id()
            )
        })?;
        // The stream holds the store lock; materialize it fully before any
        // other store operation.
        let diff = LayerDiff::from_reader(stream)?;

        let rebase_head = self.rebase_head_ref();
        let mut builder = self
            .store
            .builder(&rebase_head)
            .context("failed to create rebase builder")?;

        let result = (|| -> Result<()> {
            let mountpoint = builder
                .mount()
                .context("failed to mount rebase builder container")?;
            diff.apply_to(&mountpoint).context("failed to apply layer")?;
            builder
                .unmount()
                .context("failed to unmount rebase builder container")?;

            builder.set_created_by(commit.commit.created_by());
            builder.set_history_comment(&format!("{}\n", commit.commit.message()));
            builder
                .commit(
                    &rebase_head,
                    &BuilderCommitOptions {
                        compression: Compression::Uncompressed,
                    },
                )
                .context("failed to commit rebase head")?;

            Ok(())
        })();

        let deleted = builder.delete();
        result?;
        deleted.context("failed to delete rebase builder")?;

        Ok(())
    }
}
