//! Repository: a named, linearly historied image with a movable `HEAD`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::commit::{Commits, COMMIT_PREFIX};
use crate::rebase::RebaseSession;
use crate::reference::{LocalRef, Name, Reference, RemoteRef, Tag};
use crate::store::{
    AddCopyOptions, BuilderCommitOptions, Compression, ImageHandle, LayerBuilder, RunOptions,
    Store,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("invalid repository, no image name carries the HEAD tag")]
    NoName,
    #[error("reference {reference:?} is not part of repository {repository:?}")]
    NotPartOfRepository { reference: String, repository: String },
    #[error("tag {0:?} is reserved")]
    ReservedTag(String),
}

/// Options for [`Repository::add`].
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Access permissions applied to the added content (octal spec).
    pub chmod: String,
    /// Ownership spec applied to the added content.
    pub chown: String,
    pub message: String,
}

/// Options for [`Repository::exec`].
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub message: String,
    /// Suppress the command's standard streams.
    pub quiet: bool,
}

/// A local repository: its `HEAD` reference plus a cached handle to the
/// image currently holding that tag. Mutating operations retag and then
/// reload the cached handle.
#[derive(Debug)]
pub struct Repository<S: Store> {
    store: S,
    head_ref: LocalRef,
    head: S::Image,
}

impl<S: Store> Repository<S> {
    /// Opens the repository with the given name by resolving `name:HEAD`.
    pub(crate) fn from_name(store: S, name: Name) -> Result<Self> {
        let head_ref = LocalRef::head(name);
        let head = store
            .lookup_image(&Reference::from(head_ref.clone()))
            .context("failed to lookup repository HEAD")?;

        Ok(Repository {
            store,
            head_ref,
            head,
        })
    }

    /// Wraps an image already known to hold a `HEAD` tag, deriving the
    /// repository name from it.
    pub(crate) fn from_image(store: S, head: S::Image) -> Result<Self> {
        let name = head
            .names()
            .iter()
            .filter_map(|name| LocalRef::parse(name).ok())
            .find(|reference| reference.tag().map(Tag::as_str) == Some(crate::reference::HEAD))
            .map(|reference| reference.name().clone())
            .ok_or(RepositoryError::NoName)?;

        Ok(Repository {
            store,
            head_ref: LocalRef::head(name),
            head,
        })
    }

    /// Id of the image currently holding `HEAD`.
    pub fn id(&self) -> String {
        self.head.id()
    }

    pub fn name(&self) -> &Name {
        self.head_ref.name()
    }

    pub fn head_ref(&self) -> &LocalRef {
        &self.head_ref
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    /// The commit history of this repository, newest first.
    pub fn commits(&self) -> Result<Commits> {
        let history = self
            .head
            .history()
            .context("failed to retrieve history from image")?;

        Ok(Commits::from_history(history))
    }

    /// Tags on the `HEAD` layer, excluding the reserved tags themselves.
    pub fn head_other_tags(&self) -> Vec<String> {
        self.head
            .names()
            .iter()
            .filter_map(|name| RemoteRef::parse(name).ok())
            .filter(|reference| reference.name() == self.name())
            .filter_map(|reference| reference.tag().map(|tag| tag.as_str().to_string()))
            .collect()
    }

    /// Tags bound to this repository's name on layers other than `HEAD`.
    pub fn other_tags(&self) -> Result<Vec<String>> {
        let images = self
            .store
            .list_images(&[crate::store::Filter::Reference(format!(
                "{}:*",
                self.name()
            ))])
            .context("failed to list repository references")?;

        let head_id = self.id();
        let mut tags = Vec::new();
        for image in images {
            if image.id() == head_id {
                continue;
            }
            for name in image.names() {
                let Ok(reference) = RemoteRef::parse(&name) else {
                    continue;
                };
                if reference.name() != self.name() {
                    continue;
                }
                if let Some(tag) = reference.tag() {
                    tags.push(tag.as_str().to_string());
                }
            }
        }

        Ok(tags)
    }

    /// Adds a tag to the `HEAD` layer. Reserved tags are rejected.
    pub fn add_tag(&mut self, tag: &Tag) -> Result<()> {
        if tag.is_reserved() {
            return Err(RepositoryError::ReservedTag(tag.as_str().to_string()).into());
        }
        let reference = LocalRef::with_tag(self.name().clone(), tag.clone());
        self.head
            .tag(&reference.to_string())
            .with_context(|| format!("failed to add tag {tag:?}"))
    }

    /// Removes a tag from the `HEAD` layer. Reserved tags are rejected; the
    /// crate-internal [`Repository::remove_local_tag`] exists for those.
    pub fn remove_tag(&mut self, tag: &Tag) -> Result<()> {
        if tag.is_reserved() {
            return Err(RepositoryError::ReservedTag(tag.as_str().to_string()).into());
        }
        self.remove_local_tag(tag)
    }

    /// Removes any tag, reserved ones included. Needed by rebase cleanup to
    /// drop `REBASE_HEAD`.
    pub(crate) fn remove_local_tag(&mut self, tag: &Tag) -> Result<()> {
        let reference = LocalRef::with_tag(self.name().clone(), tag.clone());
        self.head
            .untag(&reference.to_string())
            .with_context(|| format!("failed to remove tag {tag:?}"))
    }

    /// Moves `HEAD` to the image the given reference resolves to.
    ///
    /// The target image must carry (or have carried) a name belonging to
    /// this repository; adding the `HEAD` tag then moves it off the previous
    /// image by construction.
    pub fn checkout(&mut self, reference: &Reference) -> Result<()> {
        let image = self
            .store
            .lookup_image(reference)
            .context("local reference not found")?;

        let repo_name = self.name().clone();
        let known = image
            .names()
            .iter()
            .chain(image.names_history().iter())
            .filter_map(|name| LocalRef::parse(name).ok())
            .any(|r| r.name() == &repo_name);
        if !known {
            return Err(RepositoryError::NotPartOfRepository {
                reference: reference.to_string(),
                repository: repo_name.to_string(),
            }
            .into());
        }

        image
            .tag(&self.head_ref.to_string())
            .context("failed to add HEAD tag")?;
        self.head = image;

        Ok(())
    }

    /// Drops the cached handle and re-resolves `name:HEAD`.
    pub fn reload_head(&mut self) -> Result<()> {
        self.head = self
            .store
            .lookup_image(&Reference::from(self.head_ref.clone()))
            .context("failed to reload repository HEAD")?;

        Ok(())
    }

    /// Mounts the `HEAD` image and returns the mountpoint.
    pub fn mount(&self) -> Result<PathBuf> {
        self.head.mount().context("failed to mount repository")
    }

    pub fn unmount(&self) -> Result<()> {
        self.head
            .unmount(true)
            .context("failed to unmount repository")
    }

    /// Commits the given sources to `HEAD` as an `ADD` commit.
    pub fn add(&mut self, dest: &str, options: AddOptions, sources: &[String]) -> Result<()> {
        let mut resolved = Vec::with_capacity(sources.len());
        for source in sources {
            if source.contains("://") {
                resolved.push(source.clone());
                continue;
            }
            let absolute = std::path::absolute(source)
                .context("failed to find absolute path to source")?;
            resolved.push(absolute.to_string_lossy().to_string());
        }

        let mut builder = self
            .store
            .builder(&self.head_ref)
            .context("failed to create builder")?;
        let result = builder
            .add(
                dest,
                &resolved,
                &AddCopyOptions {
                    chown: options.chown.clone(),
                    chmod: options.chmod.clone(),
                },
            )
            .context("failed to add files to image")
            .and_then(|()| {
                let created_by = format!(
                    "ADD --chown=\"{}\" --chmod=\"{}\" {} {}",
                    options.chown,
                    options.chmod,
                    quoted_list(&resolved),
                    dest
                );
                self.commit_head(&mut builder, &created_by, &options.message)
            });

        let deleted = builder.delete();
        result?;
        deleted.context("failed to delete builder")
    }

    /// Runs a command in a writable layer and commits the result to `HEAD`
    /// as an `EXEC` commit.
    pub fn exec(&mut self, options: ExecOptions, cmd: &str, args: &[String]) -> Result<()> {
        let mut command = Vec::with_capacity(args.len() + 1);
        command.push(cmd.to_string());
        command.extend(args.iter().cloned());

        let mut builder = self
            .store
            .builder(&self.head_ref)
            .context("failed to create builder")?;
        let result = builder
            .run(&command, &RunOptions { quiet: options.quiet })
            .context("failed to execute command")
            .and_then(|()| {
                let created_by = format!("EXEC {}", quoted_list(&command));
                self.commit_head(&mut builder, &created_by, &options.message)
            });

        let deleted = builder.delete();
        result?;
        deleted.context("failed to delete builder")
    }

    /// Starts a rebase session onto the image the reference resolves to.
    pub fn rebase_session(&mut self, reference: &Reference) -> Result<RebaseSession<'_, S>> {
        let base = self
            .store
            .lookup_image(reference)
            .context("failed to find new base")?;

        RebaseSession::new(self, base)
    }

    /// Starts a rebase session with the given image as the new base.
    pub fn rebase_session_by_image(&mut self, base: S::Image) -> Result<RebaseSession<'_, S>> {
        RebaseSession::new(self, base)
    }

    fn commit_head(
        &mut self,
        builder: &mut S::Builder,
        created_by: &str,
        message: &str,
    ) -> Result<()> {
        builder.set_history_comment(&format!("{message}\n"));
        builder.set_created_by(&format!("{COMMIT_PREFIX}{created_by}"));
        builder
            .commit(
                &self.head_ref,
                &BuilderCommitOptions {
                    compression: Compression::Gzip,
                },
            )
            .context("failed to commit changes")?;

        self.reload_head()
            .context("failed to reload repository's HEAD after commit")
    }
}

/// Prints a command or source list the way it is stored in `created_by`:
/// space-separated, each item double-quoted with embedded quotes escaped.
fn quoted_list(items: &[String]) -> String {
    let mut out = String::from("[");
    for (i, item) in items.iter().enumerate() {
        out.push('"');
        out.push_str(&item.replace('"', "\\\""));
        out.push('"');
        if i + 1 < items.len() {
            out.push(' ');
        }
    }
    out.push(']');
    out
}
