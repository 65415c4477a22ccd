//! Fleet-level entry point over the store: list, lookup, clone, fetch and
//! relative-reference resolution.

use std::collections::BTreeSet;

use anyhow::{anyhow, Context, Result};
use thiserror::Error;

use crate::reference::{Identifier, LocalRef, Name, Reference, RelativeRef, RemoteRef};
use crate::repository::Repository;
use crate::store::{Filter, ImageHandle, PullOptions, Store};

/// History id placeholder used by engines for layers without a local image.
const MISSING_IMAGE_ID: &str = "<missing>";

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("local repository with the same name already exists")]
    LocalRepositoryAlreadyExists,
    #[error("unknown local repository")]
    LocalRepositoryUnknown,
    #[error("offset {offset} is out of bounds, history contains {history} commit(s)")]
    OffsetOutOfBounds { offset: usize, history: usize },
    #[error("commit at offset {0} has no image associated with it")]
    CommitHasNoImage(usize),
}

/// Aggregate of the per-reference pull failures of one fetch.
#[derive(Debug)]
pub struct FetchError {
    errors: Vec<anyhow::Error>,
}

impl FetchError {
    pub fn errors(&self) -> &[anyhow::Error] {
        &self.errors
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to update {} reference(s): ", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err:#}")?;
        }
        Ok(())
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    pub pull: PullOptions,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub pull: PullOptions,
}

/// Manages the repositories of one store.
pub struct Manager<S: Store> {
    store: S,
}

impl<S: Store> Manager<S> {
    pub fn new(store: S) -> Self {
        Manager { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The repository with the given name. Fails if the local repository is
    /// missing or corrupted.
    pub fn repository(&self, name: &Name) -> Result<Repository<S>> {
        Repository::from_name(self.store.clone(), name.clone())
    }

    /// True if a local repository with the given name exists.
    pub fn local_repository_exists(&self, name: &Name) -> bool {
        let head = Reference::from(LocalRef::head(name.clone()));
        self.store.lookup_image(&head).is_ok()
    }

    /// Every repository in the store: one per image carrying a `HEAD` tag.
    /// Images whose repository cannot be constructed are skipped.
    pub fn repositories(&self) -> Result<Vec<Repository<S>>> {
        let images = self
            .store
            .list_images(&[Filter::Reference(format!("*:{}", crate::reference::HEAD))])
            .context("failed to list images")?;

        let mut repositories = Vec::with_capacity(images.len());
        for image in images {
            match Repository::from_image(self.store.clone(), image) {
                Ok(repository) => repositories.push(repository),
                Err(err) => {
                    log::debug!(
                        "image listed with a HEAD reference but repository can't be created from it: {err:#}"
                    );
                }
            }
        }

        Ok(repositories)
    }

    /// Clones a remote repository into local storage, tagging the pulled
    /// image `name:HEAD`.
    pub fn clone_repository(&self, remote: &RemoteRef, options: &CloneOptions) -> Result<()> {
        if self.local_repository_exists(remote.name()) {
            return Err(ManagerError::LocalRepositoryAlreadyExists.into());
        }

        let images = self
            .store
            .pull(remote, &options.pull)
            .context("failed to pull repository")?;
        let image = images
            .first()
            .ok_or_else(|| anyhow!("pull of {remote} returned no image"))?;

        let head_ref = LocalRef::head(remote.name().clone());
        self.store
            .add_names(&image.id(), &[head_ref.to_string()])
            .context("failed to add HEAD reference to image")?;

        Ok(())
    }

    /// Re-pulls every remote-valid reference bound to the repository's
    /// images, then the explicitly requested reference. Individual pull
    /// failures accumulate; the call succeeds iff none occurred.
    pub fn fetch(&self, remote: &RemoteRef, options: &FetchOptions) -> Result<()> {
        if !self.local_repository_exists(remote.name()) {
            return Err(ManagerError::LocalRepositoryUnknown.into());
        }

        let images = self
            .store
            .list_images(&[Filter::Reference(format!("{}:*", remote.name()))])
            .context("failed to list references to repository")?;

        let mut references = BTreeSet::new();
        for image in &images {
            for name in image.names() {
                match RemoteRef::parse(&name) {
                    Ok(reference) if reference.name() == remote.name() => {
                        references.insert(reference.to_string());
                    }
                    Ok(_) => {}
                    Err(err) => {
                        // HEAD and other local-only names land here.
                        log::debug!("skipping {name:?} because of error: {err}");
                    }
                }
            }
        }
        references.remove(&remote.to_string());

        let mut errors = Vec::new();
        for raw in &references {
            let Ok(reference) = RemoteRef::parse(raw) else {
                continue;
            };
            if let Err(err) = self.store.pull(&reference, &options.pull) {
                errors.push(anyhow!(err).context(format!("failed to pull {raw}")));
            }
        }
        if let Err(err) = self.store.pull(remote, &options.pull) {
            errors.push(anyhow!(err).context(format!("failed to pull {remote}")));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FetchError { errors }.into())
        }
    }

    /// Resolves a relative reference to the identifier of the commit
    /// reached by walking back `offset` commits from the base.
    pub fn resolve_relative_reference(&self, relative: &RelativeRef) -> Result<Reference> {
        let image = self
            .store
            .lookup_image(relative.base())
            .context("failed to lookup base of relative reference")?;
        let history = image
            .history()
            .context("failed to retrieve history from image")?;

        if relative.offset() >= history.len() {
            return Err(ManagerError::OffsetOutOfBounds {
                offset: relative.offset(),
                history: history.len(),
            }
            .into());
        }

        let entry = &history[relative.offset()];
        if entry.id.is_empty() || entry.id == MISSING_IMAGE_ID {
            return Err(ManagerError::CommitHasNoImage(relative.offset()).into());
        }
        let id = Identifier::parse(&entry.id).context("failed to parse commit identifier")?;

        Ok(match relative.base().name() {
            Some(name) => Reference::Digested {
                name: name.clone(),
                id,
            },
            None => Reference::Id(id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError {
            errors: vec![anyhow!("pull one failed"), anyhow!("pull two failed")],
        };
        assert_eq!(
            err.to_string(),
            "failed to update 2 reference(s): pull one failed; pull two failed"
        );
    }
}
