//! The content-addressed layer store the core depends on.
//!
//! The core never touches blob storage, transport or namespacing directly:
//! everything flows through the [`Store`] trait and the handle traits it
//! hands out. [`LocalStore`] is the crate's shipping backend; tests run
//! against it in ephemeral mode.

mod local;

pub use local::{LocalBuilder, LocalImage, LocalStore, RemoteImageSpec, SeedLayer};

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reference::{LocalRef, Reference, RemoteRef};

/// Failures surfaced by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("no image with id {0}")]
    UnknownImageId(String),
    #[error("remote reference unknown to registry: {0}")]
    RemoteNotFound(String),
    #[error("store is locked by an open diff stream")]
    Busy,
    #[error("command {0:?} exited with {1}")]
    CommandFailed(String, i32),
    #[error("unsupported source {0:?}: only local paths can be added")]
    UnsupportedSource(String),
    #[error("corrupt store state: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One entry of an image's layer history, newest first in a history slice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Image id associated with the layer; empty when no image backs it.
    #[serde(default)]
    pub id: String,
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Registry-style list filter.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Glob over image names, e.g. `*:HEAD` or `docker.io/library/alpine:*`.
    Reference(String),
    /// Exact image id or hex prefix.
    Id(String),
}

/// Transport knobs for pull operations.
#[derive(Debug, Clone)]
pub struct PullOptions {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub quiet: bool,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            quiet: false,
        }
    }
}

/// Options for adding content to a writable layer.
#[derive(Debug, Clone, Default)]
pub struct AddCopyOptions {
    /// Ownership spec applied to added content.
    pub chown: String,
    /// Octal permission spec applied to added content; empty keeps source
    /// modes.
    pub chmod: String,
}

/// Options for running a command in a writable layer.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub quiet: bool,
}

/// Compression applied to a committed layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Uncompressed,
}

/// Options accepted by [`LayerBuilder::commit`].
#[derive(Debug, Clone)]
pub struct BuilderCommitOptions {
    pub compression: Compression,
}

impl Default for BuilderCommitOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Gzip,
        }
    }
}

/// A concrete image resolved from the store.
pub trait ImageHandle {
    /// Content-addressed image id (64 hex chars).
    fn id(&self) -> String;

    /// Names currently bound to the image.
    fn names(&self) -> Vec<String>;

    /// Every name the image has ever held, including removed ones.
    fn names_history(&self) -> Vec<String>;

    /// Layer history, newest first.
    fn history(&self) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Binds a name to this image, removing it from any prior holder.
    fn tag(&self, name: &str) -> Result<(), StoreError>;

    fn untag(&self, name: &str) -> Result<(), StoreError>;

    /// Materializes the image's filesystem and returns the mountpoint.
    fn mount(&self) -> Result<PathBuf, StoreError>;

    fn unmount(&self, force: bool) -> Result<(), StoreError>;
}

/// A writable layer under construction, rooted at some base image.
pub trait LayerBuilder {
    /// Copies local files or directories into the layer at `dest`.
    fn add(
        &mut self,
        dest: &str,
        sources: &[String],
        options: &AddCopyOptions,
    ) -> Result<(), StoreError>;

    /// Runs a command with the mounted layer as its working root.
    fn run(&mut self, command: &[String], options: &RunOptions) -> Result<(), StoreError>;

    fn set_history_comment(&mut self, comment: &str);

    fn set_created_by(&mut self, created_by: &str);

    /// Mounts the working filesystem and returns the mountpoint.
    fn mount(&mut self) -> Result<PathBuf, StoreError>;

    /// Unmounts, folding filesystem changes back into the layer.
    fn unmount(&mut self) -> Result<(), StoreError>;

    /// Commits the layer as a new image bound to `dest`, returning the new
    /// image id.
    fn commit(
        &mut self,
        dest: &LocalRef,
        options: &BuilderCommitOptions,
    ) -> Result<String, StoreError>;

    /// Discards the builder and its working state.
    fn delete(self) -> Result<(), StoreError>;
}

/// The store interface: the core's sole dependency for image state.
///
/// Handles are owned by a single logical operation at a time; the store is
/// responsible for cross-process coordination. Cloning a store clones the
/// handle, not the state.
pub trait Store: Clone {
    type Image: ImageHandle;
    type Builder: LayerBuilder;

    /// Resolves a reference to a concrete image, preferring an exact id
    /// match when the reference is an identifier.
    fn lookup_image(&self, reference: &Reference) -> Result<Self::Image, StoreError>;

    /// Lists images matching every given filter.
    fn list_images(&self, filters: &[Filter]) -> Result<Vec<Self::Image>, StoreError>;

    /// Creates a writable layer rooted at the image `base` resolves to.
    fn builder(&self, base: &LocalRef) -> Result<Self::Builder, StoreError>;

    /// Pulls a remote reference into local storage.
    fn pull(&self, remote: &RemoteRef, options: &PullOptions)
        -> Result<Vec<Self::Image>, StoreError>;

    /// Removes the images the given references resolve to.
    fn remove_images(&self, references: &[Reference]) -> Result<(), StoreError>;

    /// Binds names to an image, removing each from any prior holder.
    fn add_names(&self, image_id: &str, names: &[String]) -> Result<(), StoreError>;

    fn remove_names(&self, image_id: &str, names: &[String]) -> Result<(), StoreError>;

    /// The top layer id of the image with the given id.
    fn image_top_layer(&self, image_id: &str) -> Result<String, StoreError>;

    /// A stream over the filesystem changes between two layers, encoded as a
    /// gzip'd tar with whiteout entries for deletions. The store stays
    /// locked against mutation until the stream is dropped; callers must
    /// fully materialize it before performing any other store operation.
    fn layer_diff(&self, from: &str, to: &str) -> Result<Box<dyn Read + Send>, StoreError>;

    /// Convenience wrapper diffing the layers two commits point at.
    fn diff(
        &self,
        from: &crate::commit::Commit,
        to: &crate::commit::Commit,
    ) -> Result<Box<dyn Read + Send>, StoreError> {
        let from_layer = self.image_top_layer(from.id())?;
        let to_layer = self.image_top_layer(to.id())?;
        self.layer_diff(&from_layer, &to_layer)
    }

    /// True if the reference resolves to an image.
    fn exists(&self, reference: &Reference) -> Result<bool, StoreError> {
        match self.lookup_image(reference) {
            Ok(_) => Ok(true),
            Err(StoreError::ImageNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
