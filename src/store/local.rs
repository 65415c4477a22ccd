//! A self-contained store backend with a JSON-persisted index.
//!
//! Image metadata lives in an in-memory index saved to `state.json` under
//! the store root; each layer is a full rootfs snapshot keyed by a content
//! digest. Pulls resolve against a seedable registry section of the same
//! state, which stands in for remote transport. Mounts and builder
//! workspaces materialize snapshots into real directories, so commands run
//! against actual files.
//!
//! The backend targets correctness of the repository semantics, not storage
//! efficiency: snapshots are not deduplicated beyond content addressing.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::diff::DiffBuilder;
use crate::reference::{LocalRef, Reference, RemoteRef};

use super::{
    AddCopyOptions, BuilderCommitOptions, Filter, HistoryEntry, ImageHandle, LayerBuilder,
    PullOptions, RunOptions, Store, StoreError,
};

const STATE_FILE: &str = "state.json";
const DEFAULT_FILE_MODE: u32 = 0o644;

/// A rootfs snapshot: path → file entry, paths rooted at `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct LayerFs {
    files: BTreeMap<String, FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FileEntry {
    mode: u32,
    data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageRecord {
    id: String,
    names: Vec<String>,
    names_history: Vec<String>,
    top_layer: String,
    created: DateTime<Utc>,
    /// Newest first. Tags are filled in dynamically on read.
    history: Vec<HistoryEntry>,
}

/// Persisted store state.
#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    images: Vec<ImageRecord>,
    layers: BTreeMap<String, LayerFs>,
    /// Remote reference string → pullable image, standing in for transport.
    #[serde(default)]
    registry: BTreeMap<String, RemoteImageSpec>,
}

#[derive(Debug, Default)]
struct Runtime {
    open_diffs: usize,
    mounts: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Default)]
struct Inner {
    state: State,
    runtime: Runtime,
}

/// One layer of a seedable remote image. Layers are listed oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedLayer {
    pub created_by: String,
    pub comment: String,
    /// Files added or replaced by this layer: path, mode, contents.
    pub files: Vec<(String, u32, Vec<u8>)>,
}

/// A pullable image registered with the store's registry section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteImageSpec {
    pub layers: Vec<SeedLayer>,
}

impl RemoteImageSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer; files are `(path, contents)` pairs with default
    /// permissions.
    pub fn layer(mut self, created_by: &str, comment: &str, files: &[(&str, &[u8])]) -> Self {
        self.layers.push(SeedLayer {
            created_by: created_by.to_string(),
            comment: comment.to_string(),
            files: files
                .iter()
                .map(|(path, data)| (path.to_string(), DEFAULT_FILE_MODE, data.to_vec()))
                .collect(),
        });
        self
    }
}

/// The crate's shipping [`Store`] backend.
#[derive(Clone)]
#[derive(Debug)]
pub struct LocalStore {
    inner: Arc<Mutex<Inner>>,
    root: PathBuf,
    persist: bool,
    _workdir: Option<Arc<TempDir>>,
}

impl LocalStore {
    /// Opens (or initializes) a store rooted at `root`, loading any
    /// persisted state.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(root)?;
        let state_path = root.join(STATE_FILE);
        let state = if state_path.exists() {
            let raw = fs::read_to_string(&state_path)?;
            serde_json::from_str(&raw)
                .map_err(|err| StoreError::Corrupt(format!("{}: {err}", state_path.display())))?
        } else {
            State::default()
        };

        Ok(LocalStore {
            inner: Arc::new(Mutex::new(Inner {
                state,
                runtime: Runtime::default(),
            })),
            root: root.to_path_buf(),
            persist: true,
            _workdir: None,
        })
    }

    /// An in-memory store over a temporary directory, discarded on drop.
    pub fn ephemeral() -> Result<Self, StoreError> {
        let workdir = TempDir::new()?;
        Ok(LocalStore {
            inner: Arc::new(Mutex::new(Inner::default())),
            root: workdir.path().to_path_buf(),
            persist: false,
            _workdir: Some(Arc::new(workdir)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Registers a pullable image under the given remote reference.
    pub fn seed_remote(&self, reference: &RemoteRef, spec: RemoteImageSpec) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.state.registry.insert(reference.to_string(), spec);
        self.save_state(&inner.state)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock means a writer panicked mid-operation; the state
        // is still the last consistent snapshot for this toy backend.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn save_state(&self, state: &State) -> Result<(), StoreError> {
        if !self.persist {
            return Ok(());
        }
        let raw = serde_json::to_string(state)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        fs::write(self.root.join(STATE_FILE), raw)?;

        Ok(())
    }

    fn ensure_unlocked(inner: &Inner) -> Result<(), StoreError> {
        if inner.runtime.open_diffs > 0 {
            return Err(StoreError::Busy);
        }
        Ok(())
    }

    fn handle(&self, id: &str) -> LocalImage {
        LocalImage {
            store: self.clone(),
            id: id.to_string(),
        }
    }

    /// Instantiates a registry image into local storage and binds `name` to
    /// it. Re-pulling an existing image only rebinds the name.
    fn materialize_remote(
        &self,
        inner: &mut Inner,
        name: &str,
        spec: &RemoteImageSpec,
    ) -> Result<String, StoreError> {
        let mut snapshot = LayerFs::default();
        let mut layer_ids = Vec::with_capacity(spec.layers.len());
        let mut sizes = Vec::with_capacity(spec.layers.len());
        for layer in &spec.layers {
            let mut size = 0i64;
            for (path, mode, data) in &layer.files {
                size += data.len() as i64;
                snapshot.files.insert(
                    normalize_path(path),
                    FileEntry {
                        mode: *mode,
                        data: data.clone(),
                    },
                );
            }
            layer_ids.push(layer_digest(&snapshot));
            sizes.push(size);
        }

        let image_id = {
            let mut hasher = Sha256::new();
            for (layer, layer_id) in spec.layers.iter().zip(&layer_ids) {
                hasher.update(layer_id.as_bytes());
                hasher.update(layer.created_by.as_bytes());
                hasher.update(layer.comment.as_bytes());
            }
            hex_digest(hasher)
        };

        if !inner.state.images.iter().any(|image| image.id == image_id) {
            let top_layer = layer_ids.last().cloned().unwrap_or_default();
            for (layer_id, files) in layer_ids.iter().zip(layer_snapshots(spec)) {
                inner.state.layers.entry(layer_id.clone()).or_insert(files);
            }

            let last = spec.layers.len().saturating_sub(1);
            let history = spec
                .layers
                .iter()
                .enumerate()
                .rev()
                .map(|(i, layer)| HistoryEntry {
                    // Only the top layer is backed by a local image; the
                    // rest are "missing" as after a registry pull.
                    id: if i == last { image_id.clone() } else { String::new() },
                    created: Some(Utc::now()),
                    created_by: layer.created_by.clone(),
                    size: sizes[i],
                    comment: layer.comment.clone(),
                    tags: Vec::new(),
                })
                .collect();

            inner.state.images.push(ImageRecord {
                id: image_id.clone(),
                names: Vec::new(),
                names_history: Vec::new(),
                top_layer,
                created: Utc::now(),
                history,
            });
        }

        move_name(&mut inner.state, name, &image_id);

        Ok(image_id)
    }

    fn find_image<'a>(state: &'a State, reference: &Reference) -> Option<&'a ImageRecord> {
        match reference {
            Reference::Tagged { .. } => {
                let name = reference.to_string();
                state.images.iter().find(|image| image.names.contains(&name))
            }
            Reference::Digested { id, .. } | Reference::Id(id) => {
                let hex = id.as_hex();
                state
                    .images
                    .iter()
                    .find(|image| image.id == hex)
                    .or_else(|| state.images.iter().find(|image| image.id.starts_with(hex)))
            }
        }
    }
}

/// Binds a name to the image with `target_id`, removing it from any other
/// holder. Every holder, past and present, keeps the name in its
/// names-history.
fn move_name(state: &mut State, name: &str, target_id: &str) {
    for image in &mut state.images {
        if image.id != target_id {
            image.names.retain(|n| n != name);
        }
    }
    if let Some(image) = state.images.iter_mut().find(|image| image.id == target_id) {
        if !image.names.iter().any(|n| n == name) {
            image.names.push(name.to_string());
        }
        if !image.names_history.iter().any(|n| n == name) {
            image.names_history.push(name.to_string());
        }
    }
}

fn layer_snapshots(spec: &RemoteImageSpec) -> Vec<LayerFs> {
    let mut snapshots = Vec::with_capacity(spec.layers.len());
    let mut cumulative = LayerFs::default();
    for layer in &spec.layers {
        for (path, mode, data) in &layer.files {
            cumulative.files.insert(
                normalize_path(path),
                FileEntry {
                    mode: *mode,
                    data: data.clone(),
                },
            );
        }
        snapshots.push(cumulative.clone());
    }
    snapshots
}

fn normalize_path(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn layer_digest(fs: &LayerFs) -> String {
    let mut hasher = Sha256::new();
    for (path, entry) in &fs.files {
        hasher.update(path.as_bytes());
        hasher.update(entry.mode.to_le_bytes());
        hasher.update((entry.data.len() as u64).to_le_bytes());
        hasher.update(&entry.data);
    }
    hex_digest(hasher)
}

/// Extracts the tag component of a printed reference, if any.
fn tag_of(name: &str) -> Option<String> {
    if name.contains('@') {
        return None;
    }
    let after_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    name[after_slash..]
        .split_once(':')
        .map(|(_, tag)| tag.to_string())
}

fn glob_match(pattern: &str, text: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == text,
        Some((prefix, rest)) => {
            if !text.starts_with(prefix) {
                return false;
            }
            let text = &text[prefix.len()..];
            (0..=text.len()).any(|i| glob_match(rest, &text[i..]))
        }
    }
}

/// Materializes a snapshot into a directory.
fn materialize(fs_map: &LayerFs, root: &Path) -> Result<(), StoreError> {
    for (path, entry) in &fs_map.files {
        let target = root.join(path.trim_start_matches('/'));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &entry.data)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(entry.mode))?;
        }
    }

    Ok(())
}

/// Rescans a directory back into a snapshot.
fn scan_directory(root: &Path) -> Result<LayerFs, StoreError> {
    let mut fs_map = LayerFs::default();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|err| StoreError::Corrupt(err.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        let mode = file_mode(entry.path())?;
        let data = fs::read(entry.path())?;
        fs_map.files.insert(
            normalize_path(&rel.to_string_lossy()),
            FileEntry { mode, data },
        );
    }

    Ok(fs_map)
}

fn file_mode(path: &Path) -> Result<u32, StoreError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Ok(fs::metadata(path)?.permissions().mode() & 0o7777)
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(DEFAULT_FILE_MODE)
    }
}

impl Store for LocalStore {
    type Image = LocalImage;
    type Builder = LocalBuilder;

    fn lookup_image(&self, reference: &Reference) -> Result<LocalImage, StoreError> {
        let inner = self.lock();
        let record = Self::find_image(&inner.state, reference)
            .ok_or_else(|| StoreError::ImageNotFound(reference.to_string()))?;
        let id = record.id.clone();
        drop(inner);

        Ok(self.handle(&id))
    }

    fn list_images(&self, filters: &[Filter]) -> Result<Vec<LocalImage>, StoreError> {
        let inner = self.lock();
        let ids: Vec<String> = inner
            .state
            .images
            .iter()
            .filter(|image| {
                filters.iter().all(|filter| match filter {
                    Filter::Reference(pattern) => {
                        image.names.iter().any(|name| glob_match(pattern, name))
                    }
                    Filter::Id(hex) => image.id.starts_with(hex.as_str()),
                })
            })
            .map(|image| image.id.clone())
            .collect();
        drop(inner);

        Ok(ids.iter().map(|id| self.handle(id)).collect())
    }

    fn builder(&self, base: &LocalRef) -> Result<LocalBuilder, StoreError> {
        let inner = self.lock();
        let record = Self::find_image(&inner.state, &Reference::from(base.clone()))
            .ok_or_else(|| StoreError::ImageNotFound(base.to_string()))?;
        let base_id = record.id.clone();
        let fs_map = inner
            .state
            .layers
            .get(&record.top_layer)
            .cloned()
            .unwrap_or_default();
        let history = record.history.clone();
        drop(inner);

        Ok(LocalBuilder {
            store: self.clone(),
            base_id,
            base_fs: fs_map.clone(),
            fs: fs_map,
            base_history: history,
            created_by: String::new(),
            comment: String::new(),
            workspace: None,
        })
    }

    fn pull(
        &self,
        remote: &RemoteRef,
        options: &PullOptions,
    ) -> Result<Vec<LocalImage>, StoreError> {
        let _ = options; // the in-process registry has no transient failures
        let name = remote.to_string();

        let mut inner = self.lock();
        Self::ensure_unlocked(&inner)?;
        let spec = inner
            .state
            .registry
            .get(&name)
            .cloned()
            .ok_or_else(|| StoreError::RemoteNotFound(name.clone()))?;
        let id = self.materialize_remote(&mut inner, &name, &spec)?;
        self.save_state(&inner.state)?;
        drop(inner);

        Ok(vec![self.handle(&id)])
    }

    fn remove_images(&self, references: &[Reference]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        Self::ensure_unlocked(&inner)?;
        for reference in references {
            let id = Self::find_image(&inner.state, reference)
                .ok_or_else(|| StoreError::ImageNotFound(reference.to_string()))?
                .id
                .clone();
            inner.state.images.retain(|image| image.id != id);
        }
        self.save_state(&inner.state)
    }

    fn add_names(&self, image_id: &str, names: &[String]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        Self::ensure_unlocked(&inner)?;
        if !inner.state.images.iter().any(|image| image.id == image_id) {
            return Err(StoreError::UnknownImageId(image_id.to_string()));
        }
        for name in names {
            move_name(&mut inner.state, name, image_id);
        }
        self.save_state(&inner.state)
    }

    fn remove_names(&self, image_id: &str, names: &[String]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        Self::ensure_unlocked(&inner)?;
        let image = inner
            .state
            .images
            .iter_mut()
            .find(|image| image.id == image_id)
            .ok_or_else(|| StoreError::UnknownImageId(image_id.to_string()))?;
        image.names.retain(|name| !names.contains(name));
        self.save_state(&inner.state)
    }

    fn image_top_layer(&self, image_id: &str) -> Result<String, StoreError> {
        let inner = self.lock();
        inner
            .state
            .images
            .iter()
            .find(|image| image.id == image_id)
            .map(|image| image.top_layer.clone())
            .ok_or_else(|| StoreError::UnknownImageId(image_id.to_string()))
    }

    fn layer_diff(&self, from: &str, to: &str) -> Result<Box<dyn Read + Send>, StoreError> {
        let mut inner = self.lock();
        let missing = |layer: &str| StoreError::Corrupt(format!("unknown layer {layer}"));
        let from_fs = inner.state.layers.get(from).ok_or_else(|| missing(from))?;
        let to_fs = inner.state.layers.get(to).ok_or_else(|| missing(to))?;

        let mut builder = DiffBuilder::new();
        for (path, entry) in &to_fs.files {
            if from_fs.files.get(path) != Some(entry) {
                builder
                    .append_file(path, entry.mode, &entry.data)
                    .map_err(|err| StoreError::Corrupt(err.to_string()))?;
            }
        }
        for path in from_fs.files.keys() {
            if !to_fs.files.contains_key(path) {
                builder
                    .append_whiteout(path)
                    .map_err(|err| StoreError::Corrupt(err.to_string()))?;
            }
        }
        let data = builder
            .finish()
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;

        inner.runtime.open_diffs += 1;
        Ok(Box::new(DiffStream {
            data: Cursor::new(data),
            _guard: DiffGuard {
                inner: Arc::clone(&self.inner),
            },
        }))
    }
}

/// A diff stream holding the store's diff lock until dropped.
struct DiffStream {
    data: Cursor<Vec<u8>>,
    _guard: DiffGuard,
}

impl Read for DiffStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.data.read(buf)
    }
}

struct DiffGuard {
    inner: Arc<Mutex<Inner>>,
}

impl Drop for DiffGuard {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.runtime.open_diffs = inner.runtime.open_diffs.saturating_sub(1);
    }
}

/// Handle to one image in a [`LocalStore`].
#[derive(Debug, Clone)]
pub struct LocalImage {
    store: LocalStore,
    id: String,
}

impl LocalImage {
    /// Conventional mountpoint of this image under the store root.
    fn mountpoint(&self) -> PathBuf {
        let short = &self.id[..self.id.len().min(12)];
        self.store.root.join("mounts").join(short)
    }

    fn with_record<T>(&self, f: impl FnOnce(&ImageRecord) -> T) -> Option<T> {
        let inner = self.store.lock();
        inner
            .state
            .images
            .iter()
            .find(|image| image.id == self.id)
            .map(f)
    }
}

impl ImageHandle for LocalImage {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn names(&self) -> Vec<String> {
        self.with_record(|record| record.names.clone()).unwrap_or_default()
    }

    fn names_history(&self) -> Vec<String> {
        self.with_record(|record| record.names_history.clone())
            .unwrap_or_default()
    }

    fn history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        let inner = self.store.lock();
        let record = inner
            .state
            .images
            .iter()
            .find(|image| image.id == self.id)
            .ok_or_else(|| StoreError::UnknownImageId(self.id.clone()))?;

        // Fill each entry's tags from the current names of the image
        // backing it.
        let history = record
            .history
            .iter()
            .map(|entry| {
                let mut entry = entry.clone();
                if !entry.id.is_empty() {
                    if let Some(image) =
                        inner.state.images.iter().find(|image| image.id == entry.id)
                    {
                        entry.tags = image.names.iter().filter_map(|n| tag_of(n)).collect();
                    }
                }
                entry
            })
            .collect();

        Ok(history)
    }

    fn tag(&self, name: &str) -> Result<(), StoreError> {
        self.store.add_names(&self.id, &[name.to_string()])
    }

    fn untag(&self, name: &str) -> Result<(), StoreError> {
        self.store.remove_names(&self.id, &[name.to_string()])
    }

    fn mount(&self) -> Result<PathBuf, StoreError> {
        let mut inner = self.store.lock();
        if let Some(path) = inner.runtime.mounts.get(&self.id) {
            return Ok(path.clone());
        }

        let record = inner
            .state
            .images
            .iter()
            .find(|image| image.id == self.id)
            .ok_or_else(|| StoreError::UnknownImageId(self.id.clone()))?;
        let fs_map = inner
            .state
            .layers
            .get(&record.top_layer)
            .cloned()
            .unwrap_or_default();

        let mountpoint = self.mountpoint();
        if mountpoint.exists() {
            fs::remove_dir_all(&mountpoint)?;
        }
        fs::create_dir_all(&mountpoint)?;
        materialize(&fs_map, &mountpoint)?;
        inner.runtime.mounts.insert(self.id.clone(), mountpoint.clone());

        Ok(mountpoint)
    }

    fn unmount(&self, _force: bool) -> Result<(), StoreError> {
        let mut inner = self.store.lock();
        // Fall back to the conventional mountpoint so an unmount from a
        // fresh process still cleans up.
        let path = inner
            .runtime
            .mounts
            .remove(&self.id)
            .unwrap_or_else(|| self.mountpoint());
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }

        Ok(())
    }
}

/// A writable layer over a [`LocalStore`] image.
pub struct LocalBuilder {
    store: LocalStore,
    base_id: String,
    base_fs: LayerFs,
    fs: LayerFs,
    base_history: Vec<HistoryEntry>,
    created_by: String,
    comment: String,
    workspace: Option<(TempDir, PathBuf)>,
}

impl LocalBuilder {
    /// Destination path for one added source inside the layer.
    fn dest_path(dest: &str, source: &Path, multiple: bool) -> String {
        let treat_as_dir = multiple || dest.ends_with('/') || dest == "/";
        if treat_as_dir {
            let file_name = source
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            format!("{}/{}", dest.trim_end_matches('/'), file_name)
        } else {
            dest.to_string()
        }
    }

    fn insert_file(&mut self, path: String, mode: u32, data: Vec<u8>) {
        self.fs.files.insert(normalize_path(&path), FileEntry { mode, data });
    }

    fn fold_workspace(&mut self) -> Result<(), StoreError> {
        if let Some((_, path)) = &self.workspace {
            self.fs = scan_directory(&path.clone())?;
        }
        self.workspace = None;

        Ok(())
    }
}

impl LayerBuilder for LocalBuilder {
    fn add(
        &mut self,
        dest: &str,
        sources: &[String],
        options: &AddCopyOptions,
    ) -> Result<(), StoreError> {
        let chmod = if options.chmod.is_empty() {
            None
        } else {
            Some(
                u32::from_str_radix(&options.chmod, 8)
                    .map_err(|_| StoreError::Corrupt(format!("invalid chmod {:?}", options.chmod)))?,
            )
        };

        let multiple = sources.len() > 1;
        for source in sources {
            if source.contains("://") {
                return Err(StoreError::UnsupportedSource(source.clone()));
            }
            let source = Path::new(source);
            if source.is_dir() {
                for entry in WalkDir::new(source).follow_links(false) {
                    let entry = entry.map_err(|err| StoreError::Corrupt(err.to_string()))?;
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let rel = entry
                        .path()
                        .strip_prefix(source)
                        .map_err(|err| StoreError::Corrupt(err.to_string()))?;
                    let mode = chmod.unwrap_or(file_mode(entry.path())?);
                    let data = fs::read(entry.path())?;
                    let target =
                        format!("{}/{}", dest.trim_end_matches('/'), rel.to_string_lossy());
                    self.insert_file(target, mode, data);
                }
            } else {
                let mode = chmod.unwrap_or(file_mode(source)?);
                let data = fs::read(source)?;
                let target = Self::dest_path(dest, source, multiple);
                self.insert_file(target, mode, data);
            }
        }

        Ok(())
    }

    fn run(&mut self, command: &[String], options: &RunOptions) -> Result<(), StoreError> {
        let Some((program, args)) = command.split_first() else {
            return Err(StoreError::Corrupt("empty command".to_string()));
        };

        let mountpoint = self.mount()?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&mountpoint);
        if options.quiet {
            cmd.stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null());
        }
        let status = cmd.status()?;
        self.unmount()?;

        if !status.success() {
            return Err(StoreError::CommandFailed(
                command.join(" "),
                status.code().unwrap_or(-1),
            ));
        }

        Ok(())
    }

    fn set_history_comment(&mut self, comment: &str) {
        self.comment = comment.to_string();
    }

    fn set_created_by(&mut self, created_by: &str) {
        self.created_by = created_by.to_string();
    }

    fn mount(&mut self) -> Result<PathBuf, StoreError> {
        if let Some((_, path)) = &self.workspace {
            return Ok(path.clone());
        }
        let workdir = TempDir::new_in(&self.store.root)?;
        let path = workdir.path().to_path_buf();
        materialize(&self.fs, &path)?;
        self.workspace = Some((workdir, path.clone()));

        Ok(path)
    }

    fn unmount(&mut self) -> Result<(), StoreError> {
        self.fold_workspace()
    }

    fn commit(
        &mut self,
        dest: &LocalRef,
        options: &BuilderCommitOptions,
    ) -> Result<String, StoreError> {
        let _ = options; // snapshots are stored uncompressed either way
        self.fold_workspace()?;

        let layer_id = layer_digest(&self.fs);
        let image_id = {
            let mut hasher = Sha256::new();
            hasher.update(self.base_id.as_bytes());
            hasher.update(layer_id.as_bytes());
            hasher.update(self.created_by.as_bytes());
            hasher.update(self.comment.as_bytes());
            hex_digest(hasher)
        };

        let size: i64 = self
            .fs
            .files
            .iter()
            .filter(|(path, entry)| self.base_fs.files.get(*path) != Some(*entry))
            .map(|(_, entry)| entry.data.len() as i64)
            .sum();

        // Like the build tools this models, the stored comment gains a
        // `FROM` line naming the base.
        let comment = format!("{}FROM {}", self.comment, &self.base_id[..self.base_id.len().min(12)]);

        let mut history = Vec::with_capacity(self.base_history.len() + 1);
        history.push(HistoryEntry {
            id: image_id.clone(),
            created: Some(Utc::now()),
            created_by: self.created_by.clone(),
            size,
            comment,
            tags: Vec::new(),
        });
        history.extend(self.base_history.iter().cloned());

        let mut inner = self.store.lock();
        LocalStore::ensure_unlocked(&inner)?;
        inner
            .state
            .layers
            .entry(layer_id.clone())
            .or_insert_with(|| self.fs.clone());
        if !inner.state.images.iter().any(|image| image.id == image_id) {
            inner.state.images.push(ImageRecord {
                id: image_id.clone(),
                names: Vec::new(),
                names_history: Vec::new(),
                top_layer: layer_id,
                created: Utc::now(),
                history,
            });
        }
        move_name(&mut inner.state, &dest.to_string(), &image_id);
        self.store.save_state(&inner.state)?;

        Ok(image_id)
    }

    fn delete(mut self) -> Result<(), StoreError> {
        self.workspace = None;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::Name;

    fn seeded_store() -> (LocalStore, RemoteRef) {
        let store = LocalStore::ephemeral().unwrap();
        let remote = RemoteRef::parse("alpine:latest").unwrap();
        store
            .seed_remote(
                &remote,
                RemoteImageSpec::new()
                    .layer("/bin/sh -c #(nop) ADD file:base in / ", "", &[
                        ("/bin/sh", b"#!"),
                        ("/etc/os-release", b"alpine"),
                    ])
                    .layer("/bin/sh -c #(nop)  CMD [\"/bin/sh\"]", "", &[]),
            )
            .unwrap();
        (store, remote)
    }

    #[test]
    fn test_pull_and_lookup() {
        let (store, remote) = seeded_store();
        let images = store.pull(&remote, &PullOptions::default()).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].names(), vec!["docker.io/library/alpine:latest"]);

        let found = store
            .lookup_image(&Reference::from(remote.clone()))
            .unwrap();
        assert_eq!(found.id(), images[0].id());
    }

    #[test]
    fn test_pull_unknown_remote() {
        let store = LocalStore::ephemeral().unwrap();
        let remote = RemoteRef::parse("nosuch:latest").unwrap();
        let err = store.pull(&remote, &PullOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::RemoteNotFound(_)));
    }

    #[test]
    fn test_history_marks_lower_layers_missing() {
        let (store, remote) = seeded_store();
        let image = store.pull(&remote, &PullOptions::default()).unwrap().remove(0);
        let history = image.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, image.id());
        assert_eq!(history[1].id, "");
    }

    #[test]
    fn test_add_names_moves_ownership() {
        let (store, remote) = seeded_store();
        let image = store.pull(&remote, &PullOptions::default()).unwrap().remove(0);

        let name = Name::parse("alpine").unwrap();
        let head = LocalRef::head(name).to_string();
        store.add_names(&image.id(), &[head.clone()]).unwrap();
        assert!(image.names().contains(&head));

        // Committing a new image with the same name steals it.
        let mut builder = store
            .builder(&LocalRef::parse("alpine:HEAD").unwrap())
            .unwrap();
        builder.set_created_by("/bin/sh -c #(ocitree) EXEC [\"true\"]");
        builder.set_history_comment("noop\n");
        let new_id = builder
            .commit(&LocalRef::parse("alpine:HEAD").unwrap(), &Default::default())
            .unwrap();
        builder.delete().unwrap();

        assert!(!image.names().contains(&head));
        assert!(image.names_history().contains(&head));
        let new_image = store
            .lookup_image(&Reference::parse_with_default(
                "alpine",
                crate::reference::Tag::head(),
                crate::reference::Component::LocalReference,
            )
            .unwrap())
            .unwrap();
        assert_eq!(new_image.id(), new_id);
    }

    #[test]
    fn test_builder_add_and_commit_grows_history() {
        let (store, remote) = seeded_store();
        let image = store.pull(&remote, &PullOptions::default()).unwrap().remove(0);
        let head = LocalRef::parse("alpine:HEAD").unwrap();
        store.add_names(&image.id(), &[head.to_string()]).unwrap();

        let payload = tempfile::NamedTempFile::new().unwrap();
        fs::write(payload.path(), b"payload").unwrap();

        let mut builder = store.builder(&head).unwrap();
        builder
            .add(
                "/payload",
                &[payload.path().to_string_lossy().to_string()],
                &AddCopyOptions::default(),
            )
            .unwrap();
        builder.set_created_by("/bin/sh -c #(ocitree) ADD ...");
        builder.set_history_comment("add payload\n");
        builder.commit(&head, &Default::default()).unwrap();
        builder.delete().unwrap();

        let new_image = store.lookup_image(&Reference::from(head.clone())).unwrap();
        let history = new_image.history().unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[0].comment.starts_with("add payload\nFROM "));

        let mounted = new_image.mount().unwrap();
        assert_eq!(fs::read(mounted.join("payload")).unwrap(), b"payload");
        new_image.unmount(true).unwrap();
    }

    #[test]
    fn test_layer_diff_locks_store() {
        let (store, remote) = seeded_store();
        let image = store.pull(&remote, &PullOptions::default()).unwrap().remove(0);
        let top = store.image_top_layer(&image.id()).unwrap();

        let stream = store.layer_diff(&top, &top).unwrap();
        let err = store.add_names(&image.id(), &["x:y".to_string()]).unwrap_err();
        assert!(matches!(err, StoreError::Busy));

        drop(stream);
        store
            .add_names(&image.id(), &["docker.io/library/alpine:edge".to_string()])
            .unwrap();
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*:HEAD", "docker.io/library/alpine:HEAD"));
        assert!(glob_match("docker.io/library/alpine:*", "docker.io/library/alpine:latest"));
        assert!(!glob_match("*:HEAD", "docker.io/library/alpine:latest"));
        assert!(glob_match("*", "anything"));
        assert!(!glob_match("a*b", "acd"));
    }

    #[test]
    fn test_tag_of() {
        assert_eq!(tag_of("docker.io/library/alpine:HEAD"), Some("HEAD".into()));
        assert_eq!(tag_of("localhost:5000/img:v1"), Some("v1".into()));
        assert_eq!(tag_of("docker.io/library/alpine"), None);
        assert_eq!(tag_of("docker.io/library/alpine@sha256:abcd"), None);
    }
}
