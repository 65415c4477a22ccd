//! Layer diff streams: full materialization and whiteout-aware application.
//!
//! A diff between two layers travels as a gzip'd tar archive. Regular
//! entries carry added or modified files; deletions travel as overlay-style
//! whiteout markers (`.wh.<name>`, with `.wh..wh..opq` hiding a directory's
//! whole contents). The store holds a lock while a diff stream is open, so
//! [`LayerDiff::from_reader`] drains the stream into memory up front and the
//! caller applies it afterwards.

use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder, EntryType, Header};

/// Marker prefix of a whiteout entry.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Marker hiding the entire contents of its directory.
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// A fully materialized layer diff.
pub struct LayerDiff {
    data: Vec<u8>,
}

impl LayerDiff {
    /// Drains the stream into memory. The source stream is dropped by the
    /// caller afterwards, releasing the store's diff lock.
    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .context("failed to materialize diff stream")?;

        Ok(LayerDiff { data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Applies the diff onto a mounted filesystem root: whiteout entries
    /// delete their targets, everything else unpacks in place.
    pub fn apply_to(&self, root: &Path) -> Result<()> {
        let mut archive = Archive::new(GzDecoder::new(&self.data[..]));
        archive.set_preserve_permissions(true);

        for entry in archive
            .entries()
            .context("failed to read diff archive entries")?
        {
            let mut entry = entry.context("failed to read diff archive entry")?;
            let path = entry.path().context("diff entry has invalid path")?.into_owned();

            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let parent = path.parent().unwrap_or_else(|| Path::new(""));

            if file_name == OPAQUE_WHITEOUT {
                clear_directory(&root.join(parent))?;
                continue;
            }
            if let Some(hidden) = file_name.strip_prefix(WHITEOUT_PREFIX) {
                remove_entry(&root.join(parent).join(hidden))?;
                continue;
            }

            entry
                .unpack_in(root)
                .with_context(|| format!("failed to unpack diff entry {:?}", path))?;
        }

        Ok(())
    }
}

/// Removes a file or directory tree if present.
fn remove_entry(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if path.is_dir() && !path.is_symlink() {
        fs::remove_dir_all(path).with_context(|| format!("failed to remove directory {:?}", path))
    } else {
        fs::remove_file(path).with_context(|| format!("failed to remove file {:?}", path))
    }
}

/// Removes the contents of a directory, keeping the directory itself.
fn clear_directory(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read directory {:?}", dir))? {
        remove_entry(&entry?.path())?;
    }

    Ok(())
}

/// Incrementally builds the wire form of a layer diff.
pub struct DiffBuilder {
    archive: Builder<GzEncoder<Vec<u8>>>,
}

impl DiffBuilder {
    pub fn new() -> Self {
        let encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        DiffBuilder {
            archive: Builder::new(encoder),
        }
    }

    /// Appends an added or modified file.
    pub fn append_file(&mut self, path: &str, mode: u32, data: &[u8]) -> Result<()> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(mode);
        header.set_cksum();
        self.archive
            .append_data(&mut header, path.trim_start_matches('/'), data)
            .with_context(|| format!("failed to append diff entry {:?}", path))
    }

    /// Appends a whiteout marker deleting `path`.
    pub fn append_whiteout(&mut self, path: &str) -> Result<()> {
        let path = Path::new(path.trim_start_matches('/'));
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let marker = path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(format!("{WHITEOUT_PREFIX}{name}"));

        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(0);
        header.set_mode(0o644);
        header.set_cksum();
        self.archive
            .append_data(&mut header, marker, std::io::empty())
            .with_context(|| format!("failed to append whiteout entry {:?}", path))
    }

    /// Finalizes the archive and returns the gzip'd bytes.
    pub fn finish(self) -> Result<Vec<u8>> {
        let encoder = self
            .archive
            .into_inner()
            .context("failed to finalize diff archive")?;
        encoder.finish().context("failed to finalize diff compression")
    }
}

impl Default for DiffBuilder {
    fn default() -> Self {
        Self::new()
    }
}
