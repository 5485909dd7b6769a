//! Storage backends for snapshot persistence.
//!
//! A [`Directory`] is the minimal file-like surface the snapshot store needs:
//! whole-file atomic writes, deletes, listing, and reads. Filesystem-backed
//! directories additionally support stable-storage barriers through
//! [`DurableDirectory`].
//!
//! Vocabulary note:
//! - `atomic_write` guarantees readers see either the old or the new bytes.
//! - Surviving power loss after success additionally requires `fsync` of the
//!   file and of its parent directory (see [`DurableDirectory::atomic_write_durable`]).

use crate::error::{RankError, RankResult};
use crate::formats::TEMP_SUFFIX;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// `fsync` the file (or directory) at `path`.
///
/// Requires a backend exposing [`Directory::file_path`]; other backends get
/// `NotSupported`.
pub fn sync_file<D: Directory + ?Sized>(dir: &D, path: &str) -> RankResult<()> {
    let Some(p) = dir.file_path(path) else {
        return Err(RankError::NotSupported(
            "sync_file requires Directory::file_path()".into(),
        ));
    };
    let f = std::fs::OpenOptions::new().read(true).open(&p)?;
    f.sync_all()?;
    Ok(())
}

/// `fsync` the parent directory of `path`, making a create or rename durable.
pub fn sync_parent_dir<D: Directory + ?Sized>(dir: &D, path: &str) -> RankResult<()> {
    let Some(p) = dir.file_path(path) else {
        return Err(RankError::NotSupported(
            "sync_parent_dir requires Directory::file_path()".into(),
        ));
    };
    let Some(parent) = p.parent() else {
        return Err(RankError::InvalidConfig(format!(
            "path has no parent directory: {p:?}"
        )));
    };
    let f = std::fs::File::open(parent)?;
    f.sync_all()?;
    Ok(())
}

/// Trait for directory-like storage backends.
pub trait Directory: Send + Sync {
    /// Create a new file for writing (overwriting if it exists).
    fn create_file(&self, path: &str) -> RankResult<Box<dyn Write>>;
    /// Open an existing file for reading.
    fn open_file(&self, path: &str) -> RankResult<Box<dyn Read>>;
    /// Return whether a path exists.
    fn exists(&self, path: &str) -> bool;
    /// Delete a file or directory (directories recursively).
    fn delete(&self, path: &str) -> RankResult<()>;
    /// Atomically rename/move a file.
    fn atomic_rename(&self, from: &str, to: &str) -> RankResult<()>;
    /// Create a directory (and parents if needed).
    fn create_dir_all(&self, path: &str) -> RankResult<()>;
    /// List the direct entries of a directory, sorted by name.
    fn list_dir(&self, path: &str) -> RankResult<Vec<String>>;
    /// Atomically replace the contents of `path` with `data`.
    fn atomic_write(&self, path: &str, data: &[u8]) -> RankResult<()>;
    /// Optional filesystem path for backends that support it.
    fn file_path(&self, path: &str) -> Option<PathBuf>;
}

/// Opt-in stable-storage operations for a `Directory`.
///
/// Default implementations use [`sync_file`] / [`sync_parent_dir`], so they
/// return `NotSupported` on backends without `file_path()`.
pub trait DurableDirectory: Directory {
    /// Make the file at `path` durable on stable storage.
    fn sync_file(&self, path: &str) -> RankResult<()> {
        sync_file(self, path)
    }

    /// Make the *name* of `path` durable (sync the parent directory).
    fn sync_parent_dir(&self, path: &str) -> RankResult<()> {
        sync_parent_dir(self, path)
    }

    /// Write a temp file, `fsync` it, rename it over `path`, then sync the parent.
    fn atomic_write_durable(&self, path: &str, data: &[u8]) -> RankResult<()> {
        if self.file_path(path).is_none() {
            return Err(RankError::NotSupported(
                "atomic_write_durable requires Directory::file_path()".into(),
            ));
        }

        let tmp = format!("{path}{TEMP_SUFFIX}");
        let staged = (|| -> RankResult<()> {
            let mut w = self.create_file(&tmp)?;
            w.write_all(data)?;
            w.flush()?;
            drop(w);
            self.sync_file(&tmp)?;
            self.atomic_rename(&tmp, path)
        })();
        if let Err(e) = staged {
            let _ = self.delete(&tmp);
            return Err(e);
        }

        self.sync_parent_dir(path)
    }
}

impl<T: Directory + ?Sized> DurableDirectory for T {}

/// Filesystem-backed `Directory` rooted at a local path.
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    /// Create (or open) a filesystem directory backend rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> RankResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root path of this backend.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl Directory for FsDirectory {
    fn create_file(&self, path: &str) -> RankResult<Box<dyn Write>> {
        let full_path = self.resolve_path(path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Box::new(std::fs::File::create(full_path)?))
    }

    fn open_file(&self, path: &str) -> RankResult<Box<dyn Read>> {
        let full_path = self.resolve_path(path);
        if !full_path.exists() {
            return Err(RankError::MissingPath(full_path));
        }
        Ok(Box::new(std::fs::File::open(full_path)?))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve_path(path).exists()
    }

    fn delete(&self, path: &str) -> RankResult<()> {
        let full_path = self.resolve_path(path);
        if full_path.is_dir() {
            std::fs::remove_dir_all(full_path)?;
        } else if full_path.exists() {
            std::fs::remove_file(full_path)?;
        }
        Ok(())
    }

    fn atomic_rename(&self, from: &str, to: &str) -> RankResult<()> {
        let to_path = self.resolve_path(to);
        if let Some(parent) = to_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(self.resolve_path(from), to_path)?;
        Ok(())
    }

    fn create_dir_all(&self, path: &str) -> RankResult<()> {
        std::fs::create_dir_all(self.resolve_path(path))?;
        Ok(())
    }

    fn list_dir(&self, path: &str) -> RankResult<Vec<String>> {
        let full_path = self.resolve_path(path);
        if !full_path.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(full_path)? {
            out.push(entry?.file_name().to_string_lossy().into_owned());
        }
        out.sort();
        Ok(out)
    }

    fn atomic_write(&self, path: &str, data: &[u8]) -> RankResult<()> {
        let full_temp_path = self.resolve_path(&format!("{path}{TEMP_SUFFIX}"));
        if let Some(parent) = full_temp_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut temp_file = std::fs::File::create(&full_temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;

        std::fs::rename(&full_temp_path, self.resolve_path(path))?;
        Ok(())
    }

    fn file_path(&self, path: &str) -> Option<PathBuf> {
        Some(self.resolve_path(path))
    }
}

/// In-memory `Directory`, used by tests and benches.
///
/// Directories are implicit: a path "exists" as a directory when some file
/// lives beneath it. Clones share the same file map.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    files: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryDirectory {
    /// Create an empty in-memory directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files currently stored.
    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }
}

fn dir_prefix(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!("{}/", path.trim_end_matches('/'))
    }
}

impl Directory for MemoryDirectory {
    fn create_file(&self, path: &str) -> RankResult<Box<dyn Write>> {
        self.files.write().insert(path.to_string(), Vec::new());
        Ok(Box::new(MemoryInPlaceWriter {
            files: self.files.clone(),
            path: path.to_string(),
        }))
    }

    fn open_file(&self, path: &str) -> RankResult<Box<dyn Read>> {
        let data = self
            .files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| RankError::MissingPath(PathBuf::from(path)))?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    fn exists(&self, path: &str) -> bool {
        let files = self.files.read();
        if files.contains_key(path) {
            return true;
        }
        let prefix = dir_prefix(path);
        files.keys().any(|k| k.starts_with(&prefix))
    }

    fn delete(&self, path: &str) -> RankResult<()> {
        let mut files = self.files.write();
        files.remove(path);
        let prefix = dir_prefix(path);
        files.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }

    fn atomic_rename(&self, from: &str, to: &str) -> RankResult<()> {
        let mut files = self.files.write();
        if let Some(data) = files.remove(from) {
            files.insert(to.to_string(), data);
        }
        Ok(())
    }

    fn create_dir_all(&self, _path: &str) -> RankResult<()> {
        Ok(())
    }

    fn list_dir(&self, path: &str) -> RankResult<Vec<String>> {
        let prefix = dir_prefix(path);
        let files = self.files.read();
        let mut out: Vec<String> = files
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(|rest| rest.split('/').next().unwrap_or(rest).to_string())
            .collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    fn atomic_write(&self, path: &str, data: &[u8]) -> RankResult<()> {
        self.files.write().insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn file_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }
}

struct MemoryInPlaceWriter {
    files: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    path: String,
}

impl Write for MemoryInPlaceWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.files
            .write()
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
