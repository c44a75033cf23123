use crate::{StoreError, StoreResult, io_error, unavailable};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    ffi::OsStr,
    fmt,
    fs::{self, File},
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

/// Suffix carried by every in-flight temporary file.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Filesystem-backed record store rooted at a storage directory.
///
/// Records are addressed by paths relative to the root. The store keeps no
/// in-memory state, so any number of handles (in any number of processes) can
/// point at the same root.
#[derive(Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl fmt::Debug for FsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsStore").field("root", &self.root).finish()
    }
}

impl FsStore {
    /// Open a store for writing, creating the root directory if needed.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| unavailable(&root, e))?;
        Ok(Self { root })
    }

    /// Handle on a root without touching the filesystem. Used by read-only
    /// consumers that must not create anything.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join(rel)
    }

    pub fn ensure_dir(&self, rel: impl AsRef<Path>) -> StoreResult<PathBuf> {
        let dir = self.resolve(rel);
        fs::create_dir_all(&dir).map_err(|e| unavailable(&dir, e))?;
        Ok(dir)
    }

    /// Serialize `value` into a synced temporary file next to `rel`. Nothing is
    /// visible at `rel` until [`StagedRecord::commit`].
    pub fn stage<T: Serialize>(&self, rel: impl AsRef<Path>, value: &T) -> StoreResult<StagedRecord> {
        let path = self.resolve(rel);
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Encode {
            path: path.clone(),
            source,
        })?;
        stage_bytes(&path, &bytes)
    }

    /// Atomically replace the record at `rel`.
    pub fn write<T: Serialize>(&self, rel: impl AsRef<Path>, value: &T) -> StoreResult<()> {
        self.stage(rel, value)?.commit()
    }

    pub fn read<T: DeserializeOwned>(&self, rel: impl AsRef<Path>) -> StoreResult<T> {
        let path = self.resolve(rel);
        let bytes = fs::read(&path).map_err(|e| io_error(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt { path, source })
    }

    /// Remove the record at `rel` with a single unlink.
    pub fn delete(&self, rel: impl AsRef<Path>) -> StoreResult<()> {
        let path = self.resolve(rel);
        fs::remove_file(&path).map_err(|e| io_error(&path, e))?;
        if let Some(parent) = path.parent() {
            sync_dir(parent)?;
        }
        Ok(())
    }

    /// Committed record file names in `rel_dir` with the given extension,
    /// sorted. A missing directory lists as empty; in-flight temporary files are
    /// never returned.
    pub fn list(&self, rel_dir: impl AsRef<Path>, extension: &str) -> StoreResult<Vec<String>> {
        let dir = self.resolve(rel_dir);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(unavailable(&dir, err)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| unavailable(&dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(OsStr::to_str) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if path.extension().and_then(OsStr::to_str) == Some(extension) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove temporary files left behind by a writer that died between stage
    /// and commit. Returns how many were removed.
    pub fn sweep_temp_files(&self, rel_dir: impl AsRef<Path>) -> StoreResult<usize> {
        let dir = self.resolve(rel_dir);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(unavailable(&dir, err)),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry.map_err(|e| unavailable(&dir, e))?.path();
            let is_temp = path
                .file_name()
                .and_then(OsStr::to_str)
                .is_some_and(|name| name.starts_with('.') && name.ends_with(TEMP_SUFFIX));
            if !is_temp || !path.is_file() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(unavailable(&path, err)),
            }
        }
        Ok(removed)
    }
}

/// A fully written and synced temporary file waiting to be renamed over its
/// target. Dropping it without committing removes the temporary file and
/// leaves the target untouched.
#[derive(Debug)]
pub struct StagedRecord {
    target: PathBuf,
    tmp: NamedTempFile,
}

impl StagedRecord {
    pub fn temp_path(&self) -> &Path {
        self.tmp.path()
    }

    /// Rename the temporary file over the target and sync the directory entry.
    pub fn commit(self) -> StoreResult<()> {
        let StagedRecord { target, tmp } = self;
        tmp.persist(&target)
            .map_err(|err| unavailable(&target, err.error))?;
        if let Some(parent) = target.parent() {
            sync_dir(parent)?;
        }
        Ok(())
    }
}

fn stage_bytes(path: &Path, bytes: &[u8]) -> StoreResult<StagedRecord> {
    let parent = path.parent().ok_or_else(|| {
        unavailable(
            path,
            io::Error::new(ErrorKind::InvalidInput, "record path has no parent directory"),
        )
    })?;
    let name = path.file_name().and_then(OsStr::to_str).unwrap_or("record");
    fs::create_dir_all(parent).map_err(|e| unavailable(parent, e))?;

    // Same directory as the target so the rename never crosses a filesystem.
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(TEMP_SUFFIX)
        .tempfile_in(parent)
        .map_err(|e| unavailable(parent, e))?;
    let tmp_path = tmp.path().to_path_buf();
    tmp.write_all(bytes).map_err(|e| unavailable(&tmp_path, e))?;
    tmp.flush().map_err(|e| unavailable(&tmp_path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| unavailable(&tmp_path, e))?;

    Ok(StagedRecord {
        target: path.to_path_buf(),
        tmp,
    })
}

/// Make directory entry changes (create, rename, unlink) in `dir` durable.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> StoreResult<()> {
    File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(|e| unavailable(dir, e))
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> StoreResult<()> {
    Ok(())
}
