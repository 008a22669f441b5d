//! Filesystem-backed lock store.
//!
//! The sentinel is locked with `flock(LOCK_EX | LOCK_NB)` (via fs2). The OS drops
//! the flock when the holder exits, so a crashed agent never blocks others; its
//! leftover `.info` file is what stale cleanup reclaims.
//!
//! # Unlinked-sentinel race
//!
//! Release unlinks the sentinel before unlocking. A waiter that opened the old inode
//! can win the flock on a file that is no longer reachable by path. After locking we
//! compare the locked inode with the one at the path and retry on mismatch.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{LockMetadata, LockStore};
use crate::error::{CoordError, Result};

const SENTINEL_EXTENSION: &str = "lock";
const METADATA_EXTENSION: &str = "info";
const SENTINEL_RACE_RETRIES: usize = 3;

/// Proof of ownership: the open, flocked sentinel file.
#[derive(Debug)]
pub struct FsLockHandle {
    file: File,
}

#[derive(Debug, Clone)]
pub struct FsLockStore {
    base: PathBuf,
}

impl FsLockStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn sentinel_path(&self, key: &str) -> PathBuf {
        self.base.join(format!("{}.{}", key, SENTINEL_EXTENSION))
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.base.join(format!("{}.{}", key, METADATA_EXTENSION))
    }

    fn ensure_base(&self) -> Result<()> {
        fs::create_dir_all(&self.base).map_err(|err| {
            CoordError::io(
                format!("create lock directory {}", self.base.display()),
                err,
            )
        })
    }

    /// Writes metadata via temp file + rename so readers never see a partial record.
    fn write_metadata(&self, key: &str, metadata: &LockMetadata) -> Result<()> {
        let path = self.metadata_path(key);
        let content = serde_json::to_string_pretty(metadata)
            .map_err(|err| CoordError::json("serialize lock metadata", err))?;

        let mut temp = NamedTempFile::new_in(&self.base)
            .map_err(|err| CoordError::io("create lock metadata temp file", err))?;
        temp.write_all(content.as_bytes())
            .map_err(|err| CoordError::io("write lock metadata", err))?;
        temp.persist(&path).map_err(|err| {
            CoordError::io(format!("persist lock metadata {}", path.display()), err.error)
        })?;
        Ok(())
    }

    /// Writes a metadata record without taking the flock, the way a crashed holder
    /// leaves one behind.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn plant_record(&self, key: &str, metadata: &LockMetadata) -> Result<()> {
        self.ensure_base()?;
        fs::write(self.sentinel_path(key), b"")
            .map_err(|err| CoordError::io("plant sentinel", err))?;
        self.write_metadata(key, metadata)
    }
}

impl LockStore for FsLockStore {
    type Handle = FsLockHandle;

    fn try_acquire(&self, key: &str, metadata: &LockMetadata) -> Result<Option<FsLockHandle>> {
        self.ensure_base()?;
        let sentinel = self.sentinel_path(key);

        for _ in 0..SENTINEL_RACE_RETRIES {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&sentinel)
                .map_err(|err| {
                    CoordError::io(format!("open sentinel {}", sentinel.display()), err)
                })?;

            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {}
                Err(err) if is_contended(&err) => return Ok(None),
                Err(err) => {
                    return Err(CoordError::io(
                        format!("flock sentinel {}", sentinel.display()),
                        err,
                    ))
                }
            }

            if !locked_file_matches_path(&file, &sentinel) {
                debug!(key, "Locked an unlinked sentinel, retrying");
                continue;
            }

            if let Err(err) = self.write_metadata(key, metadata) {
                let _ = FileExt::unlock(&file);
                return Err(err);
            }

            return Ok(Some(FsLockHandle { file }));
        }

        Ok(None)
    }

    fn release(&self, key: &str, handle: FsLockHandle) -> Result<()> {
        remove_if_exists(&self.metadata_path(key))?;
        remove_if_exists(&self.sentinel_path(key))?;
        FileExt::unlock(&handle.file).map_err(|err| CoordError::io("unlock sentinel", err))?;
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<LockMetadata>> {
        read_metadata_file(&self.metadata_path(key))
    }

    fn list(&self) -> Result<Vec<(String, LockMetadata)>> {
        let entries = match fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(CoordError::io(
                    format!("read lock directory {}", self.base.display()),
                    err,
                ))
            }
        };

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == METADATA_EXTENSION) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if let Some(metadata) = read_metadata_file(&path)? {
                records.push((key.to_string(), metadata));
            }
        }
        records.sort_by(|left, right| left.1.directory.cmp(&right.1.directory));
        Ok(records)
    }

    fn reclaim(&self, key: &str, expected: &LockMetadata) -> Result<bool> {
        let sentinel = self.sentinel_path(key);
        let file = match OpenOptions::new().write(true).open(&sentinel) {
            Ok(file) => file,
            // No sentinel means no holder; only the record is left.
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if self.read(key)?.as_ref() != Some(expected) {
                    return Ok(false);
                }
                return remove_if_exists(&self.metadata_path(key));
            }
            Err(err) => {
                return Err(CoordError::io(
                    format!("open sentinel {}", sentinel.display()),
                    err,
                ))
            }
        };

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(err) if is_contended(&err) => return Ok(false),
            Err(err) => {
                return Err(CoordError::io(
                    format!("flock sentinel {}", sentinel.display()),
                    err,
                ))
            }
        }

        let reclaimable = locked_file_matches_path(&file, &sentinel)
            && self.read(key)?.as_ref() == Some(expected);
        let removed = if reclaimable {
            remove_if_exists(&self.metadata_path(key))?;
            remove_if_exists(&sentinel)?;
            true
        } else {
            false
        };
        let _ = FileExt::unlock(&file);
        Ok(removed)
    }

    fn force_remove(&self, key: &str) -> Result<bool> {
        let had_metadata = remove_if_exists(&self.metadata_path(key))?;
        let had_sentinel = remove_if_exists(&self.sentinel_path(key))?;
        Ok(had_metadata || had_sentinel)
    }
}

pub(crate) fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(unix)]
fn locked_file_matches_path(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let (Ok(locked), Ok(current)) = (file.metadata(), fs::metadata(path)) else {
        return false;
    };
    locked.dev() == current.dev() && locked.ino() == current.ino()
}

#[cfg(not(unix))]
fn locked_file_matches_path(_file: &File, path: &Path) -> bool {
    path.exists()
}

fn read_metadata_file(path: &Path) -> Result<Option<LockMetadata>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(CoordError::io(
                format!("read lock metadata {}", path.display()),
                err,
            ))
        }
    };

    match serde_json::from_str(&content) {
        Ok(metadata) => Ok(Some(metadata)),
        Err(err) => {
            // A holder may be mid-write on filesystems without atomic rename.
            warn!(path = %path.display(), error = %err, "Ignoring unreadable lock metadata");
            Ok(None)
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(CoordError::io(format!("remove {}", path.display()), err)),
    }
}
