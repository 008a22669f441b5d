//! Exclusive advisory locks per working directory.
//!
//! Cooperating agents are separate OS processes with no broker between them, so the
//! lock lives on a shared filesystem:
//!
//! ```text
//! /tmp/agent_locks/
//! ├── {md5}.lock   # sentinel, held with flock(LOCK_EX) while the lock is live
//! └── {md5}.info   # { agent, directory, acquired_at, pid, hostname, proc_started }
//! ```
//!
//! `{md5}` is the digest of the canonical directory path (see [`crate::paths`]).
//!
//! # Module Structure
//!
//! - [`LockStore`]: the "advisory lock + metadata" pair as an interface
//! - [`FsLockStore`]: the filesystem backing (fs2 flock + JSON sidecar)
//! - [`DirectoryLockManager`]: per-process bookkeeping, blocking acquire,
//!   stale reclamation
//! - [`LockGuard`]: scoped acquisition released on drop

mod fs_store;
mod manager;

pub use fs_store::{FsLockHandle, FsLockStore};
pub(crate) use fs_store::is_contended;
pub use manager::{CleanupReport, DirectoryLockManager, LockGuard};

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::process::{is_pid_alive_verified, local_hostname};

/// Sidecar record describing the current holder of a directory lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetadata {
    pub agent: String,
    pub directory: PathBuf,
    pub acquired_at: DateTime<Utc>,
    pub pid: u32,
    pub hostname: String,
    /// Holder process start time, used to detect PID reuse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proc_started: Option<u64>,
}

impl LockMetadata {
    /// True unless the holder provably no longer exists.
    ///
    /// Locks recorded on another host can't be probed and always count as live.
    pub fn holder_alive(&self) -> bool {
        if self.hostname != local_hostname() {
            return true;
        }
        is_pid_alive_verified(self.pid, self.proc_started)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.acquired_at)
    }
}

/// Storage for the advisory lock and its metadata, keyed by directory key.
///
/// The filesystem implementation is the only one today; the seam exists so the same
/// manager can sit on an embedded store or a network lock service.
pub trait LockStore: Send + Sync {
    /// Proof of ownership returned by a successful acquisition.
    type Handle: Send;

    /// Attempts the exclusive lock without waiting. `Ok(None)` means contention.
    fn try_acquire(&self, key: &str, metadata: &LockMetadata) -> Result<Option<Self::Handle>>;

    /// Drops the lock and deletes its sentinel and metadata.
    fn release(&self, key: &str, handle: Self::Handle) -> Result<()>;

    /// Reads the metadata record without acquiring anything.
    fn read(&self, key: &str) -> Result<Option<LockMetadata>>;

    /// All metadata records, with their keys.
    fn list(&self) -> Result<Vec<(String, LockMetadata)>>;

    /// Removes sentinel and metadata regardless of owner. Returns whether anything existed.
    fn force_remove(&self, key: &str) -> Result<bool>;

    /// Removes the lock only if nobody holds it and its record still equals
    /// `expected`. Returns whether it was removed.
    fn reclaim(&self, key: &str, expected: &LockMetadata) -> Result<bool>;
}

/// Read-only lock queries, used by callers that must never acquire (the router).
pub trait DirectoryLocks {
    fn holder(&self, directory: &Path) -> Result<Option<LockMetadata>>;

    fn is_locked(&self, directory: &Path) -> Result<bool> {
        Ok(self.holder(directory)?.is_some())
    }
}

impl<T: DirectoryLocks + ?Sized> DirectoryLocks for &T {
    fn holder(&self, directory: &Path) -> Result<Option<LockMetadata>> {
        (**self).holder(directory)
    }
}

impl<T: DirectoryLocks + ?Sized> DirectoryLocks for std::sync::Arc<T> {
    fn holder(&self, directory: &Path) -> Result<Option<LockMetadata>> {
        (**self).holder(directory)
    }
}
