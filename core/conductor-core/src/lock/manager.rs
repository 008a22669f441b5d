use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{DirectoryLocks, FsLockStore, LockMetadata, LockStore};
use crate::error::{CoordError, Result};
use crate::paths::{canonicalize_directory, directory_key};
use crate::process::{local_hostname, process_start_time};

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

struct Held<H> {
    key: String,
    handle: H,
}

/// Outcome of a stale-lock sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub reclaimed: Vec<PathBuf>,
    /// Old records whose holder is still running; never removed.
    pub skipped_alive: Vec<PathBuf>,
}

/// Per-process owner of directory locks.
///
/// One instance per agent process. Everything it acquired is released when it is
/// dropped, including during unwinding.
///
/// The manager installs no signal handler. A process that holds locks must turn
/// SIGINT/SIGTERM into a normal return (for example a `ctrlc` handler that sets a
/// flag its loop checks) so the manager is dropped; the OS drops the flocks of a
/// killed process, but the `.info` records stay until [`Self::cleanup_stale`].
pub struct DirectoryLockManager<S: LockStore = FsLockStore> {
    agent: String,
    store: S,
    held: Mutex<HashMap<PathBuf, Held<S::Handle>>>,
    retry_interval: Duration,
}

impl DirectoryLockManager<FsLockStore> {
    /// Manager over the filesystem store rooted at `lock_dir`.
    pub fn open(agent: impl Into<String>, lock_dir: impl Into<PathBuf>) -> Self {
        Self::new(agent, FsLockStore::new(lock_dir))
    }
}

impl<S: LockStore> DirectoryLockManager<S> {
    pub fn new(agent: impl Into<String>, store: S) -> Self {
        Self {
            agent: agent.into(),
            store,
            held: Mutex::new(HashMap::new()),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Takes the exclusive lock on `directory`.
    ///
    /// Contention is `Ok(false)`, not an error. Blocking callers poll every
    /// `retry_interval` until `timeout` elapses; the final sleep is clipped to the
    /// deadline so the call returns within `[timeout, timeout + one attempt]`.
    /// A directory this manager already holds is reported as acquired.
    pub fn acquire(&self, directory: &Path, timeout: Duration, blocking: bool) -> Result<bool> {
        let directory = canonicalize_directory(directory);
        if self.holds_canonical(&directory) {
            debug!(directory = %directory.display(), "Lock already held by this agent");
            return Ok(true);
        }

        let key = directory_key(&directory);
        let started = Instant::now();
        // `None` when the timeout overflows `Instant`: wait without a deadline.
        let deadline = started.checked_add(timeout);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let metadata = self.metadata_for(&directory);
            if let Some(handle) = self.store.try_acquire(&key, &metadata)? {
                info!(
                    agent = %self.agent,
                    directory = %directory.display(),
                    attempts,
                    "Acquired directory lock"
                );
                self.held_map().insert(directory, Held { key, handle });
                return Ok(true);
            }

            if !blocking {
                debug!(directory = %directory.display(), "Directory lock busy (non-blocking)");
                return Ok(false);
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                info!(
                    agent = %self.agent,
                    directory = %directory.display(),
                    waited_ms = now.duration_since(started).as_millis() as u64,
                    "Timed out waiting for directory lock"
                );
                return Ok(false);
            }

            match self.store.read(&key)? {
                Some(holder) => info!(
                    directory = %directory.display(),
                    holder = %holder.agent,
                    holder_pid = holder.pid,
                    since = %holder.acquired_at,
                    attempt = attempts,
                    "Waiting for directory lock"
                ),
                None => debug!(
                    directory = %directory.display(),
                    attempt = attempts,
                    "Waiting for directory lock (holder unknown)"
                ),
            }

            let remaining = deadline.map_or(Duration::MAX, |deadline| {
                deadline.saturating_duration_since(now)
            });
            thread::sleep(self.retry_interval.min(remaining));
        }
    }

    /// Blocking acquire that releases on drop. Failure is [`CoordError::LockTimeout`].
    pub fn acquire_guard(&self, directory: &Path, timeout: Duration) -> Result<LockGuard<'_, S>> {
        let canonical = canonicalize_directory(directory);
        let already_held = self.holds_canonical(&canonical);
        if !self.acquire(&canonical, timeout, true)? {
            return Err(CoordError::LockTimeout {
                directory: canonical,
                waited: timeout,
            });
        }
        Ok(LockGuard {
            manager: self,
            directory: Some(canonical),
            owns_release: !already_held,
        })
    }

    /// Releases a lock this manager holds. Returns false when it holds none for
    /// `directory`; another agent's lock is never touched.
    pub fn release(&self, directory: &Path) -> Result<bool> {
        let directory = canonicalize_directory(directory);
        let Some(held) = self.held_map().remove(&directory) else {
            debug!(
                agent = %self.agent,
                directory = %directory.display(),
                "Release requested for a lock this agent does not hold"
            );
            return Ok(false);
        };

        self.store.release(&held.key, held.handle)?;
        info!(agent = %self.agent, directory = %directory.display(), "Released directory lock");
        Ok(true)
    }

    /// Metadata of the live holder, if any. Records left by dead processes read as unlocked.
    pub fn get_holder(&self, directory: &Path) -> Result<Option<LockMetadata>> {
        let key = directory_key(&canonicalize_directory(directory));
        Ok(self.store.read(&key)?.filter(LockMetadata::holder_alive))
    }

    pub fn is_locked(&self, directory: &Path) -> Result<bool> {
        Ok(self.get_holder(directory)?.is_some())
    }

    /// True when this manager itself holds `directory`.
    pub fn holds(&self, directory: &Path) -> bool {
        self.holds_canonical(&canonicalize_directory(directory))
    }

    pub fn held_directories(&self) -> Vec<PathBuf> {
        let mut directories: Vec<PathBuf> = self.held_map().keys().cloned().collect();
        directories.sort();
        directories
    }

    /// Reclaims records older than `max_age` whose holder is dead.
    ///
    /// Removal happens under the sentinel's flock and only if the record is unchanged
    /// since the scan, so a holder that took over in between is left alone.
    pub fn cleanup_stale(&self, max_age: Duration) -> Result<CleanupReport> {
        let now = Utc::now();
        let mut report = CleanupReport::default();

        for (key, metadata) in self.store.list()? {
            let age = metadata.age(now).to_std().unwrap_or_default();
            if age < max_age {
                continue;
            }

            if metadata.holder_alive() {
                debug!(
                    directory = %metadata.directory.display(),
                    holder = %metadata.agent,
                    pid = metadata.pid,
                    age_secs = age.as_secs(),
                    "Old lock still held by a live process"
                );
                report.skipped_alive.push(metadata.directory);
                continue;
            }

            if self.store.reclaim(&key, &metadata)? {
                info!(
                    directory = %metadata.directory.display(),
                    holder = %metadata.agent,
                    pid = metadata.pid,
                    age_secs = age.as_secs(),
                    "Reclaimed stale directory lock"
                );
                report.reclaimed.push(metadata.directory);
            }
        }

        Ok(report)
    }

    /// Releases every lock held by this manager. Returns how many were released.
    pub fn cleanup_all_locks(&self) -> usize {
        let drained: Vec<(PathBuf, Held<S::Handle>)> = self.held_map().drain().collect();
        let mut released = 0;
        for (directory, held) in drained {
            match self.store.release(&held.key, held.handle) {
                Ok(()) => {
                    released += 1;
                    info!(directory = %directory.display(), "Released directory lock on shutdown");
                }
                Err(err) => warn!(
                    directory = %directory.display(),
                    error = %err,
                    "Failed to release directory lock on shutdown"
                ),
            }
        }
        released
    }

    /// Every lock record in the store, live or stale.
    pub fn list_locks(&self) -> Result<Vec<LockMetadata>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .map(|(_, metadata)| metadata)
            .collect())
    }

    /// Removes the lock on `directory` whoever holds it. Administrative use only.
    pub fn force_unlock(&self, directory: &Path) -> Result<bool> {
        let directory = canonicalize_directory(directory);
        if self.holds_canonical(&directory) {
            return self.release(&directory);
        }

        let key = directory_key(&directory);
        let previous = self.store.read(&key)?;
        let removed = self.store.force_remove(&key)?;
        if removed {
            warn!(
                directory = %directory.display(),
                holder = previous.as_ref().map(|m| m.agent.as_str()).unwrap_or("unknown"),
                "Force-removed directory lock"
            );
        }
        Ok(removed)
    }

    fn metadata_for(&self, directory: &Path) -> LockMetadata {
        let pid = std::process::id();
        LockMetadata {
            agent: self.agent.clone(),
            directory: directory.to_path_buf(),
            acquired_at: Utc::now(),
            pid,
            hostname: local_hostname(),
            proc_started: process_start_time(pid),
        }
    }

    fn holds_canonical(&self, directory: &Path) -> bool {
        self.held_map().contains_key(directory)
    }

    fn held_map(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Held<S::Handle>>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S: LockStore> DirectoryLocks for DirectoryLockManager<S> {
    fn holder(&self, directory: &Path) -> Result<Option<LockMetadata>> {
        self.get_holder(directory)
    }
}

impl<S: LockStore> Drop for DirectoryLockManager<S> {
    fn drop(&mut self) {
        let released = self.cleanup_all_locks();
        if released > 0 {
            debug!(agent = %self.agent, released, "Lock manager dropped");
        }
    }
}

/// Scoped directory lock from [`DirectoryLockManager::acquire_guard`].
pub struct LockGuard<'a, S: LockStore = FsLockStore> {
    manager: &'a DirectoryLockManager<S>,
    directory: Option<PathBuf>,
    // False when the lock was already held before the guard existed.
    owns_release: bool,
}

impl<S: LockStore> LockGuard<'_, S> {
    pub fn directory(&self) -> &Path {
        self.directory.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Releases now instead of at drop, surfacing any store error.
    pub fn release(mut self) -> Result<bool> {
        match self.directory.take() {
            Some(directory) if self.owns_release => self.manager.release(&directory),
            _ => Ok(false),
        }
    }
}

impl<S: LockStore> Drop for LockGuard<'_, S> {
    fn drop(&mut self) {
        let Some(directory) = self.directory.take() else {
            return;
        };
        if !self.owns_release {
            return;
        }
        if let Err(err) = self.manager.release(&directory) {
            warn!(directory = %directory.display(), error = %err, "Failed to release guarded lock");
        }
    }
}
