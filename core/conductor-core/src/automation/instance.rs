//! Single-instance guard for the auto-confirm daemon.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{CoordError, Result};
use crate::lock::is_contended;

/// Holds an exclusive flock on the pid file for the daemon's lifetime. The OS
/// drops the lock if the process dies, so a stale pid file never blocks a restart.
#[derive(Debug)]
pub struct InstanceGuard {
    file: File,
    path: PathBuf,
}

impl InstanceGuard {
    pub fn acquire(pid_file: &Path) -> Result<Self> {
        if let Some(parent) = pid_file.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| CoordError::io("create pid file directory", err))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(pid_file)
            .map_err(|err| CoordError::io(format!("open pid file {}", pid_file.display()), err))?;

        if let Err(err) = FileExt::try_lock_exclusive(&file) {
            if is_contended(&err) {
                return Err(CoordError::InstanceAlreadyRunning(pid_file.to_path_buf()));
            }
            return Err(CoordError::io("lock pid file", err));
        }

        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| writeln!(file, "{}", std::process::id()))
            .and_then(|_| file.flush())
            .map_err(|err| CoordError::io("write pid file", err))?;

        debug!(path = %pid_file.display(), pid = std::process::id(), "Instance lock acquired");
        Ok(Self {
            file,
            path: pid_file.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_instance_is_refused_until_first_drops() {
        let temp = tempfile::tempdir().unwrap();
        let pid_file = temp.path().join("run").join("autoconfirm.pid");

        let first = InstanceGuard::acquire(&pid_file).unwrap();
        let written = std::fs::read_to_string(&pid_file).unwrap();
        assert_eq!(written.trim(), std::process::id().to_string());

        let err = InstanceGuard::acquire(&pid_file).unwrap_err();
        assert!(matches!(err, CoordError::InstanceAlreadyRunning(_)));

        drop(first);
        assert!(!pid_file.exists());
        let _again = InstanceGuard::acquire(&pid_file).unwrap();
    }
}
