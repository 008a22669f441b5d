//! Process liveness probing for lock holders.
//!
//! Operating systems reuse PIDs. A lock recorded with PID 12345 might refer to an
//! agent that exited, and an unrelated process might now own that PID. Lock metadata
//! therefore also carries the holder's process start time; a start-time mismatch
//! means the PID was recycled and the lock is stale.

use std::cell::RefCell;

use sysinfo::{Pid, ProcessRefreshKind, System};

// Per-PID refresh is O(1); a full process scan would be O(n) on every stale check.
thread_local! {
    static SYSTEM_CACHE: RefCell<Option<System>> = const { RefCell::new(None) };
}

/// Start-time tolerance between the recorded and the observed value.
const START_TIME_TOLERANCE_SECS: u64 = 2;

/// Returns true if a process with this PID exists.
///
/// `EPERM` means the process exists but belongs to another user, which still counts
/// as alive.
pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }
        // SAFETY: signal 0 performs only the existence/permission check.
        #[allow(unsafe_code)]
        let result = unsafe { libc::kill(raw, 0) };
        if result == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Get the start time of a process (Unix timestamp, seconds).
/// Returns None if the process doesn't exist or can't be queried.
pub fn process_start_time(pid: u32) -> Option<u64> {
    SYSTEM_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        let sys = cache.get_or_insert_with(System::new);

        let sysinfo_pid = Pid::from(pid as usize);
        sys.refresh_process_specifics(sysinfo_pid, ProcessRefreshKind::new());
        sys.process(sysinfo_pid).map(|process| process.start_time())
    })
}

/// Verify that a PID is alive and, when a start time was recorded, that it still
/// belongs to the same process.
pub fn is_pid_alive_verified(pid: u32, expected_start: Option<u64>) -> bool {
    if !is_pid_alive(pid) {
        return false;
    }

    let Some(expected) = expected_start else {
        return true;
    };

    match process_start_time(pid) {
        Some(actual) => actual.abs_diff(expected) <= START_TIME_TOLERANCE_SECS,
        // Alive per kill(0) but not visible to sysinfo; don't call it dead.
        None => true,
    }
}

/// Hostname recorded in lock metadata.
pub fn local_hostname() -> String {
    System::host_name().unwrap_or_else(|| "unknown".to_string())
}
