//! Path canonicalization and lock-key derivation.
//!
//! Every caller that names a directory (lock manager, router, CLI) goes through
//! [`canonicalize_directory`] so that `/work/x`, `/work/x/` and `/work/./x` all
//! resolve to the same lock.
//!
//! Handles platform-specific quirks:
//! - Relative paths (resolved against the current directory)
//! - Symlink resolution when the path exists
//! - macOS case-insensitive filesystem (key only)

use std::path::{Component, Path, PathBuf};

/// Resolves a directory to an absolute, normalized path.
///
/// Existing paths are canonicalized (symlinks resolved). Paths that don't exist yet
/// are made absolute and lexically normalized so a lock can be taken before the
/// directory is created.
pub fn canonicalize_directory(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    if absolute.exists() {
        if let Ok(canonical) = absolute.canonicalize() {
            return canonical;
        }
    }

    normalize_lexically(&absolute)
}

/// Computes the stable lock key for a canonical directory.
///
/// The key is the MD5 hex digest of the path, which keeps sentinel file names short
/// and free of separators regardless of how deep the directory is.
pub fn directory_key(canonical: &Path) -> String {
    let text = apply_case_normalization(&canonical.to_string_lossy());
    format!("{:x}", md5::compute(text.as_bytes()))
}

/// Removes `.` components and folds `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        PathBuf::from("/")
    } else {
        normalized
    }
}

/// macOS uses a case-insensitive filesystem by default (HFS+/APFS),
/// so keys are derived from the lowercased path there.
fn apply_case_normalization(path: &str) -> String {
    #[cfg(target_os = "macos")]
    {
        path.to_lowercase()
    }
    #[cfg(not(target_os = "macos"))]
    {
        path.to_string()
    }
}
