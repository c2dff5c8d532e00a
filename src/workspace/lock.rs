//! Per-target mutual exclusion.
//!
//! A lease is a `.{target}.lock` file in the workspace root, created with
//! `create_new`, so it excludes other processes as well as other tasks in
//! this one. The file records the holder's pid and start time and is
//! removed when the lease drops.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use super::WorkspaceError;

const LOCK_SUFFIX: &str = ".lock";

/// Path of the lock file guarding `target` under `root`.
pub fn lock_path(root: &Path, target: &str) -> PathBuf {
    root.join(format!(".{}{}", target, LOCK_SUFFIX))
}

/// Proof that the holder owns a target until dropped.
///
/// Acquisition never waits: a second caller for a busy target gets
/// `LOCKED` immediately. Different targets never contend.
#[derive(Debug)]
pub struct TargetLease {
    target: String,
    path: PathBuf,
}

impl TargetLease {
    pub(super) fn acquire(root: &Path, target: &str) -> Result<Self, WorkspaceError> {
        fs::create_dir_all(root)
            .map_err(|e| WorkspaceError::io(target, "create workspace root", e))?;

        let path = lock_path(root, target);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                return Err(WorkspaceError::locked_by(target, &path, holder.trim()));
            }
            Err(e) => return Err(WorkspaceError::io(target, "create lock file", e)),
        };

        let stamp = format!("pid={} since={}\n", std::process::id(), Utc::now().to_rfc3339());
        if let Err(e) = file.write_all(stamp.as_bytes()) {
            // still exclusive; the stamp is informational
            warn!("Could not write {}: {}", path.display(), e);
        }

        debug!("Acquired workspace lock for '{}'", target);
        Ok(Self {
            target: target.to_string(),
            path,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for TargetLease {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Released workspace lock for '{}'", self.target),
            Err(e) => warn!("Could not remove {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::WorkspaceErrorKind;

    #[test]
    fn test_same_target_is_exclusive() {
        let tmp = tempfile::tempdir().unwrap();
        let lease = TargetLease::acquire(tmp.path(), "jobs").unwrap();
        assert_eq!(lease.target(), "jobs");
        assert!(lock_path(tmp.path(), "jobs").is_file());

        let err = TargetLease::acquire(tmp.path(), "jobs").unwrap_err();
        assert_eq!(err.kind, WorkspaceErrorKind::Locked);
        assert!(err.message.contains(&format!("pid={}", std::process::id())));

        drop(lease);
        assert!(!lock_path(tmp.path(), "jobs").exists());
        assert!(TargetLease::acquire(tmp.path(), "jobs").is_ok());
    }

    #[test]
    fn test_distinct_targets_are_independent() {
        let tmp = tempfile::tempdir().unwrap();
        let _a = TargetLease::acquire(tmp.path(), "a").unwrap();
        let _b = TargetLease::acquire(tmp.path(), "b").unwrap();
        assert!(lock_path(tmp.path(), "a").is_file());
        assert!(lock_path(tmp.path(), "b").is_file());
    }

    #[test]
    fn test_lock_file_left_by_another_holder_blocks() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(lock_path(tmp.path(), "jobs"), "pid=1 since=then\n").unwrap();

        let err = TargetLease::acquire(tmp.path(), "jobs").unwrap_err();
        assert_eq!(err.kind, WorkspaceErrorKind::Locked);
        assert!(err.message.contains("pid=1"));
        assert!(err.message.contains(".jobs.lock"));
    }
}
