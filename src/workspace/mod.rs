//! Artifact workspace manager.
//!
//! One directory per target name under the workspace root. A workspace is
//! always replaced wholesale: files are written to a hidden staging
//! directory, which is then swapped in for the previous workspace.

mod lock;

pub use lock::{lock_path, TargetLease};

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::models::{is_safe_identifier, GeneratedArtifact};

pub const CONNECTOR_FILE: &str = "connector.py";
pub const MANIFEST_FILE: &str = "requirements.txt";
pub const README_FILE: &str = "README.md";
pub const GITIGNORE_FILE: &str = ".gitignore";
pub const CONFIG_FILE: &str = "configuration.json";

/// Files that may leave the machine. The configuration file is not one of
/// them, so exports cannot include it.
pub const SHAREABLE_FILES: &[&str] = &[CONNECTOR_FILE, MANIFEST_FILE, README_FILE, GITIGNORE_FILE];

const STAGING_MARKER: &str = ".staging-";
const RETIRED_MARKER: &str = ".retired-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceErrorKind {
    Locked,
    IoFailure,
}

impl WorkspaceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceErrorKind::Locked => "LOCKED",
            WorkspaceErrorKind::IoFailure => "IO_FAILURE",
        }
    }
}

impl fmt::Display for WorkspaceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} for '{target}': {message}")]
pub struct WorkspaceError {
    pub kind: WorkspaceErrorKind,
    pub target: String,
    pub message: String,
}

impl WorkspaceError {
    pub fn locked_by(target: &str, lock_file: &Path, holder: &str) -> Self {
        let holder = if holder.is_empty() { "unknown holder" } else { holder };
        Self {
            kind: WorkspaceErrorKind::Locked,
            target: target.to_string(),
            message: format!(
                "another run holds {} ({}); remove it only if that run is gone",
                lock_file.display(),
                holder
            ),
        }
    }

    pub fn io(target: &str, context: &str, err: impl fmt::Display) -> Self {
        Self {
            kind: WorkspaceErrorKind::IoFailure,
            target: target.to_string(),
            message: format!("{}: {}", context, err),
        }
    }
}

/// What `status` shows for one workspace.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceSummary {
    pub target_name: String,
    pub path: PathBuf,
    pub files: Vec<String>,
    /// SHA-256 of `connector.py`, if present.
    pub digest: Option<String>,
    pub modified: Option<DateTime<Utc>>,
}

/// Owns the on-disk lifecycle of generated workspaces.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, target: &str) -> PathBuf {
        self.root.join(target)
    }

    /// Take the exclusive lease on `target`. Hold it across materialize and
    /// deploy. Excludes every process using the same root.
    pub fn lock(&self, target: &str) -> Result<TargetLease, WorkspaceError> {
        check_target(target)?;
        TargetLease::acquire(&self.root, target)
    }

    /// Replace the workspace for the lease's target with `artifact`.
    pub fn materialize(
        &self,
        lease: &TargetLease,
        artifact: &GeneratedArtifact,
    ) -> Result<PathBuf, WorkspaceError> {
        let target = lease.target();
        fs::create_dir_all(&self.root)
            .map_err(|e| WorkspaceError::io(target, "create workspace root", e))?;
        self.sweep_leftovers(target);

        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let staging = self
            .root
            .join(format!(".{}{}{}", target, STAGING_MARKER, nonce));
        if let Err(e) = write_workspace(&staging, artifact) {
            let _ = fs::remove_dir_all(&staging);
            return Err(WorkspaceError::io(target, "write staged files", e));
        }

        let final_path = self.path_for(target);
        let retired = if final_path.exists() {
            let retired = self
                .root
                .join(format!(".{}{}{}", target, RETIRED_MARKER, nonce));
            if let Err(e) = fs::rename(&final_path, &retired) {
                let _ = fs::remove_dir_all(&staging);
                return Err(WorkspaceError::io(target, "retire previous workspace", e));
            }
            Some(retired)
        } else {
            None
        };

        if let Err(e) = fs::rename(&staging, &final_path) {
            if let Some(ref retired) = retired {
                let _ = fs::rename(retired, &final_path);
            }
            let _ = fs::remove_dir_all(&staging);
            return Err(WorkspaceError::io(target, "swap in new workspace", e));
        }

        if let Some(retired) = retired {
            if let Err(e) = fs::remove_dir_all(&retired) {
                warn!("Could not remove {}: {}", retired.display(), e);
            }
        }

        info!("Materialized workspace {}", final_path.display());
        Ok(final_path)
    }

    /// Lock, materialize, unlock.
    pub fn materialize_named(
        &self,
        target: &str,
        artifact: &GeneratedArtifact,
    ) -> Result<PathBuf, WorkspaceError> {
        let lease = self.lock(target)?;
        self.materialize(&lease, artifact)
    }

    /// Remove staging or retired directories a crashed run left behind.
    /// Only called under the target's lease, so no live run owns them.
    fn sweep_leftovers(&self, target: &str) {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return;
        };
        let staging = format!(".{}{}", target, STAGING_MARKER);
        let retired = format!(".{}{}", target, RETIRED_MARKER);
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&staging) || name.starts_with(&retired) {
                debug!("Removing leftover {}", name);
                let _ = fs::remove_dir_all(entry.path());
            }
        }
    }

    /// Summaries of every workspace under the root, sorted by name.
    pub fn list(&self) -> Result<Vec<WorkspaceSummary>, WorkspaceError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WorkspaceError::io("*", "read workspace root", e)),
        };

        let mut summaries = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_safe_identifier(&name) || !entry.path().is_dir() {
                continue;
            }
            summaries.push(self.summarize(&name)?);
        }
        summaries.sort_by(|a, b| a.target_name.cmp(&b.target_name));
        Ok(summaries)
    }

    pub fn summarize(&self, target: &str) -> Result<WorkspaceSummary, WorkspaceError> {
        check_target(target)?;
        let path = self.path_for(target);
        let mut files: Vec<String> = fs::read_dir(&path)
            .map_err(|e| WorkspaceError::io(target, "read workspace", e))?
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();

        let digest = fs::read(path.join(CONNECTOR_FILE))
            .ok()
            .map(|bytes| hex::encode(Sha256::digest(&bytes)));
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        Ok(WorkspaceSummary {
            target_name: target.to_string(),
            path,
            files,
            digest,
            modified,
        })
    }

    /// Zip the shareable files of `target` into `dest`.
    pub fn export_bundle(&self, target: &str, dest: &Path) -> Result<PathBuf, WorkspaceError> {
        check_target(target)?;
        let dir = self.path_for(target);
        if !dir.join(CONNECTOR_FILE).is_file() {
            return Err(WorkspaceError::io(
                target,
                "export",
                format!("no {} in {}", CONNECTOR_FILE, dir.display()),
            ));
        }

        let file = File::create(dest).map_err(|e| WorkspaceError::io(target, "create bundle", e))?;
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for name in SHAREABLE_FILES {
            let path = dir.join(name);
            if !path.is_file() {
                continue;
            }
            let bytes = fs::read(&path).map_err(|e| WorkspaceError::io(target, name, e))?;
            zip.start_file(format!("{}/{}", target, name), options)
                .map_err(|e| WorkspaceError::io(target, "write bundle", e))?;
            zip.write_all(&bytes)
                .map_err(|e| WorkspaceError::io(target, "write bundle", e))?;
        }
        zip.finish()
            .map_err(|e| WorkspaceError::io(target, "finish bundle", e))?;

        info!("Exported {} to {}", target, dest.display());
        Ok(dest.to_path_buf())
    }
}

/// Target names become path components, so only identifier-safe names
/// are accepted.
fn check_target(target: &str) -> Result<(), WorkspaceError> {
    if is_safe_identifier(target) {
        Ok(())
    } else {
        Err(WorkspaceError::io(target, "invalid target name", "not identifier-safe"))
    }
}

fn write_workspace(dir: &Path, artifact: &GeneratedArtifact) -> io::Result<()> {
    fs::create_dir(dir)?;
    fs::write(dir.join(CONNECTOR_FILE), &artifact.connector_source)?;
    fs::write(dir.join(MANIFEST_FILE), artifact.manifest.render())?;
    fs::write(dir.join(README_FILE), &artifact.readme)?;
    fs::write(dir.join(GITIGNORE_FILE), format!("{}\n__pycache__/\n", CONFIG_FILE))?;
    write_private(&dir.join(CONFIG_FILE), artifact.config.render().as_bytes())
}

/// Create a file readable only by the owner.
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectorConfig, DependencyManifest, Secret};
    use std::collections::BTreeSet;

    fn artifact(source: &str) -> GeneratedArtifact {
        GeneratedArtifact {
            connector_source: source.to_string(),
            readme: "# readme\n".into(),
            manifest: DependencyManifest::default(),
            config: ConnectorConfig {
                url: "https://x.test/".into(),
                extraction_key: Some(Secret::new("fc-secret")),
            },
        }
    }

    fn file_set(dir: &Path) -> BTreeSet<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_materialize_writes_all_files() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path().join("connectors"));
        let path = manager.materialize_named("jobs", &artifact("print(1)\n")).unwrap();

        assert_eq!(path, tmp.path().join("connectors/jobs"));
        let files = file_set(&path);
        for name in SHAREABLE_FILES.iter().chain([CONFIG_FILE].iter()) {
            assert!(files.contains(*name), "missing {}", name);
        }
        let config = fs::read_to_string(path.join(CONFIG_FILE)).unwrap();
        assert!(config.contains("fc-secret"));
        assert!(fs::read_to_string(path.join(GITIGNORE_FILE))
            .unwrap()
            .contains(CONFIG_FILE));
    }

    #[cfg(unix)]
    #[test]
    fn test_config_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path());
        let path = manager.materialize_named("jobs", &artifact("x = 1\n")).unwrap();
        let mode = fs::metadata(path.join(CONFIG_FILE)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_regeneration_leaves_no_stale_files() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path());
        let path = manager.materialize_named("jobs", &artifact("v = 1\n")).unwrap();
        let first_files = file_set(&path);
        fs::write(path.join("stale_helper.py"), "old").unwrap();

        let path = manager.materialize_named("jobs", &artifact("v = 2\n")).unwrap();
        assert_eq!(file_set(&path), first_files);
        assert_eq!(fs::read_to_string(path.join(CONNECTOR_FILE)).unwrap(), "v = 2\n");

        // only the workspace itself remains under the root
        assert_eq!(file_set(tmp.path()), BTreeSet::from(["jobs".to_string()]));
    }

    #[test]
    fn test_materialize_while_locked_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path());
        let _lease = manager.lock("jobs").unwrap();

        let err = manager.materialize_named("jobs", &artifact("")).unwrap_err();
        assert_eq!(err.kind, WorkspaceErrorKind::Locked);
        assert!(manager.materialize_named("other", &artifact("")).is_ok());
    }

    #[test]
    fn test_lock_spans_managers_on_one_root() {
        let tmp = tempfile::tempdir().unwrap();
        let first = WorkspaceManager::new(tmp.path());
        let second = WorkspaceManager::new(tmp.path());

        let lease = first.lock("jobs").unwrap();
        fs::create_dir_all(tmp.path().join(".jobs.staging-inflight")).unwrap();

        let err = second.materialize_named("jobs", &artifact("")).unwrap_err();
        assert_eq!(err.kind, WorkspaceErrorKind::Locked);
        // the holder's staging directory is untouched
        assert!(tmp.path().join(".jobs.staging-inflight").exists());

        drop(lease);
        assert!(second.materialize_named("jobs", &artifact("")).is_ok());
    }

    #[test]
    fn test_unsafe_target_names_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path().join("ws"));
        fs::create_dir_all(tmp.path().join("outside")).unwrap();
        fs::write(tmp.path().join("outside").join(CONNECTOR_FILE), "x = 1\n").unwrap();

        for target in ["../outside", "/etc", ""] {
            let err = manager
                .export_bundle(target, &tmp.path().join("o.zip"))
                .unwrap_err();
            assert_eq!(err.kind, WorkspaceErrorKind::IoFailure);
            assert!(manager.summarize(target).is_err());
            assert!(manager.lock(target).is_err());
        }
        assert!(!tmp.path().join("o.zip").exists());
    }

    #[test]
    fn test_leftover_staging_is_swept() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path());
        fs::create_dir_all(tmp.path().join(".jobs.staging-dead")).unwrap();
        manager.materialize_named("jobs", &artifact("")).unwrap();
        assert!(!tmp.path().join(".jobs.staging-dead").exists());
    }

    #[test]
    fn test_list_and_export() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(tmp.path().join("ws"));
        assert!(manager.list().unwrap().is_empty());

        manager.materialize_named("b_target", &artifact("b\n")).unwrap();
        manager.materialize_named("a_target", &artifact("a\n")).unwrap();
        let list = manager.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].target_name, "a_target");
        assert_eq!(
            list[0].digest.as_deref(),
            Some(hex::encode(Sha256::digest(b"a\n")).as_str())
        );

        let bundle = tmp.path().join("a.zip");
        manager.export_bundle("a_target", &bundle).unwrap();
        let mut archive = zip::ZipArchive::new(File::open(&bundle).unwrap()).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"a_target/connector.py".to_string()));
        assert!(names.iter().all(|n| !n.ends_with(CONFIG_FILE)));

        assert!(manager.export_bundle("missing", &tmp.path().join("m.zip")).is_err());
    }
}
