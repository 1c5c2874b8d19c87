// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Filesystem adapters for the Nudge ports.
//!
//! * [`FsConfigStore`] – JSON config blobs under the platform config dir.
//! * [`FsStorage`] – session records, one directory per project, one file
//!   per record.

use directories::ProjectDirs;
use nudge_app_core::config::{ConfigError, ConfigStore};
use nudge_app_core::storage::{RecordKey, Storage, StorageError, Versioned, WriteBatch};
use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "flyingrobots", "Nudge")
}

/// Store configs as JSON files under the platform config directory.
pub struct FsConfigStore {
    base: PathBuf,
}

impl FsConfigStore {
    /// Store rooted at the user config directory (e.g. `~/.config/Nudge`).
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = project_dirs()
            .ok_or_else(|| ConfigError::Other("could not resolve config dir".into()))?;
        Self::at(dirs.config_dir())
    }

    /// Store rooted at an explicit directory.
    pub fn at(base: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(format!("{key}.json"))
    }
}

impl ConfigStore for FsConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(ConfigError::NotFound),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        write_atomic(&self.path_for(key), data)?;
        Ok(())
    }
}

/// Default directory for session records (platform data dir).
pub fn default_data_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.data_dir().join("sessions"))
}

/// Session records on disk: `<base>/<scope>/<name>.json`.
///
/// Commits are serialized by an in-process lock. Each commit checks its read
/// revisions, writes every record to a sibling temp file, copies each record
/// it replaces to a sibling backup, and only then renames the temp files into
/// place. If any step fails, renames already made are undone from the backups
/// and the staged files are removed, so a failed commit changes no record.
pub struct FsStorage {
    base: PathBuf,
    commit_lock: Mutex<()>,
}

impl FsStorage {
    /// Open (creating if needed) a record directory.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        Ok(Self {
            base,
            commit_lock: Mutex::new(()),
        })
    }

    /// Root directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn path_for(&self, key: &RecordKey) -> PathBuf {
        self.base
            .join(encode_segment(&key.scope))
            .join(format!("{}.json", key.name))
    }
}

/// Make an arbitrary scope safe as a single path segment.
fn encode_segment(scope: &str) -> String {
    let mut out = String::with_capacity(scope.len());
    for b in scope.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_') {
            out.push(char::from(b));
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    if out.is_empty() {
        out.push('%');
    }
    out
}

fn read_versioned(path: &Path) -> Result<Option<Versioned>, StorageError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(Versioned::new(bytes))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StorageError::Io(err)),
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

fn temp_path(path: &Path) -> PathBuf {
    sibling(path, ".tmp")
}

fn backup_path(path: &Path) -> PathBuf {
    sibling(path, ".bak")
}

/// One record of a commit, written to disk but not yet in place.
struct Staged {
    path: PathBuf,
    tmp: PathBuf,
    /// Copy of the record being replaced; `None` when it did not exist.
    backup: Option<PathBuf>,
}

impl Staged {
    fn write(path: PathBuf, bytes: &[u8]) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = temp_path(&path);
        if let Err(err) = fs::write(&tmp, bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        let backup = backup_path(&path);
        let backup = match fs::copy(&path, &backup) {
            Ok(_) => Some(backup),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                let _ = fs::remove_file(&tmp);
                return Err(err);
            }
        };
        Ok(Self { path, tmp, backup })
    }

    /// Drop the staged files without touching the record.
    fn discard(&self) {
        let _ = fs::remove_file(&self.tmp);
        if let Some(backup) = &self.backup {
            let _ = fs::remove_file(backup);
        }
    }

    /// Put the replaced record back after its temp file was renamed in.
    fn restore(&self) {
        let restored = match &self.backup {
            Some(backup) => fs::rename(backup, &self.path),
            None => fs::remove_file(&self.path),
        };
        if let Err(err) = restored {
            warn!(path = %self.path.display(), %err, "commit rollback failed");
        }
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}

impl Storage for FsStorage {
    fn read(&self, key: &RecordKey) -> Result<Option<Versioned>, StorageError> {
        read_versioned(&self.path_for(key))
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, expected) in &batch.expect {
            let current = read_versioned(&self.path_for(key))?.map(|v| v.revision);
            if current != *expected {
                return Err(StorageError::Conflict(key.clone()));
            }
        }

        let mut staged: Vec<Staged> = Vec::with_capacity(batch.puts.len());
        for (key, bytes) in &batch.puts {
            match Staged::write(self.path_for(key), bytes) {
                Ok(record) => staged.push(record),
                Err(err) => {
                    staged.iter().for_each(Staged::discard);
                    return Err(StorageError::Io(err));
                }
            }
        }
        for (done, record) in staged.iter().enumerate() {
            if let Err(err) = fs::rename(&record.tmp, &record.path) {
                let (placed, pending) = staged.split_at(done);
                placed.iter().rev().for_each(Staged::restore);
                pending.iter().for_each(Staged::discard);
                return Err(StorageError::Io(err));
            }
        }
        for record in &staged {
            if let Some(backup) = &record.backup {
                let _ = fs::remove_file(backup);
            }
        }
        debug!(records = batch.puts.len(), "fs commit");
        Ok(())
    }
}
