//! File-backed key store
//!
//! Layout for a key name `app-key.key` under the storage directory:
//! - `app-key.key`: the current version, the only file consumers read
//! - `app-key.key.20250301120000`: retired versions, UTC retirement time
//! - `app-key.key.20250301120000-1`: same-second retirement, sequence suffix
//! - `.app-key.key.XXXXXX.tmp`: staging file, never visible under the key name
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::{StorageError, StorageResult};
use crate::key_types::KeyMaterial;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const RETIRED_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// A retired key version found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetiredArtifact {
    pub path: PathBuf,
    pub retired_at: DateTime<Utc>,
    /// Disambiguates retirements within the same second
    pub sequence: u32,
}

/// Outcome of a retention pass
#[derive(Debug, Default)]
pub struct PruneReport {
    pub kept: usize,
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Key material written to a staging file, not yet visible under its key name
///
/// Dropping a staged artifact removes the staging file.
pub struct StagedArtifact<'a> {
    store: &'a KeyStore,
    name: String,
    temp: NamedTempFile,
}

impl StagedArtifact<'_> {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Publish the staged file as the current version of its key
    ///
    /// When old keys are kept, the previous current file is linked to its
    /// retired name first, so the canonical name is never absent.
    pub fn publish(self, at: DateTime<Utc>) -> StorageResult<PathBuf> {
        let current = self.store.root.join(&self.name);

        if self.store.keep_old {
            match fs::symlink_metadata(&current) {
                Ok(_) => {
                    let retired = self.store.retired_path_for(&self.name, at);
                    preserve(&current, &retired)?;
                    info!(
                        key_name = %self.name,
                        retired_path = %retired.display(),
                        "Previous key retired"
                    );
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::io(&current, e)),
            }
        }

        self.temp
            .persist(&current)
            .map_err(|e| StorageError::io(&current, e.error))?;
        sync_dir(&self.store.root);

        info!(
            key_name = %self.name,
            path = %current.display(),
            "Key written"
        );
        Ok(current)
    }
}

/// On-disk store of key versions for logical key names
#[derive(Debug, Clone)]
pub struct KeyStore {
    root: PathBuf,
    keep_old: bool,
}

impl KeyStore {
    /// Open a key store rooted at `root`, creating the directory if needed
    ///
    /// # Arguments
    /// * `root` - Directory holding current and retired key files
    /// * `keep_old` - Retire the previous current file instead of overwriting it
    pub fn open<P: AsRef<Path>>(root: P, keep_old: bool) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| StorageError::io(&root, e))?;

        debug!(root = %root.display(), keep_old, "Key store opened");
        Ok(Self { root, keep_old })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn keeps_old(&self) -> bool {
        self.keep_old
    }

    /// Canonical path of the current version of `name`
    pub fn current_path(&self, name: &str) -> StorageResult<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    /// Write `material` as the new current version of `name`
    pub fn commit(&self, name: &str, material: &KeyMaterial) -> StorageResult<PathBuf> {
        self.commit_at(name, material, Utc::now())
    }

    /// [`KeyStore::commit`] with an explicit retirement timestamp
    pub fn commit_at(
        &self,
        name: &str,
        material: &KeyMaterial,
        at: DateTime<Utc>,
    ) -> StorageResult<PathBuf> {
        self.stage(name, material)?.publish(at)
    }

    /// Write `material` to a flushed staging file next to the current version
    pub fn stage(&self, name: &str, material: &KeyMaterial) -> StorageResult<StagedArtifact<'_>> {
        validate_name(name)?;

        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", name))
            .suffix(".tmp")
            .tempfile_in(&self.root)
            .map_err(|e| StorageError::io(&self.root, e))?;

        let temp_path = temp.path().to_path_buf();
        temp.write_all(material.as_bytes())
            .map_err(|e| StorageError::io(&temp_path, e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| StorageError::io(&temp_path, e))?;

        Ok(StagedArtifact {
            store: self,
            name: name.to_string(),
            temp,
        })
    }

    /// Read the current version of `name`
    pub fn read_current(&self, name: &str) -> StorageResult<KeyMaterial> {
        let path = self.current_path(name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(KeyMaterial::new(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(name.to_string())),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    /// Retired versions of `name`, newest first
    pub fn retired(&self, name: &str) -> StorageResult<Vec<RetiredArtifact>> {
        validate_name(name)?;

        let entries = fs::read_dir(&self.root).map_err(|e| StorageError::io(&self.root, e))?;
        let prefix = format!("{}.", name);
        let mut retired = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&self.root, e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(suffix) = file_name.strip_prefix(&prefix) else {
                continue;
            };
            match parse_retired_suffix(suffix) {
                Some((retired_at, sequence)) => retired.push(RetiredArtifact {
                    path: entry.path(),
                    retired_at,
                    sequence,
                }),
                None => {
                    debug!(file = file_name, "Ignoring file with unrecognised suffix");
                }
            }
        }

        retired.sort_by(|a, b| {
            b.retired_at
                .cmp(&a.retired_at)
                .then(b.sequence.cmp(&a.sequence))
        });
        Ok(retired)
    }

    /// Delete retired versions of `name` beyond the newest `retention_count`
    ///
    /// Individual deletion failures are logged and reported, they do not stop the pass.
    pub fn prune(&self, name: &str, retention_count: usize) -> StorageResult<PruneReport> {
        let retired = self.retired(name)?;
        let mut report = PruneReport {
            kept: retired.len().min(retention_count),
            ..Default::default()
        };

        for artifact in retired.into_iter().skip(retention_count) {
            match fs::remove_file(&artifact.path) {
                Ok(()) => {
                    info!(path = %artifact.path.display(), "Removed old key");
                    report.removed.push(artifact.path);
                }
                Err(e) => {
                    warn!(
                        path = %artifact.path.display(),
                        error = %e,
                        "Failed to remove old key"
                    );
                    report.failed.push((artifact.path, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// First free retired path for `name` retired at `at`
    fn retired_path_for(&self, name: &str, at: DateTime<Utc>) -> PathBuf {
        let base = format!("{}.{}", name, at.format(RETIRED_TIMESTAMP_FORMAT));
        let candidate = self.root.join(&base);
        if !candidate.exists() {
            return candidate;
        }

        let mut sequence = 1u32;
        loop {
            let candidate = self.root.join(format!("{}-{}", base, sequence));
            if !candidate.exists() {
                return candidate;
            }
            sequence += 1;
        }
    }
}

fn validate_name(name: &str) -> StorageResult<()> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn parse_retired_suffix(suffix: &str) -> Option<(DateTime<Utc>, u32)> {
    let (timestamp, sequence) = match suffix.split_once('-') {
        Some((timestamp, sequence)) => (timestamp, sequence.parse().ok()?),
        None => (suffix, 0),
    };
    if timestamp.len() != 14 || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(timestamp, RETIRED_TIMESTAMP_FORMAT).ok()?;
    Some((naive.and_utc(), sequence))
}

/// Keep the bytes of `current` reachable at `retired` without removing `current`
fn preserve(current: &Path, retired: &Path) -> StorageResult<()> {
    match fs::hard_link(current, retired) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(error = %e, "Hard link failed, copying previous key instead");
            fs::copy(current, retired)
                .map(|_| ())
                .map_err(|e| StorageError::io(retired, e))
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        warn!(dir = %dir.display(), error = %e, "Failed to sync key directory");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
