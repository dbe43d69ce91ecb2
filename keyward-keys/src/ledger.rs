//! Append-only rotation ledger
//!
//! One JSON object per line. The ledger is the only record of when a key was
//! last rotated successfully; the key files themselves carry no metadata.
//!
//! A missing ledger, an unreadable ledger and unparseable lines all read as
//! "no successful rotation recorded". This forces a rotation instead of
//! stalling the schedule, at the cost of a possibly spurious rotation after
//! ledger damage.
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


use crate::error::{FailureReason, LedgerError, LedgerResult};
use crate::key_types::KeyId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Result of one rotation attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure {
        reason: FailureReason,
        stage: String,
        detail: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// One ledger line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationEvent {
    pub timestamp: DateTime<Utc>,
    /// Groups the events written by one rotation cycle
    pub cycle_id: Uuid,
    pub key_name: String,
    pub key_id: Option<KeyId>,
    pub artifact_path: Option<PathBuf>,
    pub outcome: Outcome,
    /// Keys created in the KMS that never reached local storage
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orphaned_key_ids: Vec<KeyId>,
}

impl RotationEvent {
    pub fn success(
        timestamp: DateTime<Utc>,
        cycle_id: Uuid,
        key_name: impl Into<String>,
        key_id: KeyId,
        artifact_path: PathBuf,
    ) -> Self {
        Self {
            timestamp,
            cycle_id,
            key_name: key_name.into(),
            key_id: Some(key_id),
            artifact_path: Some(artifact_path),
            outcome: Outcome::Success,
            orphaned_key_ids: Vec::new(),
        }
    }

    pub fn failure(
        timestamp: DateTime<Utc>,
        cycle_id: Uuid,
        key_name: impl Into<String>,
        reason: FailureReason,
        stage: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            cycle_id,
            key_name: key_name.into(),
            key_id: None,
            artifact_path: None,
            outcome: Outcome::Failure {
                reason,
                stage: stage.into(),
                detail: detail.into(),
            },
            orphaned_key_ids: Vec::new(),
        }
    }
}

/// File-backed rotation ledger
///
/// Single writer: appends from one process are serialized through an internal
/// lock, but two processes appending to the same file are not coordinated.
pub struct RotationLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl RotationLedger {
    /// Open a ledger, creating its parent directory
    pub async fn open<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| LedgerError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event and fsync before returning
    ///
    /// A torn final line left by an earlier failed write is terminated first,
    /// so it never swallows the new event.
    pub async fn append(&self, event: &RotationEvent) -> LedgerResult<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_line(&path, &line))
            .await
            .map_err(|e| LedgerError::Io {
                path: self.path.clone(),
                source: std::io::Error::new(ErrorKind::Other, e),
            })?
            .map_err(|e| LedgerError::Io {
                path: self.path.clone(),
                source: e,
            })?;

        debug!(
            ledger = %self.path.display(),
            key_name = %event.key_name,
            success = event.outcome.is_success(),
            "Ledger event appended"
        );
        Ok(())
    }

    /// All parseable events, oldest first
    pub async fn events(&self) -> LedgerResult<Vec<RotationEvent>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(LedgerError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let mut events = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RotationEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(
                        ledger = %self.path.display(),
                        line = index + 1,
                        error = %e,
                        "Skipping unparseable ledger line"
                    );
                }
            }
        }
        Ok(events)
    }

    /// Timestamp of the most recent successful rotation of `key_name`
    pub async fn last_success(&self, key_name: &str) -> Option<DateTime<Utc>> {
        let events = match self.events().await {
            Ok(events) => events,
            Err(e) => {
                warn!(
                    ledger = %self.path.display(),
                    error = %e,
                    "Ledger unreadable, treating as no prior rotation"
                );
                return None;
            }
        };

        events
            .iter()
            .filter(|e| e.key_name == key_name && e.outcome.is_success())
            .map(|e| e.timestamp)
            .max()
    }
}

fn append_line(path: &Path, line: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;

    if file.metadata()?.len() > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            file.write_all(b"\n")?;
        }
    }

    file.write_all(line)?;
    file.sync_all()
}
