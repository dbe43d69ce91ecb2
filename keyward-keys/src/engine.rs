//! Rotation engine
//!
//! One tick consults the ledger and the rotation policy and, when rotation is
//! due, runs a full cycle:
//!
//! ```text
//! Idle -> CreatingKey -> FetchingMaterial -> Committing -> AppendingLedger -> Pruning -> Idle
//!              \______________\__________________\_____________\_____________> Failed -> Idle
//! ```
//!
//! A cycle opens exactly one KMS session and closes it before returning,
//! whatever the outcome. Failures are contained here: they are logged,
//! recorded in the ledger when possible and never propagate to the scheduler.
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


use crate::encoding::{encode_pem, KeyHalf};
use crate::error::{CycleError, CycleFailure, KmsError, LedgerError, StorageError};
use crate::key_store::KeyStore;
use crate::key_types::{KeyId, KeyMaterial, KeyVersion};
use crate::kms::{KmsConnector, KmsResult, KmsSession};
use crate::ledger::{RotationEvent, RotationLedger};
use crate::policy::RotationPolicy;
use crate::retry::retry_with_backoff;
use crate::settings::RotationSettings;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Rotation cycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    CreatingKey,
    FetchingMaterial,
    Committing,
    AppendingLedger,
    Pruning,
    Failed,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::CreatingKey => "creating_key",
            CycleState::FetchingMaterial => "fetching_material",
            CycleState::Committing => "committing",
            CycleState::AppendingLedger => "appending_ledger",
            CycleState::Pruning => "pruning",
            CycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Summary of a successful cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    /// Committed artifacts, primary key first
    pub versions: Vec<KeyVersion>,
    /// Retired files removed by retention
    pub pruned: usize,
}

/// What a tick did
#[derive(Debug)]
pub enum TickOutcome {
    NotDue {
        last_success: Option<DateTime<Utc>>,
        next_due: Option<DateTime<Utc>>,
    },
    Rotated(CycleReport),
    Failed(CycleFailure),
}

impl TickOutcome {
    pub fn is_rotated(&self) -> bool {
        matches!(self, TickOutcome::Rotated(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TickOutcome::Failed(_))
    }
}

/// A key created in the KMS and the store name it is destined for
struct IssuedKey {
    name: String,
    key_id: KeyId,
    half: Option<KeyHalf>,
}

/// Bookkeeping shared between a cycle and its failure path
#[derive(Default)]
struct CycleProgress {
    issued: Vec<IssuedKey>,
    committed: Vec<KeyVersion>,
}

impl CycleProgress {
    /// Issued keys that have no committed artifact
    fn orphaned(&self) -> Vec<KeyId> {
        self.issued
            .iter()
            .filter(|k| !self.committed.iter().any(|v| v.key_id == k.key_id))
            .map(|k| k.key_id.clone())
            .collect()
    }
}

/// Drives rotation cycles for one logical key name
pub struct RotationEngine {
    settings: RotationSettings,
    policy: RotationPolicy,
    connector: Arc<dyn KmsConnector>,
    store: KeyStore,
    ledger: Arc<RotationLedger>,
    state: CycleState,
}

impl RotationEngine {
    pub fn new(
        settings: RotationSettings,
        connector: Arc<dyn KmsConnector>,
        store: KeyStore,
        ledger: Arc<RotationLedger>,
    ) -> Self {
        Self {
            policy: RotationPolicy::new(settings.interval_hours),
            settings,
            connector,
            store,
            ledger,
            state: CycleState::Idle,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn settings(&self) -> &RotationSettings {
        &self.settings
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    pub fn ledger(&self) -> &RotationLedger {
        &self.ledger
    }

    /// Rotate if due at the current time
    pub async fn tick(&mut self) -> TickOutcome {
        self.tick_at(Utc::now()).await
    }

    /// Rotate if due at `now`
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let last_success = self.ledger.last_success(&self.settings.key_name).await;

        if !self.policy.is_due(last_success, now) {
            let next_due = self.policy.next_due(last_success);
            debug!(
                key_name = %self.settings.key_name,
                last_success = ?last_success,
                next_due = ?next_due,
                "Rotation not due"
            );
            return TickOutcome::NotDue {
                last_success,
                next_due,
            };
        }

        self.rotate_at(now).await
    }

    /// Run one rotation cycle regardless of the policy
    pub async fn rotate_at(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let cycle_id = Uuid::new_v4();
        info!(
            cycle_id = %cycle_id,
            key_name = %self.settings.key_name,
            backend = self.connector.backend_name(),
            "Starting key rotation cycle"
        );

        self.transition(CycleState::CreatingKey);
        let session = match self.with_timeout(self.connector.open()).await {
            Ok(session) => session,
            Err(e) => {
                let failure = CycleFailure {
                    stage: CycleState::CreatingKey,
                    error: CycleError::Kms(e),
                    orphaned_key_ids: Vec::new(),
                };
                return self.fail(cycle_id, now, failure).await;
            }
        };
        debug!(cycle_id = %cycle_id, "KMS session opened");

        let mut progress = CycleProgress::default();
        let result = AssertUnwindSafe(self.run_cycle(session.as_ref(), cycle_id, now, &mut progress))
            .catch_unwind()
            .await;

        self.close_session(session, cycle_id).await;

        match result {
            Ok(Ok(report)) => {
                self.transition(CycleState::Idle);
                info!(
                    cycle_id = %cycle_id,
                    key_name = %self.settings.key_name,
                    artifacts = report.versions.len(),
                    pruned = report.pruned,
                    "Key rotation completed successfully"
                );
                TickOutcome::Rotated(report)
            }
            Ok(Err(failure)) => self.fail(cycle_id, now, failure).await,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                let failure = CycleFailure {
                    stage: self.state,
                    error: CycleError::Internal(format!("cycle panicked: {}", message)),
                    orphaned_key_ids: progress.orphaned(),
                };
                self.fail(cycle_id, now, failure).await
            }
        }
    }

    async fn run_cycle(
        &mut self,
        session: &dyn KmsSession,
        cycle_id: Uuid,
        now: DateTime<Utc>,
        progress: &mut CycleProgress,
    ) -> Result<CycleReport, CycleFailure> {
        // CreatingKey
        let settings = self.settings.clone();
        let key_id = self
            .kms_call("create_symmetric_key", || {
                session.create_symmetric_key(settings.algorithm, settings.bit_length, settings.usage_mask)
            })
            .await
            .map_err(|e| Self::failure(CycleState::CreatingKey, e, progress))?;
        info!(
            cycle_id = %cycle_id,
            key_id = %key_id,
            algorithm = %settings.algorithm,
            bit_length = settings.bit_length,
            "New symmetric key created"
        );
        progress.issued.push(IssuedKey {
            name: settings.key_name.clone(),
            key_id,
            half: None,
        });

        if let Some(pair) = &settings.key_pair {
            let (public_id, private_id) = self
                .kms_call("create_key_pair", || {
                    session.create_key_pair(
                        pair.algorithm,
                        pair.bit_length,
                        pair.public_usage_mask,
                        pair.private_usage_mask,
                    )
                })
                .await
                .map_err(|e| Self::failure(CycleState::CreatingKey, e, progress))?;
            info!(
                cycle_id = %cycle_id,
                public_key_id = %public_id,
                private_key_id = %private_id,
                algorithm = %pair.algorithm,
                bit_length = pair.bit_length,
                "New key pair created"
            );
            progress.issued.push(IssuedKey {
                name: pair.public_key_name.clone(),
                key_id: public_id,
                half: Some(KeyHalf::Public),
            });
            progress.issued.push(IssuedKey {
                name: pair.private_key_name.clone(),
                key_id: private_id,
                half: Some(KeyHalf::Private),
            });
        }

        // FetchingMaterial: keys are never re-created once issued
        self.transition(CycleState::FetchingMaterial);
        let mut fetched = Vec::with_capacity(progress.issued.len());
        for issued in &progress.issued {
            let key_id = &issued.key_id;
            let material = match self
                .kms_call("fetch_material", || session.fetch_material(key_id))
                .await
            {
                Ok(material) => material,
                Err(e) => return Err(Self::failure(CycleState::FetchingMaterial, e, progress)),
            };
            info!(
                cycle_id = %cycle_id,
                key_id = %key_id,
                bytes = material.len(),
                "Key material fetched"
            );
            let material = match issued.half {
                Some(half) => encode_pem(&material, half),
                None => material,
            };
            fetched.push((issued.name.clone(), key_id.clone(), material));
        }

        // Committing
        self.transition(CycleState::Committing);
        for (name, key_id, material) in fetched {
            let artifact_path = self
                .commit(name.clone(), material, now)
                .await
                .map_err(|e| Self::failure(CycleState::Committing, e, progress))?;
            info!(
                cycle_id = %cycle_id,
                key_name = %name,
                key_id = %key_id,
                path = %artifact_path.display(),
                "Key committed"
            );
            progress.committed.push(KeyVersion {
                key_id,
                created_at: now,
                artifact_path,
            });
        }

        // AppendingLedger: the cycle is durable once every success is recorded
        self.transition(CycleState::AppendingLedger);
        let names: Vec<String> = settings.artifact_names().iter().map(|n| n.to_string()).collect();
        // Primary key last: its success entry is what moves the rotation clock
        for (name, version) in names.iter().zip(&progress.committed).rev() {
            let event = RotationEvent::success(
                now,
                cycle_id,
                name.clone(),
                version.key_id.clone(),
                version.artifact_path.clone(),
            );
            self.append(&event)
                .await
                .map_err(|e| Self::failure(CycleState::AppendingLedger, e, progress))?;
        }
        info!(
            cycle_id = %cycle_id,
            events = progress.committed.len(),
            ledger = %self.ledger.path().display(),
            "Rotation recorded in ledger"
        );

        // Pruning: best effort
        let pruned = if self.store.keeps_old() {
            self.transition(CycleState::Pruning);
            let mut pruned = 0;
            for name in &names {
                pruned += self.prune(name, cycle_id).await;
            }
            pruned
        } else {
            0
        };

        Ok(CycleReport {
            cycle_id,
            versions: progress.committed.clone(),
            pruned,
        })
    }

    fn failure(stage: CycleState, error: impl Into<CycleError>, progress: &CycleProgress) -> CycleFailure {
        CycleFailure {
            stage,
            error: error.into(),
            orphaned_key_ids: progress.orphaned(),
        }
    }

    async fn fail(&mut self, cycle_id: Uuid, now: DateTime<Utc>, failure: CycleFailure) -> TickOutcome {
        self.transition(CycleState::Failed);
        let key_name = &self.settings.key_name;
        let reason = failure.reason();

        match failure.stage {
            CycleState::FetchingMaterial | CycleState::Committing if !failure.orphaned_key_ids.is_empty() => {
                error!(
                    cycle_id = %cycle_id,
                    key_name = %key_name,
                    stage = %failure.stage,
                    reason = %reason,
                    error = %failure.error,
                    orphaned_key_ids = ?failure.orphaned_key_ids,
                    "Key rotation failed; keys created in the KMS have no local artifact"
                );
            }
            CycleState::AppendingLedger => {
                error!(
                    cycle_id = %cycle_id,
                    key_name = %key_name,
                    stage = %failure.stage,
                    reason = %reason,
                    error = %failure.error,
                    "Key rotation failed; key file committed but not recorded in the ledger, next check may rotate again"
                );
            }
            _ => {
                error!(
                    cycle_id = %cycle_id,
                    key_name = %key_name,
                    stage = %failure.stage,
                    reason = %reason,
                    error = %failure.error,
                    "Key rotation failed"
                );
            }
        }

        let event = RotationEvent {
            key_id: failure.orphaned_key_ids.first().cloned(),
            orphaned_key_ids: failure.orphaned_key_ids.clone(),
            ..RotationEvent::failure(
                now,
                cycle_id,
                key_name.clone(),
                reason,
                failure.stage.to_string(),
                failure.error.to_string(),
            )
        };
        if let Err(e) = self.append(&event).await {
            warn!(cycle_id = %cycle_id, error = %e, "Could not record failed rotation in ledger");
        }

        self.transition(CycleState::Idle);
        TickOutcome::Failed(failure)
    }

    fn transition(&mut self, state: CycleState) {
        debug!(from = %self.state, to = %state, "Rotation state change");
        self.state = state;
    }

    async fn with_timeout<T, Fut>(&self, fut: Fut) -> KmsResult<T>
    where
        Fut: Future<Output = KmsResult<T>>,
    {
        let limit = self.settings.operation_timeout;
        timeout(limit, fut).await.map_err(|_| KmsError::Timeout(limit))?
    }

    /// Bounded, retried KMS call; only transient errors are retried
    async fn kms_call<T, F, Fut>(&self, operation: &str, mut f: F) -> KmsResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = KmsResult<T>>,
    {
        retry_with_backoff(
            &self.settings.retry,
            operation,
            || self.with_timeout(f()),
            KmsError::is_transient,
        )
        .await
    }

    async fn close_session(&self, session: Box<dyn KmsSession>, cycle_id: Uuid) {
        match self.with_timeout(session.close()).await {
            Ok(()) => debug!(cycle_id = %cycle_id, "KMS session closed"),
            Err(e) => warn!(cycle_id = %cycle_id, error = %e, "Failed to close KMS session"),
        }
    }

    async fn commit(&self, name: String, material: KeyMaterial, at: DateTime<Utc>) -> Result<PathBuf, StorageError> {
        let store = self.store.clone();
        let limit = self.settings.operation_timeout;
        let key_name = name.clone();
        let task = tokio::task::spawn_blocking(move || store.commit_at(&name, &material, at));

        match timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(StorageError::Task(e.to_string())),
            Err(_) => {
                warn!(
                    key_name = %key_name,
                    timeout_ms = limit.as_millis() as u64,
                    "Key commit timed out but the write is still running; it may still replace the current key without a ledger entry"
                );
                Err(StorageError::Timeout(limit))
            }
        }
    }

    async fn append(&self, event: &RotationEvent) -> Result<(), LedgerError> {
        let limit = self.settings.operation_timeout;
        timeout(limit, self.ledger.append(event))
            .await
            .map_err(|_| LedgerError::Timeout(limit))?
    }

    async fn prune(&self, name: &str, cycle_id: Uuid) -> usize {
        let store = self.store.clone();
        let retention = self.settings.retention_count;
        let owned_name = name.to_string();
        let task = tokio::task::spawn_blocking(move || store.prune(&owned_name, retention));

        match timeout(self.settings.operation_timeout, task).await {
            Ok(Ok(Ok(report))) => {
                info!(
                    cycle_id = %cycle_id,
                    key_name = name,
                    removed = report.removed.len(),
                    kept = report.kept,
                    failed = report.failed.len(),
                    "Pruned old keys"
                );
                report.removed.len()
            }
            Ok(Ok(Err(e))) => {
                warn!(cycle_id = %cycle_id, key_name = name, error = %e, "Pruning old keys failed");
                0
            }
            Ok(Err(e)) => {
                warn!(cycle_id = %cycle_id, key_name = name, error = %e, "Pruning task failed");
                0
            }
            Err(_) => {
                warn!(cycle_id = %cycle_id, key_name = name, "Pruning old keys timed out");
                0
            }
        }
    }
}
