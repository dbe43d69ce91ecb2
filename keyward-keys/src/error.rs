//! Error types for key rotation
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


use crate::key_types::KeyId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a KMS connector or session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KmsError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transient KMS error: {0}")]
    Transient(String),

    #[error("Key not found in KMS: {0}")]
    NotFound(String),

    #[error("KMS denied request: {0}")]
    Denied(String),

    #[error("KMS call timed out after {0:?}")]
    Timeout(Duration),
}

impl KmsError {
    /// Only transient failures are retried within a cycle
    pub fn is_transient(&self) -> bool {
        matches!(self, KmsError::Transient(_))
    }

    pub fn reason(&self) -> FailureReason {
        match self {
            KmsError::Connection(_) => FailureReason::ConnectionError,
            KmsError::Transient(_) => FailureReason::KmsTransientExhausted,
            KmsError::NotFound(_) => FailureReason::KmsNotFound,
            KmsError::Denied(_) => FailureReason::KmsDenied,
            KmsError::Timeout(_) => FailureReason::Timeout,
        }
    }
}

/// Local key storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Invalid key name: {0}")]
    InvalidName(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Storage task failed: {0}")]
    Task(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Rotation ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Ledger append timed out after {0:?}")]
    Timeout(Duration),
}

/// Stable reason code written to the ledger for a failed cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ConnectionError,
    KmsTransientExhausted,
    KmsNotFound,
    KmsDenied,
    Timeout,
    StorageError,
    LedgerError,
    Internal,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ConnectionError => "connection_error",
            FailureReason::KmsTransientExhausted => "kms_transient_exhausted",
            FailureReason::KmsNotFound => "kms_not_found",
            FailureReason::KmsDenied => "kms_denied",
            FailureReason::Timeout => "timeout",
            FailureReason::StorageError => "storage_error",
            FailureReason::LedgerError => "ledger_error",
            FailureReason::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a rotation cycle ended in the `Failed` state
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("KMS error: {0}")]
    Kms(#[from] KmsError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CycleError {
    pub fn reason(&self) -> FailureReason {
        match self {
            CycleError::Kms(e) => e.reason(),
            CycleError::Storage(StorageError::Timeout(_)) => FailureReason::Timeout,
            CycleError::Storage(_) => FailureReason::StorageError,
            CycleError::Ledger(LedgerError::Timeout(_)) => FailureReason::Timeout,
            CycleError::Ledger(_) => FailureReason::LedgerError,
            CycleError::Internal(_) => FailureReason::Internal,
        }
    }
}

/// A failed cycle together with the KMS identifiers it left without a local artifact
#[derive(Debug)]
pub struct CycleFailure {
    pub stage: crate::engine::CycleState,
    pub error: CycleError,
    pub orphaned_key_ids: Vec<KeyId>,
}

impl CycleFailure {
    pub fn reason(&self) -> FailureReason {
        self.error.reason()
    }
}

impl fmt::Display for CycleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} during {}: {}", self.reason(), self.stage, self.error)
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
pub type LedgerResult<T> = Result<T, LedgerError>;
