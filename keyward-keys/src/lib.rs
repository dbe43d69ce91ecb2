//! Key rotation for Keyward
//!
//! Rotates key material issued by a KMS on a schedule, keeps the current key
//! and a bounded window of retired versions on disk, and records every
//! rotation attempt in an append-only ledger.
//!
//! Operational constraint: one engine per key name. Two processes rotating
//! the same key store or ledger concurrently are not coordinated.
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


pub mod encoding;
pub mod engine;
pub mod error;
pub mod key_store;
pub mod key_types;
pub mod kms;
pub mod ledger;
pub mod local_kms;
pub mod policy;
pub mod retry;
pub mod scheduler;
pub mod settings;

pub use engine::{CycleReport, CycleState, RotationEngine, TickOutcome};
pub use error::{CycleError, CycleFailure, FailureReason, KmsError, LedgerError, StorageError};
pub use key_store::{KeyStore, PruneReport, RetiredArtifact};
pub use key_types::{KeyAlgorithm, KeyId, KeyMaterial, KeyUsage, KeyVersion, UsageMask};
pub use kms::{KmsConnector, KmsSession};
pub use ledger::{Outcome, RotationEvent, RotationLedger};
pub use local_kms::LocalKms;
pub use policy::RotationPolicy;
pub use retry::RetryConfig;
pub use scheduler::{Scheduler, SchedulerSummary};
pub use settings::{KeyPairSettings, RotationSettings, SchedulerSettings};
