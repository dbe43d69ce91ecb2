//! KMS (Key Management Service) capability interface
//!
//! The rotation engine never speaks a KMS protocol itself. It opens one
//! session per rotation cycle through a [`KmsConnector`] and drives it through
//! the narrow [`KmsSession`] surface below. Backends:
//! - [`crate::local_kms::LocalKms`], an in-process software KMS
//! - remote KMIP / cloud KMS clients implemented outside this crate
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


use crate::error::KmsError;
use crate::key_types::{KeyAlgorithm, KeyId, KeyMaterial, UsageMask};
use async_trait::async_trait;

pub type KmsResult<T> = Result<T, KmsError>;

/// Opens sessions against a KMS
#[async_trait]
pub trait KmsConnector: Send + Sync {
    /// Open a new session; fails with [`KmsError::Connection`] when the KMS is unreachable
    async fn open(&self) -> KmsResult<Box<dyn KmsSession>>;

    /// Backend name used in logs
    fn backend_name(&self) -> &str;
}

/// A single open KMS session, scoped to one rotation cycle
#[async_trait]
pub trait KmsSession: Send + Sync {
    /// Create a symmetric key
    async fn create_symmetric_key(
        &self,
        algorithm: KeyAlgorithm,
        bit_length: u32,
        usage_mask: UsageMask,
    ) -> KmsResult<KeyId>;

    /// Create an asymmetric key pair, returning `(public_id, private_id)`
    async fn create_key_pair(
        &self,
        algorithm: KeyAlgorithm,
        bit_length: u32,
        public_usage_mask: UsageMask,
        private_usage_mask: UsageMask,
    ) -> KmsResult<(KeyId, KeyId)>;

    /// Fetch the material of a key by identifier
    async fn fetch_material(&self, key_id: &KeyId) -> KmsResult<KeyMaterial>;

    /// Release the session
    async fn close(&self) -> KmsResult<()>;
}
