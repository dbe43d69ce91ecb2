//! In-process software KMS
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
use crate::kms::{KmsConnector, KmsResult, KmsSession};
use async_trait::async_trait;
use rand::RngCore;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

const RSA_MIN_BITS: u32 = 1024;
const RSA_MAX_BITS: u32 = 8192;

struct StoredKey {
    algorithm: KeyAlgorithm,
    usage_mask: UsageMask,
    material: KeyMaterial,
}

/// Software KMS generating key material in process
///
/// Issued keys live in memory for the lifetime of the connector and can be
/// fetched from any session it opens. Symmetric material comes from the OS
/// RNG; RSA pairs are returned as SubjectPublicKeyInfo / PKCS#8 DER.
#[derive(Clone, Default)]
pub struct LocalKms {
    keys: Arc<RwLock<HashMap<KeyId, StoredKey>>>,
}

impl LocalKms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys issued so far
    pub async fn key_count(&self) -> usize {
        self.keys.read().await.len()
    }
}

#[async_trait]
impl KmsConnector for LocalKms {
    async fn open(&self) -> KmsResult<Box<dyn KmsSession>> {
        debug!("Opening local KMS session");
        Ok(Box::new(LocalKmsSession {
            keys: Arc::clone(&self.keys),
            closed: AtomicBool::new(false),
        }))
    }

    fn backend_name(&self) -> &str {
        "local"
    }
}

struct LocalKmsSession {
    keys: Arc<RwLock<HashMap<KeyId, StoredKey>>>,
    closed: AtomicBool,
}

impl LocalKmsSession {
    fn ensure_open(&self) -> KmsResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KmsError::Connection("session is closed".to_string()));
        }
        Ok(())
    }

    async fn insert(&self, algorithm: KeyAlgorithm, usage_mask: UsageMask, material: KeyMaterial) -> KeyId {
        let key_id = Uuid::new_v4().to_string();
        self.keys.write().await.insert(
            key_id.clone(),
            StoredKey {
                algorithm,
                usage_mask,
                material,
            },
        );
        key_id
    }
}

#[async_trait]
impl KmsSession for LocalKmsSession {
    async fn create_symmetric_key(
        &self,
        algorithm: KeyAlgorithm,
        bit_length: u32,
        usage_mask: UsageMask,
    ) -> KmsResult<KeyId> {
        self.ensure_open()?;
        if algorithm != KeyAlgorithm::Aes {
            return Err(KmsError::Denied(format!("{} is not a symmetric algorithm", algorithm)));
        }
        if !matches!(bit_length, 128 | 192 | 256) {
            return Err(KmsError::Denied(format!("unsupported AES key length {}", bit_length)));
        }
        if usage_mask.is_empty() {
            return Err(KmsError::Denied("empty usage mask".to_string()));
        }

        let mut bytes = vec![0u8; (bit_length / 8) as usize];
        rand::thread_rng().fill_bytes(&mut bytes);

        let key_id = self.insert(algorithm, usage_mask, KeyMaterial::new(bytes)).await;
        info!(key_id = %key_id, %algorithm, bit_length, "Local KMS created symmetric key");
        Ok(key_id)
    }

    async fn create_key_pair(
        &self,
        algorithm: KeyAlgorithm,
        bit_length: u32,
        public_usage_mask: UsageMask,
        private_usage_mask: UsageMask,
    ) -> KmsResult<(KeyId, KeyId)> {
        self.ensure_open()?;
        if algorithm != KeyAlgorithm::Rsa {
            return Err(KmsError::Denied(format!("{} is not an asymmetric algorithm", algorithm)));
        }
        if !(RSA_MIN_BITS..=RSA_MAX_BITS).contains(&bit_length) {
            return Err(KmsError::Denied(format!("unsupported RSA key length {}", bit_length)));
        }

        let (public_der, private_der) = tokio::task::spawn_blocking(move || generate_rsa(bit_length))
            .await
            .map_err(|e| KmsError::Transient(format!("key generation task failed: {}", e)))??;

        let public_id = self.insert(algorithm, public_usage_mask, public_der).await;
        let private_id = self.insert(algorithm, private_usage_mask, private_der).await;
        info!(
            public_key_id = %public_id,
            private_key_id = %private_id,
            bit_length,
            "Local KMS created key pair"
        );
        Ok((public_id, private_id))
    }

    async fn fetch_material(&self, key_id: &KeyId) -> KmsResult<KeyMaterial> {
        self.ensure_open()?;
        let keys = self.keys.read().await;
        let stored = keys
            .get(key_id)
            .ok_or_else(|| KmsError::NotFound(key_id.clone()))?;

        debug!(
            key_id = %key_id,
            algorithm = %stored.algorithm,
            usage_mask = stored.usage_mask.bits(),
            "Local KMS returned key material"
        );
        Ok(stored.material.clone())
    }

    async fn close(&self) -> KmsResult<()> {
        self.closed.store(true, Ordering::Release);
        debug!("Local KMS session closed");
        Ok(())
    }
}

fn generate_rsa(bit_length: u32) -> KmsResult<(KeyMaterial, KeyMaterial)> {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, bit_length as usize)
        .map_err(|e| KmsError::Transient(format!("RSA generation failed: {}", e)))?;
    let public = RsaPublicKey::from(&private);

    let private_der = private
        .to_pkcs8_der()
        .map_err(|e| KmsError::Denied(format!("PKCS#8 encoding failed: {}", e)))?;
    let public_der = public
        .to_public_key_der()
        .map_err(|e| KmsError::Denied(format!("SPKI encoding failed: {}", e)))?;

    Ok((
        KeyMaterial::new(public_der.as_bytes().to_vec()),
        KeyMaterial::new(private_der.as_bytes().to_vec()),
    ))
}
