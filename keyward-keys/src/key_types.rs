//! Key type definitions
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


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Opaque identifier assigned by the KMS
pub type KeyId = String;

/// Cryptographic algorithm requested from the KMS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    /// AES symmetric key
    Aes,
    /// RSA key pair
    Rsa,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Aes => f.write_str("AES"),
            KeyAlgorithm::Rsa => f.write_str("RSA"),
        }
    }
}

/// Permitted use of a key, using KMIP cryptographic usage mask bit values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyUsage {
    Sign,
    Verify,
    Encrypt,
    Decrypt,
    WrapKey,
    UnwrapKey,
}

impl KeyUsage {
    pub fn bit(&self) -> u32 {
        match self {
            KeyUsage::Sign => 0x0000_0001,
            KeyUsage::Verify => 0x0000_0002,
            KeyUsage::Encrypt => 0x0000_0004,
            KeyUsage::Decrypt => 0x0000_0008,
            KeyUsage::WrapKey => 0x0000_0010,
            KeyUsage::UnwrapKey => 0x0000_0020,
        }
    }
}

/// Set of [`KeyUsage`] flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMask(u32);

impl UsageMask {
    pub fn new(usages: &[KeyUsage]) -> Self {
        usages.iter().copied().collect()
    }

    /// Encrypt + Decrypt, the mask used for rotated data keys
    pub fn symmetric_default() -> Self {
        Self::new(&[KeyUsage::Encrypt, KeyUsage::Decrypt])
    }

    pub fn public_default() -> Self {
        Self::new(&[KeyUsage::Encrypt, KeyUsage::Verify])
    }

    pub fn private_default() -> Self {
        Self::new(&[KeyUsage::Decrypt, KeyUsage::Sign])
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, usage: KeyUsage) -> bool {
        self.0 & usage.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<KeyUsage> for UsageMask {
    fn from_iter<I: IntoIterator<Item = KeyUsage>>(iter: I) -> Self {
        UsageMask(iter.into_iter().fold(0, |mask, usage| mask | usage.bit()))
    }
}

/// Raw key bytes, wiped from memory when dropped
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for KeyMaterial {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial({} bytes)", self.0.len())
    }
}

/// One committed key artifact
///
/// The material itself is not kept: once committed, the file on disk is the
/// only copy the service holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersion {
    /// Identifier assigned by the KMS
    pub key_id: KeyId,
    /// When the cycle that issued this version started
    pub created_at: DateTime<Utc>,
    /// Where the version was written
    pub artifact_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_mask_bits() {
        let mask = UsageMask::symmetric_default();
        assert_eq!(mask.bits(), 0x0C);
        assert!(mask.contains(KeyUsage::Encrypt));
        assert!(!mask.contains(KeyUsage::Sign));
        assert!(UsageMask::default().is_empty());
    }

    #[test]
    fn test_key_material_debug_hides_bytes() {
        let material = KeyMaterial::new(vec![0xAB; 32]);
        assert_eq!(format!("{:?}", material), "KeyMaterial(32 bytes)");
    }
}
