//! Resolved rotation settings handed to the engine and scheduler

use crate::key_types::{KeyAlgorithm, UsageMask};
use crate::retry::RetryConfig;
use std::time::Duration;

/// Asymmetric key pair rotated alongside the symmetric key
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPairSettings {
    pub algorithm: KeyAlgorithm,
    pub bit_length: u32,
    pub public_usage_mask: UsageMask,
    pub private_usage_mask: UsageMask,
    /// Key store name of the PEM public key
    pub public_key_name: String,
    /// Key store name of the PEM private key
    pub private_key_name: String,
}

impl Default for KeyPairSettings {
    fn default() -> Self {
        Self {
            algorithm: KeyAlgorithm::Rsa,
            bit_length: 2048,
            public_usage_mask: UsageMask::public_default(),
            private_usage_mask: UsageMask::private_default(),
            public_key_name: "public_key.pem".to_string(),
            private_key_name: "private_key.pem".to_string(),
        }
    }
}

/// Everything one rotation engine needs to know about its key
#[derive(Debug, Clone, PartialEq)]
pub struct RotationSettings {
    /// Logical key name, also the file name of the current key
    pub key_name: String,
    pub interval_hours: u32,
    pub algorithm: KeyAlgorithm,
    pub bit_length: u32,
    pub usage_mask: UsageMask,
    pub key_pair: Option<KeyPairSettings>,
    /// Retired versions kept per key name when old keys are kept
    pub retention_count: usize,
    /// Bound on every KMS call and file operation
    pub operation_timeout: Duration,
    pub retry: RetryConfig,
}

impl RotationSettings {
    pub fn new(key_name: impl Into<String>) -> Self {
        Self {
            key_name: key_name.into(),
            interval_hours: 24,
            algorithm: KeyAlgorithm::Aes,
            bit_length: 256,
            usage_mask: UsageMask::symmetric_default(),
            key_pair: None,
            retention_count: 5,
            operation_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    /// Names of every artifact a cycle writes, primary key first
    pub fn artifact_names(&self) -> Vec<&str> {
        let mut names = vec![self.key_name.as_str()];
        if let Some(pair) = &self.key_pair {
            names.push(pair.public_key_name.as_str());
            names.push(pair.private_key_name.as_str());
        }
        names
    }
}

/// Scheduler cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Keep ticking after the initial tick
    pub periodic_enabled: bool,
    /// How often the rotation policy is re-evaluated
    pub check_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            periodic_enabled: true,
            check_interval: Duration::from_secs(60),
        }
    }
}
