//! Scripted in-memory KMS for rotation tests

#![allow(dead_code)]

use async_trait::async_trait;
use keyward_keys::kms::{KmsConnector, KmsSession};
use keyward_keys::{
    KeyAlgorithm, KeyId, KeyMaterial, KeyStore, KmsError, RetryConfig, RotationEngine,
    RotationLedger, RotationSettings, UsageMask,
};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Failures and delays the KMS will produce, consumed in order
#[derive(Default)]
pub struct Script {
    pub open_failures: VecDeque<KmsError>,
    pub create_failures: VecDeque<KmsError>,
    pub fetch_failures: VecDeque<KmsError>,
    pub fetch_delay: Option<Duration>,
    pub panic_on_fetch: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub opened: u32,
    pub closed: u32,
    pub created: u32,
    pub fetched: u32,
}

#[derive(Default)]
struct Inner {
    script: Script,
    calls: Calls,
    next_id: u8,
    keys: HashMap<KeyId, Vec<u8>>,
}

#[derive(Clone, Default)]
pub struct ScriptedKms {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedKms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.inner.lock().unwrap().script);
    }

    pub fn calls(&self) -> Calls {
        self.inner.lock().unwrap().calls
    }

    /// Material the KMS issued for `key_id`
    pub fn material(&self, key_id: &str) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().keys.get(key_id).cloned()
    }

    fn issue(&self) -> KeyId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = format!("kms-key-{}", inner.next_id);
        let material = vec![inner.next_id; 32];
        inner.keys.insert(id.clone(), material);
        id
    }
}

#[async_trait]
impl KmsConnector for ScriptedKms {
    async fn open(&self) -> Result<Box<dyn KmsSession>, KmsError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(e) = inner.script.open_failures.pop_front() {
            return Err(e);
        }
        inner.calls.opened += 1;
        Ok(Box::new(ScriptedSession { kms: self.clone() }))
    }

    fn backend_name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedSession {
    kms: ScriptedKms,
}

#[async_trait]
impl KmsSession for ScriptedSession {
    async fn create_symmetric_key(
        &self,
        _algorithm: KeyAlgorithm,
        _bit_length: u32,
        _usage_mask: UsageMask,
    ) -> Result<KeyId, KmsError> {
        {
            let mut inner = self.kms.inner.lock().unwrap();
            inner.calls.created += 1;
            if let Some(e) = inner.script.create_failures.pop_front() {
                return Err(e);
            }
        }
        Ok(self.kms.issue())
    }

    async fn create_key_pair(
        &self,
        _algorithm: KeyAlgorithm,
        _bit_length: u32,
        _public_usage_mask: UsageMask,
        _private_usage_mask: UsageMask,
    ) -> Result<(KeyId, KeyId), KmsError> {
        {
            let mut inner = self.kms.inner.lock().unwrap();
            inner.calls.created += 1;
            if let Some(e) = inner.script.create_failures.pop_front() {
                return Err(e);
            }
        }
        Ok((self.kms.issue(), self.kms.issue()))
    }

    async fn fetch_material(&self, key_id: &KeyId) -> Result<KeyMaterial, KmsError> {
        let (delay, panic_on_fetch) = {
            let inner = self.kms.inner.lock().unwrap();
            (inner.script.fetch_delay, inner.script.panic_on_fetch)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if panic_on_fetch {
            panic!("scripted fetch panic");
        }

        let mut inner = self.kms.inner.lock().unwrap();
        inner.calls.fetched += 1;
        if let Some(e) = inner.script.fetch_failures.pop_front() {
            return Err(e);
        }
        inner
            .keys
            .get(key_id)
            .cloned()
            .map(KeyMaterial::new)
            .ok_or_else(|| KmsError::NotFound(key_id.clone()))
    }

    async fn close(&self) -> Result<(), KmsError> {
        self.kms.inner.lock().unwrap().calls.closed += 1;
        Ok(())
    }
}

/// Temporary key directory and ledger wired to a scripted KMS
pub struct Harness {
    pub dir: TempDir,
    pub kms: ScriptedKms,
    pub store: KeyStore,
    pub ledger: Arc<RotationLedger>,
}

impl Harness {
    pub async fn new(keep_old: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::open(dir.path().join("output"), keep_old).unwrap();
        let ledger = RotationLedger::open(dir.path().join("rotation-ledger.jsonl"))
            .await
            .unwrap();
        Self {
            dir,
            kms: ScriptedKms::new(),
            store,
            ledger: Arc::new(ledger),
        }
    }

    pub fn key_dir(&self) -> PathBuf {
        self.store.root().to_path_buf()
    }

    pub fn engine(&self, settings: RotationSettings) -> RotationEngine {
        RotationEngine::new(
            settings,
            Arc::new(self.kms.clone()),
            self.store.clone(),
            Arc::clone(&self.ledger),
        )
    }
}

/// Settings for `app-key.key` with instant retries
pub fn settings() -> RotationSettings {
    let mut settings = RotationSettings::new("app-key.key");
    settings.retry = RetryConfig::new(3, Duration::ZERO, Duration::ZERO, 2.0);
    settings.operation_timeout = Duration::from_secs(5);
    settings
}
