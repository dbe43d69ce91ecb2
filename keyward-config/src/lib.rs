//! Configuration management for Keyward
//!
//! Values are layered: built-in defaults, then an optional config file, then
//! `KEYWARD__SECTION__FIELD` environment variables (a `.env` file is loaded
//! first when present).
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


use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "KEYWARD";
const ENV_SEPARATOR: &str = "__";

/// Default ledger file name, placed in the key storage directory
pub const DEFAULT_LEDGER_FILENAME: &str = "rotation-ledger.jsonl";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// KMS endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KmsConfig {
    /// Connector to use; `local` is the built-in software backend
    pub backend: String,
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub validate_tls: bool,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub ca_path: PathBuf,
}

impl KmsConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Key file storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub key_storage_path: PathBuf,
    pub static_key_filename: String,
    pub keep_old_key: bool,
    pub keep_num_keys: usize,
    pub ledger_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Ledger location, defaulting to a file in the key storage directory
    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| self.key_storage_path.join(DEFAULT_LEDGER_FILENAME))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymmetricAlgorithm {
    Aes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPairAlgorithm {
    Rsa,
}

/// Optional asymmetric key pair rotated alongside the symmetric key
#[derive(Debug, Clone, Deserialize)]
pub struct KeyPairConfig {
    pub enabled: bool,
    pub algorithm: KeyPairAlgorithm,
    pub bit_length: u32,
    pub public_key_filename: String,
    pub private_key_filename: String,
}

/// Rotation cadence and key parameters
#[derive(Debug, Clone, Deserialize)]
pub struct RotationConfig {
    pub interval_hours: u32,
    pub periodic_enabled: bool,
    pub check_interval_secs: u64,
    pub operation_timeout_secs: u64,
    pub max_attempts: u32,
    pub algorithm: SymmetricAlgorithm,
    pub bit_length: u32,
    pub key_pair: KeyPairConfig,
}

impl RotationConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    /// Link to the active log file; dated files are written beside it
    pub log_path: PathBuf,
    /// Dated log files kept, the active one included
    pub max_log_files: usize,
}

/// Keyward configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KeywardConfig {
    pub kms: KmsConfig,
    pub storage: StorageConfig,
    pub rotation: RotationConfig,
    pub logging: LoggingConfig,
}

impl KeywardConfig {
    /// Load configuration from defaults and environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load configuration, layering `path` (if any) between defaults and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::load_with(path, Environment::with_prefix(ENV_PREFIX))
    }

    /// Load configuration with `vars` standing in for the process environment
    ///
    /// Neither the real environment nor a `.env` file is consulted.
    pub fn from_vars<I, K, V>(path: Option<&Path>, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let source: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::load_with(path, Environment::with_prefix(ENV_PREFIX).source(Some(source)))
    }

    fn load_with(path: Option<&Path>, environment: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("kms.backend", "local")?
            .set_default("kms.host", "127.0.0.1")?
            .set_default("kms.port", 5696)?
            .set_default("kms.use_tls", true)?
            .set_default("kms.validate_tls", true)?
            .set_default("kms.cert_path", "/app/certs/client.pem")?
            .set_default("kms.key_path", "/app/certs/key.pem")?
            .set_default("kms.ca_path", "/app/certs/vault-ca.pem")?
            .set_default("storage.key_storage_path", "/app/output")?
            .set_default("storage.static_key_filename", "app-key.key")?
            .set_default("storage.keep_old_key", false)?
            .set_default("storage.keep_num_keys", 5)?
            .set_default("rotation.interval_hours", 24)?
            .set_default("rotation.periodic_enabled", true)?
            .set_default("rotation.check_interval_secs", 60)?
            .set_default("rotation.operation_timeout_secs", 30)?
            .set_default("rotation.max_attempts", 3)?
            .set_default("rotation.algorithm", "aes")?
            .set_default("rotation.bit_length", 256)?
            .set_default("rotation.key_pair.enabled", false)?
            .set_default("rotation.key_pair.algorithm", "rsa")?
            .set_default("rotation.key_pair.bit_length", 2048)?
            .set_default("rotation.key_pair.public_key_filename", "public_key.pem")?
            .set_default("rotation.key_pair.private_key_filename", "private_key.pem")?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("logging.write_to_file", true)?
            .set_default("logging.log_path", "/app/logs/rotation.log")?
            .set_default("logging.max_log_files", 5)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: KeywardConfig = builder
            .add_source(environment.separator(ENV_SEPARATOR).try_parsing(true))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Reject values the rotation engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rotation = &self.rotation;
        if rotation.interval_hours == 0 {
            return Err(invalid("rotation.interval_hours must be at least 1"));
        }
        if rotation.check_interval_secs == 0 {
            return Err(invalid("rotation.check_interval_secs must be at least 1"));
        }
        if rotation.operation_timeout_secs == 0 {
            return Err(invalid("rotation.operation_timeout_secs must be at least 1"));
        }
        if rotation.max_attempts == 0 {
            return Err(invalid("rotation.max_attempts must be at least 1"));
        }
        if !matches!(rotation.bit_length, 128 | 192 | 256) {
            return Err(invalid(format!(
                "rotation.bit_length must be 128, 192 or 256 for AES, got {}",
                rotation.bit_length
            )));
        }

        validate_filename("storage.static_key_filename", &self.storage.static_key_filename)?;

        let pair = &rotation.key_pair;
        if pair.enabled {
            if !(1024..=8192).contains(&pair.bit_length) {
                return Err(invalid(format!(
                    "rotation.key_pair.bit_length must be between 1024 and 8192, got {}",
                    pair.bit_length
                )));
            }
            validate_filename("rotation.key_pair.public_key_filename", &pair.public_key_filename)?;
            validate_filename("rotation.key_pair.private_key_filename", &pair.private_key_filename)?;

            let names = [
                &self.storage.static_key_filename,
                &pair.public_key_filename,
                &pair.private_key_filename,
            ];
            if names[0] == names[1] || names[0] == names[2] || names[1] == names[2] {
                return Err(invalid("key filenames must be distinct"));
            }
        }

        if self.logging.write_to_file && self.logging.max_log_files == 0 {
            return Err(invalid("logging.max_log_files must be at least 1"));
        }

        if self.kms.backend != "local" {
            return Err(invalid(format!("unsupported kms.backend: {}", self.kms.backend)));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn validate_filename(field: &str, name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.starts_with('.') || name.contains('/') || name.contains('\\') {
        return Err(invalid(format!("{} must be a plain file name, got {:?}", field, name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const NO_VARS: [(&str, &str); 0] = [];

    #[test]
    fn test_config_defaults() {
        let config = KeywardConfig::from_vars(None, NO_VARS).unwrap();

        assert_eq!(config.kms.endpoint(), "127.0.0.1:5696");
        assert!(config.kms.use_tls);
        assert_eq!(config.storage.key_storage_path, PathBuf::from("/app/output"));
        assert_eq!(config.storage.static_key_filename, "app-key.key");
        assert!(!config.storage.keep_old_key);
        assert_eq!(config.storage.keep_num_keys, 5);
        assert_eq!(
            config.storage.ledger_path(),
            PathBuf::from("/app/output/rotation-ledger.jsonl")
        );
        assert_eq!(config.rotation.interval_hours, 24);
        assert_eq!(config.rotation.check_interval(), Duration::from_secs(60));
        assert_eq!(config.rotation.algorithm, SymmetricAlgorithm::Aes);
        assert!(!config.rotation.key_pair.enabled);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.max_log_files, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_overrides() {
        let config = KeywardConfig::from_vars(
            None,
            [
                ("KEYWARD__ROTATION__INTERVAL_HOURS", "6"),
                ("KEYWARD__STORAGE__KEEP_OLD_KEY", "true"),
                ("KEYWARD__STORAGE__KEY_STORAGE_PATH", "/srv/keys"),
                ("KEYWARD__KMS__PORT", "15696"),
            ],
        )
        .unwrap();

        assert_eq!(config.rotation.interval_hours, 6);
        assert!(config.storage.keep_old_key);
        assert_eq!(config.kms.port, 15696);
        assert_eq!(
            config.storage.ledger_path(),
            PathBuf::from("/srv/keys/rotation-ledger.jsonl")
        );
    }

    #[test]
    fn test_file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[storage]\nstatic_key_filename = \"service.key\"\nkeep_num_keys = 2\n\n[rotation]\ninterval_hours = 12\n"
        )
        .unwrap();

        let config = KeywardConfig::from_vars(
            Some(file.path()),
            [("KEYWARD__ROTATION__INTERVAL_HOURS", "48")],
        )
        .unwrap();

        assert_eq!(config.storage.static_key_filename, "service.key");
        assert_eq!(config.storage.keep_num_keys, 2);
        assert_eq!(config.rotation.interval_hours, 48);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let result = KeywardConfig::from_vars(Some(Path::new("/nonexistent/keyward.toml")), NO_VARS);
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = KeywardConfig::from_vars(None, NO_VARS).unwrap();

        let mut config = base.clone();
        config.rotation.interval_hours = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.rotation.check_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.rotation.bit_length = 512;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.storage.static_key_filename = "../app-key.key".to_string();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.rotation.key_pair.enabled = true;
        config.rotation.key_pair.private_key_filename = "public_key.pem".to_string();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.logging.max_log_files = 0;
        assert!(config.validate().is_err());

        let mut config = base;
        config.kms.backend = "hsm".to_string();
        assert!(config.validate().is_err());
    }
}
