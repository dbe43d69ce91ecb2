//! Mapping from loaded configuration to engine settings

use keyward_config::{KeyPairAlgorithm, KeywardConfig, SymmetricAlgorithm};
use keyward_keys::{
    KeyAlgorithm, KeyPairSettings, RetryConfig, RotationSettings, SchedulerSettings, UsageMask,
};

pub fn rotation_settings(config: &KeywardConfig) -> RotationSettings {
    let rotation = &config.rotation;

    let key_pair = rotation.key_pair.enabled.then(|| KeyPairSettings {
        algorithm: match rotation.key_pair.algorithm {
            KeyPairAlgorithm::Rsa => KeyAlgorithm::Rsa,
        },
        bit_length: rotation.key_pair.bit_length,
        public_usage_mask: UsageMask::public_default(),
        private_usage_mask: UsageMask::private_default(),
        public_key_name: rotation.key_pair.public_key_filename.clone(),
        private_key_name: rotation.key_pair.private_key_filename.clone(),
    });

    RotationSettings {
        key_name: config.storage.static_key_filename.clone(),
        interval_hours: rotation.interval_hours,
        algorithm: match rotation.algorithm {
            SymmetricAlgorithm::Aes => KeyAlgorithm::Aes,
        },
        bit_length: rotation.bit_length,
        usage_mask: UsageMask::symmetric_default(),
        key_pair,
        retention_count: config.storage.keep_num_keys,
        operation_timeout: rotation.operation_timeout(),
        retry: RetryConfig {
            max_attempts: rotation.max_attempts,
            ..RetryConfig::default()
        },
    }
}

pub fn scheduler_settings(config: &KeywardConfig) -> SchedulerSettings {
    SchedulerSettings {
        periodic_enabled: config.rotation.periodic_enabled,
        check_interval: config.rotation.check_interval(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn default_config() -> KeywardConfig {
        KeywardConfig::from_vars(None, [("", ""); 0]).unwrap()
    }

    #[test]
    fn test_default_config_maps_to_engine_defaults() {
        let config = default_config();
        let settings = rotation_settings(&config);

        assert_eq!(settings, RotationSettings::new("app-key.key"));
        assert_eq!(
            scheduler_settings(&config),
            SchedulerSettings {
                periodic_enabled: true,
                check_interval: Duration::from_secs(60),
            }
        );
    }

    #[test]
    fn test_key_pair_mapping() {
        let mut config = default_config();
        config.rotation.key_pair.enabled = true;
        config.rotation.key_pair.bit_length = 3072;
        config.storage.keep_num_keys = 2;

        let settings = rotation_settings(&config);

        let pair = settings.key_pair.as_ref().unwrap();
        assert_eq!(pair.bit_length, 3072);
        assert_eq!(pair.public_key_name, "public_key.pem");
        assert_eq!(settings.retention_count, 2);
        assert_eq!(
            settings.artifact_names(),
            vec!["app-key.key", "public_key.pem", "private_key.pem"]
        );
    }
}
