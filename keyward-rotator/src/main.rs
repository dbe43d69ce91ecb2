//! Keyward Rotator
//!
//! Rotates the configured key on schedule: checks once at startup, then
//! re-evaluates the rotation policy every check interval until Ctrl+C.
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


mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use keyward_config::KeywardConfig;
use keyward_keys::{KeyStore, KmsConnector, LocalKms, RotationEngine, RotationLedger, Scheduler};
use keyward_logging::{init_logging, LogOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "keyward-rotator", version, about = "KMS key rotation and retention service")]
struct Cli {
    /// Configuration file, layered between defaults and KEYWARD__* variables
    #[arg(short, long, env = "KEYWARD_CONFIG")]
    config: Option<PathBuf>,

    /// Run a single rotation check and exit
    #[arg(long)]
    once: bool,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = KeywardConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // Initialize logging
    let log_options = LogOptions {
        default_level: if cli.verbose {
            "debug".to_string()
        } else {
            config.logging.level.clone()
        },
        json: config.logging.json,
        file: config
            .logging
            .write_to_file
            .then(|| config.logging.log_path.clone()),
        max_files: config.logging.max_log_files,
    };
    let _log_guard = init_logging("keyward-rotator", &log_options).context("Failed to initialize logging")?;

    info!("Starting Keyward Rotator");
    info!(
        key_storage_path = %config.storage.key_storage_path.display(),
        key_name = %config.storage.static_key_filename,
        interval_hours = config.rotation.interval_hours,
        keep_old_key = config.storage.keep_old_key,
        keep_num_keys = config.storage.keep_num_keys,
        "Configuration loaded"
    );

    let store = KeyStore::open(&config.storage.key_storage_path, config.storage.keep_old_key)
        .with_context(|| {
            format!(
                "Failed to open key storage at {}",
                config.storage.key_storage_path.display()
            )
        })?;

    let ledger_path = config.storage.ledger_path();
    let ledger = RotationLedger::open(&ledger_path)
        .await
        .with_context(|| format!("Failed to open rotation ledger at {}", ledger_path.display()))?;

    // Only the local backend passes validation; it runs in process
    let connector: Arc<dyn KmsConnector> = Arc::new(LocalKms::new());
    info!(
        backend = connector.backend_name(),
        "KMS connector ready; kms.host, kms.port and TLS settings are not used by this backend"
    );

    let mut engine = RotationEngine::new(
        settings::rotation_settings(&config),
        connector,
        store,
        Arc::new(ledger),
    );

    if cli.once {
        let outcome = engine.tick().await;
        info!(
            rotated = outcome.is_rotated(),
            failed = outcome.is_failed(),
            "Single rotation check finished"
        );
        if outcome.is_failed() {
            anyhow::bail!("Key rotation failed");
        }
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let scheduler = Scheduler::new(engine, settings::scheduler_settings(&config));
    let mut scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));

    // Wait for shutdown signal, or for the scheduler to finish on its own
    info!("Keyward Rotator running. Press Ctrl+C to stop.");
    let finished = tokio::select! {
        result = &mut scheduler_handle => Some(result),
        signal_result = signal::ctrl_c() => {
            match signal_result {
                Ok(()) => info!("Shutdown signal received"),
                Err(err) => error!(error = %err, "Unable to listen for shutdown signal"),
            }
            None
        }
    };

    // Let an in-flight cycle complete
    let result = match finished {
        Some(result) => result,
        None => {
            shutdown.cancel();
            scheduler_handle.await
        }
    };

    let summary = result.context("Rotation scheduler task failed")?;
    info!(
        ticks = summary.ticks,
        rotations = summary.rotations,
        failures = summary.failures,
        "Keyward Rotator stopped"
    );

    Ok(())
}
