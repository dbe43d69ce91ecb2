//! Structured logging setup for Keyward
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


use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::non_blocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILENAME: &str = "rotation.log";
const DEFAULT_MAX_LOG_FILES: usize = 5;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to create log directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open log file: {0}")]
    Appender(String),

    #[error("Failed to install subscriber: {0}")]
    Init(String),
}

/// Logging options
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Level used when `RUST_LOG` is not set
    pub default_level: String,
    /// JSON console output instead of human-readable lines
    pub json: bool,
    /// Also write to a daily rolling file; this path links to the active file
    pub file: Option<PathBuf>,
    /// Dated log files kept, the active one included
    pub max_files: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            json: false,
            file: None,
            max_files: DEFAULT_MAX_LOG_FILES,
        }
    }
}

/// Initialize structured logging for Keyward services
///
/// This sets up:
/// - Environment-based log level filtering (`RUST_LOG` wins over the default)
/// - Console output, JSON or human-readable
/// - An optional non-blocking rolling file output
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
pub fn init_logging(service_name: &str, options: &LogOptions) -> Result<Option<WorkerGuard>, LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_level));

    let (file_layer, guard) = match &options.file {
        Some(path) => {
            let appender = file_appender(path, options.max_files)?;
            let (writer, guard) = non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let json_layer = options.json.then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_current_span(false)
            .with_span_list(false)
    });
    let console_layer = (!options.json).then(|| fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    tracing::info!(
        service = service_name,
        json = options.json,
        log_file = ?options.file,
        "Logging initialized"
    );

    Ok(guard)
}

/// Daily rolling appender beside `path`, keeping at most `max_files` dated files
///
/// Files are named `{file_name}.YYYY-MM-DD`; `path` itself becomes a symlink
/// to the active one. Excess files are pruned here and at each rollover.
fn file_appender(path: &Path, max_files: usize) -> Result<RollingFileAppender, LoggingError> {
    let (directory, file_name) = split_log_path(path);
    std::fs::create_dir_all(&directory).map_err(|source| LoggingError::Io {
        path: directory.clone(),
        source,
    })?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_name.clone())
        .latest_symlink(file_name)
        .max_log_files(max_files.max(1))
        .build(&directory)
        .map_err(|e| LoggingError::Appender(e.to_string()))
}

/// Directory and file name prefix for a rolling log file
fn split_log_path(path: &Path) -> (PathBuf, String) {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILENAME)
        .to_string();
    (directory, file_name)
}
