// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Observability crate for logging and prometheus metrics.

use std::{
    io::{IsTerminal, Write},
    path::Path,
};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::{EnvFilter, Registry, fmt::time::UtcTime, prelude::*};

pub mod metrics;

/// Environment variable to define the log level.
pub const LOG_LEVEL_ENV: &str = "RUST_LOG";

/// Name used for the log file if the executable name cannot be determined.
const FALLBACK_EXEC_NAME: &str = "lbipam";

/// Output format of the stderr logger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One bunyan-style JSON object per line.
    Json,
}

/// Setup logging using the tracing library.
///
/// # Arguments
///
/// * `log_dir`: If provided, logs are written to a file that carries the name of the current
///   executable in this directory.
/// * `log_to_stderr`: If true, logs will additionally printed to stderr.
/// * `format`: Format of the stderr output. The log file is always plain text.
pub fn setup_tracing<P: AsRef<Path>>(
    log_dir: Option<P>,
    log_to_stderr: bool,
    format: LogFormat,
) -> Vec<WorkerGuard> {
    let log_level =
        EnvFilter::try_from_env(LOG_LEVEL_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let mut guards = vec![];
    let mut layers = vec![JsonStorageLayer.boxed()];

    if let Some(log_dir) = log_dir {
        let log_file = tracing_appender::rolling::never(
            log_dir.as_ref(),
            format!("{}.log", extract_exec_name()),
        );
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(log_file);
        let file_logger = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(non_blocking_writer)
            .with_filter(tracing::level_filters::LevelFilter::DEBUG);
        layers.push(file_logger.boxed());
        guards.push(file_guard);
    }

    if log_to_stderr {
        match format {
            LogFormat::Text => {
                let (non_blocking_writer, guard) =
                    tracing_appender::non_blocking(std::io::stderr());
                let stderr_logger = tracing_subscriber::fmt::layer()
                    // Enable colors if the stderr is a terminal.
                    .with_ansi(std::io::stderr().is_terminal())
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(non_blocking_writer)
                    .with_filter(log_level);
                layers.push(stderr_logger.boxed());
                guards.push(guard);
            }
            LogFormat::Json => {
                let (json_logger, guard) = json_formatted_layer(std::io::stderr());
                layers.push(json_logger.with_filter(log_level).boxed());
                guards.push(guard);
            }
        }
    }

    // global subscriber
    let subscriber = Registry::default().with(layers);
    tracing::subscriber::set_global_default(subscriber).unwrap();

    tracing::debug!("Logging initialized!");
    guards
}

fn json_formatted_layer<W: Write + Send + 'static>(
    w: W,
) -> (BunyanFormattingLayer<NonBlocking>, WorkerGuard) {
    let app_name = extract_exec_name();
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(w);
    (
        BunyanFormattingLayer::new(app_name, non_blocking_writer),
        guard,
    )
}

/// Extract the name of the executable that is currently running.
fn extract_exec_name() -> String {
    std::env::current_exe()
        .ok()
        .as_deref()
        .and_then(Path::file_stem)
        .and_then(|name| name.to_str())
        .map(|name| name.to_string())
        .unwrap_or_else(|| FALLBACK_EXEC_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_name_log_file_after_executable() {
        let name = extract_exec_name();
        assert!(!name.is_empty());
        assert!(!name.ends_with(".log"));
    }
}
