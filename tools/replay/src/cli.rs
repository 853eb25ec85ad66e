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
//! Replay CLI options.

use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};
use lbipam_observability::LogFormat;

/// Replays an allocation scenario and prints the outcome of every step.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Opts {
    /// The JSON scenario file to replay.
    #[arg(long)]
    pub scenario: PathBuf,

    /// Print the pool metrics in the Prometheus text format after the replay.
    #[arg(long)]
    pub print_metrics: bool,

    /// Stop at the first failing step and exit with an error.
    #[arg(long)]
    pub fail_fast: bool,

    /// Logging options
    #[command(flatten)]
    pub logging: LoggingOptions,
}

/// Logging options.
#[derive(Debug, Args)]
pub struct LoggingOptions {
    /// Log allocator decisions to stderr.
    #[arg(long)]
    pub stderr: bool,

    /// Format of the stderr log.
    #[arg(long, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,

    /// Directory for the replay log.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

/// Log format selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    /// Human readable lines.
    Text,
    /// Bunyan JSON lines.
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}
