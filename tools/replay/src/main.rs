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
//! Replays an allocation scenario against the address allocator.
//!
//! Every step is printed with its outcome, followed by the final allocator state as JSON and,
//! on request, the pool metrics in the Prometheus text format.

use std::io::Write as _;

use anyhow::Context as _;
use clap::Parser;
use lbipam_allocator::dto::AllocatorStateDto;
use lbipam_observability::{metrics::registry::MetricsRegistry, setup_tracing};

use crate::{
    cli::Opts,
    scenario::{Replay, Scenario},
};

mod cli;
mod scenario;

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let _log_guards = setup_tracing(
        opts.logging.log_dir.as_ref(),
        opts.logging.stderr,
        opts.logging.log_format.into(),
    );

    let scenario = Scenario::load(&opts.scenario)?;
    let registry = MetricsRegistry::new();
    let mut replay = Replay::new(&scenario, &registry)?;

    let mut stdout = std::io::stdout().lock();
    let report = replay.run(&scenario, opts.fail_fast, &mut stdout)?;
    tracing::info!(
        applied = report.applied,
        failed = report.failed,
        "Scenario replayed"
    );

    let state = AllocatorStateDto::from(replay.allocator());
    serde_json::to_writer_pretty(&mut stdout, &state).context("error writing final state")?;
    writeln!(stdout)?;

    if opts.print_metrics {
        let metrics = registry
            .encode_text()
            .context("error encoding metrics")?;
        write!(stdout, "{metrics}")?;
    }
    Ok(())
}
