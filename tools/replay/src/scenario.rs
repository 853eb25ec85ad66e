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
//! Allocation scenarios and their replay.

use std::{fs, io::Write, net::IpAddr, path::Path};

use anyhow::{Context as _, bail};
use lbipam_allocator::{
    address::IpFamily,
    allocator::{Allocator, AllocatorError},
    dto::{AllocatorStateDto, PoolsDto},
    metrics::PrometheusPoolMetrics,
    pool::Pools,
    sharing::SharingTerms,
};
use lbipam_observability::metrics::registry::MetricsRegistry;
use prometheus::IntCounterVec;
use serde::Deserialize;
use thiserror::Error;

/// A starting point and the operations to apply to it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Initial pool configuration. Mutually exclusive with `state`.
    #[serde(default)]
    pub pools: Option<PoolsDto>,
    /// Initial allocator state. Mutually exclusive with `pools`.
    #[serde(default)]
    pub state: Option<AllocatorStateDto>,
    /// Operations, applied in order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Reads a scenario from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("error reading scenario {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("error parsing scenario {}", path.display()))
    }
}

/// One allocator operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Replace the pool configuration.
    SetPools {
        /// The new configuration.
        #[serde(flatten)]
        config: PoolsDto,
    },
    /// Assign a specific address.
    Assign {
        /// The service.
        service: String,
        /// The requested address.
        address: IpAddr,
        /// Ports and sharing keys.
        #[serde(flatten)]
        terms: SharingTerms,
    },
    /// Allocate an address from a named pool.
    AllocateFromPool {
        /// The service.
        service: String,
        /// The requested pool.
        pool: String,
        /// Restricts the scan to addresses of this family.
        #[serde(default)]
        family: Option<IpFamily>,
        /// Ports and sharing keys.
        #[serde(flatten)]
        terms: SharingTerms,
    },
    /// Allocate an address from any auto-assign pool.
    Allocate {
        /// The service.
        service: String,
        /// Restricts the scan to addresses of this family.
        #[serde(default)]
        family: Option<IpFamily>,
        /// Ports and sharing keys.
        #[serde(flatten)]
        terms: SharingTerms,
    },
    /// Release the address of a service.
    Unassign {
        /// The service.
        service: String,
    },
}

impl Step {
    fn operation(&self) -> &'static str {
        match self {
            Step::SetPools { .. } => "set_pools",
            Step::Assign { .. } => "assign",
            Step::AllocateFromPool { .. } => "allocate_from_pool",
            Step::Allocate { .. } => "allocate",
            Step::Unassign { .. } => "unassign",
        }
    }

    fn subject(&self) -> String {
        match self {
            Step::SetPools { config } => format!("{} pools", config.pools.len()),
            Step::Assign {
                service, address, ..
            } => format!("{service} {address}"),
            Step::AllocateFromPool { service, pool, .. } => format!("{service} from {pool}"),
            Step::Allocate { service, .. } | Step::Unassign { service } => service.clone(),
        }
    }
}

/// Summary of a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Number of applied steps.
    pub applied: usize,
    /// Number of failed steps.
    pub failed: usize,
}

/// Applies scenario steps to an allocator reporting to Prometheus.
#[derive(Debug)]
pub struct Replay {
    allocator: Allocator,
    operations: IntCounterVec,
}

impl Replay {
    /// Builds the initial allocator of `scenario`, registering all metrics in `registry`.
    pub fn new(scenario: &Scenario, registry: &MetricsRegistry) -> anyhow::Result<Self> {
        let metrics = PrometheusPoolMetrics::new(registry);
        let allocator = match (&scenario.pools, &scenario.state) {
            (Some(_), Some(_)) => bail!("scenario must not define both pools and state"),
            (None, Some(state)) => state
                .clone()
                .restore(metrics)
                .context("invalid initial state")?,
            (pools, None) => {
                let mut allocator = Allocator::new().with_metrics(metrics);
                if let Some(pools) = pools {
                    let pools =
                        Pools::try_from(pools.clone()).context("invalid initial pool configuration")?;
                    allocator.set_pools(pools)?;
                }
                allocator
            }
        };

        let operations = registry.int_counter_vec(
            "replay_operations_total",
            "Number of replayed allocator operations.",
            &["operation", "outcome"],
        );
        Ok(Self {
            allocator,
            operations,
        })
    }

    /// The allocator in its current state.
    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    /// Applies all steps of `scenario`, writing one line per step to `out`.
    ///
    /// With `fail_fast`, the first failing step ends the replay with an error.
    pub fn run(
        &mut self,
        scenario: &Scenario,
        fail_fast: bool,
        out: &mut impl Write,
    ) -> anyhow::Result<ReplayReport> {
        let mut report = ReplayReport::default();
        for (index, step) in scenario.steps.iter().enumerate() {
            let result = self.apply(step);
            report.applied += 1;
            let outcome = if result.is_ok() { "ok" } else { "error" };
            self.operations
                .with_label_values(&[step.operation(), outcome])
                .inc();

            match result {
                Ok(detail) => {
                    writeln!(out, "#{index} {} {}: ok{detail}", step.operation(), step.subject())?
                }
                Err(e) => {
                    report.failed += 1;
                    writeln!(out, "#{index} {} {}: error: {e}", step.operation(), step.subject())?;
                    tracing::warn!(index, operation = step.operation(), error = %e, "Step failed");
                    if fail_fast {
                        return Err(anyhow::Error::new(e)
                            .context(format!("step #{index} ({}) failed", step.operation())));
                    }
                }
            }
        }
        Ok(report)
    }

    fn apply(&mut self, step: &Step) -> Result<String, StepError> {
        match step {
            Step::SetPools { config } => {
                let pools = Pools::try_from(config.clone()).map_err(StepError::Config)?;
                self.allocator.set_pools(pools)?;
                Ok(String::new())
            }
            Step::Assign {
                service,
                address,
                terms,
            } => {
                self.allocator.assign(service, *address, terms.clone())?;
                Ok(String::new())
            }
            Step::AllocateFromPool {
                service,
                pool,
                family,
                terms,
            } => {
                let address = self
                    .allocator
                    .allocate_from_pool(service, pool, *family, terms.clone())?;
                Ok(format!(" {address}"))
            }
            Step::Allocate {
                service,
                family,
                terms,
            } => {
                let address = self.allocator.allocate(service, *family, terms.clone())?;
                let pool = self.allocator.pool(service).unwrap_or_default();
                Ok(format!(" {address} ({pool})"))
            }
            Step::Unassign { service } => {
                let released = self.allocator.unassign(service)?;
                Ok(match released {
                    Some(allocation) => format!(" released {}", allocation.address),
                    None => " nothing to do".to_string(),
                })
            }
        }
    }
}

/// Failure of a single step.
#[derive(Debug, Error)]
enum StepError {
    #[error("invalid pool configuration: {0:#}")]
    Config(anyhow::Error),
    #[error(transparent)]
    Allocator(#[from] AllocatorError),
}
