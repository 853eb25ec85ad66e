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
//! Address pool metrics.

use std::fmt::Debug;

use lbipam_observability::metrics::registry::MetricsRegistry;
use prometheus::IntGaugeVec;
use serde::{Deserialize, Serialize};

use crate::pool::PoolCapacity;

/// Usage of one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of assignable addresses.
    pub capacity: PoolCapacity,
    /// Number of claimed addresses. A shared address counts once.
    pub addresses_in_use: u64,
    /// Number of services holding an address of the pool.
    pub services: u64,
}

/// Sink for pool usage metrics.
///
/// The allocator reports after every successful mutation. Implementations must not fail.
pub trait PoolMetrics: Debug + Send + Sync {
    /// Publishes the current usage of `pool`.
    fn pool_updated(&self, pool: &str, stats: &PoolStats);
    /// Drops all series of a pool that is no longer configured.
    fn pool_removed(&self, pool: &str);
}

/// Metrics sink discarding everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPoolMetrics;

impl PoolMetrics for NoopPoolMetrics {
    fn pool_updated(&self, _pool: &str, _stats: &PoolStats) {}

    fn pool_removed(&self, _pool: &str) {}
}

/// Prometheus pool metrics.
#[derive(Debug, Clone)]
pub struct PrometheusPoolMetrics {
    /// Number of assignable addresses per pool.
    pub addresses_total: IntGaugeVec,
    /// Number of claimed addresses per pool.
    pub addresses_in_use: IntGaugeVec,
    /// Number of services holding an address per pool.
    pub services: IntGaugeVec,
}

impl PrometheusPoolMetrics {
    /// Create new metrics instance with the given registry.
    pub fn new(metrics_registry: &MetricsRegistry) -> Self {
        Self {
            addresses_total: metrics_registry.int_gauge_vec(
                "address_pool_addresses_total",
                "Number of assignable addresses in the pool.",
                &["pool"],
            ),
            addresses_in_use: metrics_registry.int_gauge_vec(
                "address_pool_addresses_in_use",
                "Number of addresses of the pool assigned to at least one service.",
                &["pool"],
            ),
            services: metrics_registry.int_gauge_vec(
                "address_pool_services",
                "Number of services holding an address of the pool.",
                &["pool"],
            ),
        }
    }
}

impl PoolMetrics for PrometheusPoolMetrics {
    fn pool_updated(&self, pool: &str, stats: &PoolStats) {
        self.addresses_total
            .with_label_values(&[pool])
            .set(saturating_i64(stats.capacity.total));
        self.addresses_in_use
            .with_label_values(&[pool])
            .set(saturating_i64(u128::from(stats.addresses_in_use)));
        self.services
            .with_label_values(&[pool])
            .set(saturating_i64(u128::from(stats.services)));
    }

    fn pool_removed(&self, pool: &str) {
        // Series that were never published cannot be removed; nothing to do then.
        for gauge in [&self.addresses_total, &self.addresses_in_use, &self.services] {
            let _ = gauge.remove_label_values(&[pool]);
        }
    }
}

fn saturating_i64(value: u128) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
