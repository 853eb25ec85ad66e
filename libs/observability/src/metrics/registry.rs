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
//! Prometheus metric registry.

use prometheus::{IntCounterVec, IntGaugeVec, Opts, TextEncoder, core::Collector};

/// Register and collect metrics of one or more components.
///
/// ## Designated use case
///
/// When initializing a component, the caller builds the component's metrics from the desired
/// `MetricsRegistry`, which lets the caller control namespacing and scoping of all metrics in
/// the application. The collected metrics are exported in the Prometheus text format with
/// [MetricsRegistry::encode_text].
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    registry: prometheus::Registry,
}

impl MetricsRegistry {
    /// Create a new metrics registry with no collectors pre-registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register an `IntGaugeVec`.
    pub fn int_gauge_vec<S: Into<String>>(
        &self,
        name: S,
        help: S,
        label_names: &[&str],
    ) -> IntGaugeVec {
        self.register_collector(IntGaugeVec::new(Opts::new(name, help), label_names).unwrap())
    }

    /// Create and register an `IntCounterVec`.
    pub fn int_counter_vec<S: Into<String>>(
        &self,
        name: S,
        help: S,
        label_names: &[&str],
    ) -> IntCounterVec {
        self.register_collector(IntCounterVec::new(Opts::new(name, help), label_names).unwrap())
    }

    /// Encodes all registered metrics in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }

    fn register_collector<C: 'static + Collector + Clone>(&self, c: C) -> C {
        self.registry.register(Box::new(C::clone(&c))).unwrap();
        c
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        let registry = prometheus::Registry::new();
        Self { registry }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn should_encode_registered_metrics() {
        let registry = MetricsRegistry::new();
        let gauge = registry.int_gauge_vec("pool_size", "Size of a pool.", &["pool"]);
        let counter = registry.int_counter_vec("operations", "Operations.", &["kind"]);

        gauge.with_label_values(&["default"]).set(42);
        counter.with_label_values(&["assign"]).inc_by(3);

        let text = registry.encode_text().unwrap();
        assert!(text.contains("# HELP pool_size Size of a pool."), "got {text}");
        assert!(text.contains("pool_size{pool=\"default\"} 42"), "got {text}");
        assert!(text.contains("operations{kind=\"assign\"} 3"), "got {text}");
    }

    #[test]
    fn should_keep_registries_independent() {
        let first = MetricsRegistry::new();
        let second = MetricsRegistry::new();
        let in_first = first.int_gauge_vec("pool_size", "Help.", &["pool"]);

        // The same name can be registered in another registry.
        let in_second = second.int_gauge_vec("pool_size", "Help.", &["pool"]);
        in_first.with_label_values(&["a"]).set(1);
        in_second.with_label_values(&["b"]).set(2);

        let text = first.encode_text().unwrap();
        assert!(text.contains("pool_size{pool=\"a\"} 1"), "got {text}");
        assert!(!text.contains("pool=\"b\""), "got {text}");
    }
}
