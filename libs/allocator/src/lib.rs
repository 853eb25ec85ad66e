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
//! # Load-balancer address allocator
//!
//! Assigns external IP addresses from administrator-configured pools to cluster services.
//!
//! The [allocator::Allocator] owns the mapping between services, addresses and pools. An
//! address can be shared by several services when they agree on a sharing key and a backend
//! key and expose disjoint ports; the rules live in [sharing]. Pools are described in [pool],
//! which also resolves an address to its owning pool and computes pool capacities.
//!
//! The allocator is a plain synchronous state machine. Callers that need concurrent access
//! use [allocator::SharedAllocator]. Usage counters are pushed to a [metrics::PoolMetrics]
//! sink.

pub mod address;
pub mod allocator;
pub mod dto;
pub mod metrics;
pub mod pool;
pub mod sharing;

#[cfg(test)]
pub(crate) mod test_utils;
