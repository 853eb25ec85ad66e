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
//! Service address allocator.

use std::{collections::BTreeMap, net::IpAddr, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    address::IpFamily,
    metrics::{NoopPoolMetrics, PoolMetrics, PoolStats},
    pool::Pools,
    sharing::{Admission, OwnershipGroup, SharingConflict, SharingError, SharingTerms},
};

mod shared;

pub use shared::SharedAllocator;

/// The address held by one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// The assigned address.
    pub address: IpAddr,
    /// Name of the pool owning the address.
    pub pool: String,
    /// Terms under which the service uses the address.
    #[serde(flatten)]
    pub terms: SharingTerms,
}

/// Allocator errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    /// An existing assignment would be orphaned by a new pool configuration.
    #[error(
        "new configuration is not compatible with assigned addresses: service {service} cannot own {address}"
    )]
    ConfigIncompatible {
        /// The service whose address has no pool under the new configuration.
        service: String,
        /// Its address.
        address: IpAddr,
    },
    /// The address is not part of any pool.
    #[error("address {0} is not allowed by any configured pool")]
    NoOwningPool(IpAddr),
    /// The address is owned incompatibly by other services.
    #[error("cannot assign {address} to {service}: {reason}")]
    OwnershipConflict {
        /// The requesting service.
        service: String,
        /// The requested address.
        address: IpAddr,
        /// Why the address cannot be shared.
        reason: SharingConflict,
    },
    /// The service already owns the address under different sharing terms.
    #[error(
        "service {service} already owns {address} with different sharing terms, it must be unassigned first"
    )]
    ParameterChangeRejected {
        /// The requesting service.
        service: String,
        /// The requested address.
        address: IpAddr,
    },
    /// No pool with the given name exists.
    #[error("unknown pool {0:?}")]
    PoolNotFound(String),
    /// No free or shareable address was found.
    #[error(
        "no available addresses in {}",
        .pool.as_deref().map_or_else(|| "any auto-assign pool".to_string(), |p| format!("pool {p:?}"))
    )]
    PoolExhausted {
        /// The scanned pool, `None` if all auto-assign pools were scanned.
        pool: Option<String>,
    },
    /// The allocator's bookkeeping is inconsistent. This is a bug.
    #[error("allocator state is inconsistent: {0}")]
    AccountingViolation(String),
}

impl AllocatorError {
    fn from_sharing(service: &str, address: IpAddr, err: SharingError) -> Self {
        match err {
            SharingError::ParameterChange => {
                AllocatorError::ParameterChangeRejected {
                    service: service.to_string(),
                    address,
                }
            }
            SharingError::Conflict(reason) => {
                AllocatorError::OwnershipConflict {
                    service: service.to_string(),
                    address,
                    reason,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PoolUsage {
    addresses_in_use: u64,
    services: u64,
}

/// Tracks address pools and the addresses assigned from them to services.
///
/// Every operation either succeeds completely or fails leaving the state untouched.
#[derive(Debug, Clone)]
pub struct Allocator {
    pools: Pools,
    /// Service -> allocation. A service holds at most one address.
    allocations: BTreeMap<String, Allocation>,
    /// Claimed address -> services using it. Groups are never empty.
    groups: BTreeMap<IpAddr, OwnershipGroup>,
    /// Pool name -> usage counters.
    usage: BTreeMap<String, PoolUsage>,
    metrics: Arc<dyn PoolMetrics>,
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator {
    /// Creates an allocator managing no pools.
    pub fn new() -> Self {
        Self {
            pools: Pools::default(),
            allocations: BTreeMap::new(),
            groups: BTreeMap::new(),
            usage: BTreeMap::new(),
            metrics: Arc::new(NoopPoolMetrics),
        }
    }

    /// Sets the sink receiving pool usage metrics.
    pub fn with_metrics(mut self, metrics: impl PoolMetrics + 'static) -> Self {
        self.metrics = Arc::new(metrics);
        self
    }

    /// Replaces the set of address pools.
    ///
    /// Fails with [AllocatorError::ConfigIncompatible] if any assigned address would not belong
    /// to a pool anymore; the allocator is unchanged in that case. Otherwise the pool recorded
    /// for every allocation is updated to the pool owning its address under `pools`.
    pub fn set_pools(&mut self, pools: Pools) -> Result<(), AllocatorError> {
        // Sharing rules only constrain new assignments. For a configuration change the only
        // question is whether every assigned address still has a pool.
        let mut owners = BTreeMap::new();
        for group in self.groups.values() {
            match pools.pool_for(group.address()) {
                Some(pool) => {
                    owners.insert(group.address(), pool.name().to_string());
                }
                None => {
                    let service = group.services().next().unwrap_or_default().to_string();
                    tracing::warn!(
                        %service,
                        address = %group.address(),
                        "Rejecting pool configuration, assigned address would have no pool"
                    );
                    return Err(AllocatorError::ConfigIncompatible {
                        service,
                        address: group.address(),
                    });
                }
            }
        }

        for removed in self.pools.iter().filter(|p| !pools.contains(p.name())) {
            self.metrics.pool_removed(removed.name());
        }

        self.pools = pools;
        for allocation in self.allocations.values_mut() {
            if let Some(pool) = owners.get(&allocation.address) {
                allocation.pool.clone_from(pool);
            }
        }
        for (address, pool) in owners {
            if let Some(group) = self.groups.get_mut(&address) {
                if group.pool() != pool {
                    tracing::debug!(%address, from = group.pool(), to = %pool, "Address moved to another pool");
                    group.set_pool(pool);
                }
            }
        }
        self.usage = self.count_usage();

        let names: Vec<String> = self.pools.iter().map(|p| p.name().to_string()).collect();
        for name in &names {
            self.publish(name);
        }

        tracing::info!(
            pools = names.len(),
            allocations = self.allocations.len(),
            "Installed new pool configuration"
        );
        Ok(())
    }

    /// Assigns `address` to `service` if the address belongs to a pool and the current owners,
    /// if any, agree to share it under `terms`.
    ///
    /// Repeating an assignment with identical terms is a no-op. A service holding another
    /// address is moved to `address`.
    pub fn assign(
        &mut self,
        service: &str,
        address: IpAddr,
        terms: SharingTerms,
    ) -> Result<(), AllocatorError> {
        let pool = match self.pools.pool_for(address) {
            Some(pool) => pool.name().to_string(),
            None => {
                tracing::debug!(%service, %address, "Address not in any pool");
                return Err(AllocatorError::NoOwningPool(address));
            }
        };

        let admission = match self.groups.get(&address) {
            Some(group) => group.admit(service, &terms),
            None => Ok(Admission::Claim),
        }
        .map_err(|e| AllocatorError::from_sharing(service, address, e))?;

        if admission == Admission::AlreadyMember {
            tracing::trace!(%service, %address, "Address already assigned");
            self.publish(&pool);
            return Ok(());
        }

        if let Some(previous) = self.release(service)? {
            tracing::debug!(%service, from = %previous.address, to = %address, "Moving service to new address");
            self.publish(&previous.pool);
        }

        let group = self
            .groups
            .entry(address)
            .or_insert_with(|| OwnershipGroup::new(address, pool.clone()));
        let claimed = group.is_empty();
        group.insert(service, terms.clone());

        let usage = self.usage.entry(pool.clone()).or_default();
        usage.services += 1;
        if claimed {
            usage.addresses_in_use += 1;
        }

        self.allocations.insert(
            service.to_string(),
            Allocation {
                address,
                pool: pool.clone(),
                terms,
            },
        );

        tracing::debug!(%service, %address, %pool, shared = !claimed, "Assigned address");
        self.publish(&pool);
        Ok(())
    }

    /// Assigns the first usable address of the pool `pool` to `service`.
    ///
    /// Ranges are scanned in configured order and addresses ascending within a range; with a
    /// `family`, ranges of the other family are skipped. An address is usable if it is free or
    /// its owners agree to share it under `terms`. If the service already holds an address of
    /// this pool and family, that address is assigned again.
    pub fn allocate_from_pool(
        &mut self,
        service: &str,
        pool: &str,
        family: Option<IpFamily>,
        terms: SharingTerms,
    ) -> Result<IpAddr, AllocatorError> {
        let Some(candidates) = self.pools.get(pool) else {
            return Err(AllocatorError::PoolNotFound(pool.to_string()));
        };

        if let Some(existing) = self
            .allocations
            .get(service)
            .filter(|a| a.pool == pool && IpFamily::selects(family, a.address))
        {
            let address = existing.address;
            self.assign(service, address, terms)?;
            return Ok(address);
        }

        let found = candidates.addresses_of(family).find(|address| {
            self.groups
                .get(address)
                .is_none_or(|group| group.admit(service, &terms).is_ok())
        });

        match found {
            Some(address) => {
                self.assign(service, address, terms)?;
                Ok(address)
            }
            None => {
                tracing::debug!(%service, %pool, family = ?family, "Pool exhausted");
                Err(AllocatorError::PoolExhausted {
                    pool: Some(pool.to_string()),
                })
            }
        }
    }

    /// Assigns an address from any auto-assign pool to `service`.
    ///
    /// Pools are tried in name order, and only exhausted pools are skipped: any other error
    /// ends the search. If the service already holds an address of `family`, that address is
    /// assigned again.
    pub fn allocate(
        &mut self,
        service: &str,
        family: Option<IpFamily>,
        terms: SharingTerms,
    ) -> Result<IpAddr, AllocatorError> {
        if let Some(existing) = self
            .allocations
            .get(service)
            .filter(|a| IpFamily::selects(family, a.address))
        {
            let address = existing.address;
            self.assign(service, address, terms)?;
            return Ok(address);
        }

        let pools: Vec<String> = self
            .pools
            .auto_assignable()
            .map(|p| p.name().to_string())
            .collect();
        for pool in pools {
            match self.allocate_from_pool(service, &pool, family, terms.clone()) {
                Ok(address) => return Ok(address),
                Err(AllocatorError::PoolExhausted { .. }) => {
                    tracing::trace!(%service, %pool, "Pool exhausted, trying next");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(%service, family = ?family, "No auto-assign pool has an available address");
        Err(AllocatorError::PoolExhausted { pool: None })
    }

    /// Releases the address held by `service`.
    ///
    /// Returns the released allocation, or `None` if the service held no address.
    pub fn unassign(&mut self, service: &str) -> Result<Option<Allocation>, AllocatorError> {
        let released = self.release(service)?;
        if let Some(allocation) = &released {
            tracing::debug!(%service, address = %allocation.address, pool = %allocation.pool, "Unassigned address");
            self.publish(&allocation.pool);
        }
        Ok(released)
    }

    /// The address held by `service`.
    pub fn ip(&self, service: &str) -> Option<IpAddr> {
        self.allocations.get(service).map(|a| a.address)
    }

    /// The pool of the address held by `service`.
    pub fn pool(&self, service: &str) -> Option<&str> {
        self.allocations.get(service).map(|a| a.pool.as_str())
    }

    /// The allocation of `service`.
    pub fn allocation(&self, service: &str) -> Option<&Allocation> {
        self.allocations.get(service)
    }

    /// All allocations, by service name.
    pub fn allocations(&self) -> impl Iterator<Item = (&str, &Allocation)> {
        self.allocations.iter().map(|(s, a)| (s.as_str(), a))
    }

    /// The services sharing `address`, if it is claimed.
    pub fn ownership(&self, address: IpAddr) -> Option<&OwnershipGroup> {
        self.groups.get(&address)
    }

    /// The services sharing `address`, in name order. Empty if the address is free.
    pub fn services_on(&self, address: IpAddr) -> Vec<&str> {
        self.groups
            .get(&address)
            .map(|group| group.services().collect())
            .unwrap_or_default()
    }

    /// The configured pools.
    pub fn pools(&self) -> &Pools {
        &self.pools
    }

    /// Usage of the pool `pool`.
    pub fn pool_stats(&self, pool: &str) -> Option<PoolStats> {
        let capacity = self.pools.get(pool)?.capacity();
        let usage = self.usage.get(pool).copied().unwrap_or_default();
        Some(PoolStats {
            capacity,
            addresses_in_use: usage.addresses_in_use,
            services: usage.services,
        })
    }

    /// Removes `service` from its ownership group. Everything is validated before the first
    /// mutation, so an error leaves the state untouched.
    fn release(&mut self, service: &str) -> Result<Option<Allocation>, AllocatorError> {
        let Some(allocation) = self.allocations.get(service) else {
            return Ok(None);
        };
        let address = allocation.address;

        let Some(group) = self.groups.get(&address) else {
            return Err(self.violation(format!(
                "service {service} holds {address}, but the address is not claimed"
            )));
        };
        if group.terms(service).is_none() {
            return Err(self.violation(format!(
                "service {service} holds {address}, but is not one of its owners"
            )));
        }
        let frees_address = group.len() == 1;
        let usage = self.usage.get(&allocation.pool).copied().unwrap_or_default();
        if usage.services == 0 || (frees_address && usage.addresses_in_use == 0) {
            return Err(self.violation(format!(
                "usage counters of pool {} would become negative",
                allocation.pool
            )));
        }

        let Some(allocation) = self.allocations.remove(service) else {
            return Ok(None);
        };
        if frees_address {
            self.groups.remove(&address);
        } else if let Some(group) = self.groups.get_mut(&address) {
            group.remove(service);
        }
        let usage = self.usage.entry(allocation.pool.clone()).or_default();
        usage.services -= 1;
        if frees_address {
            usage.addresses_in_use -= 1;
        }
        Ok(Some(allocation))
    }

    fn count_usage(&self) -> BTreeMap<String, PoolUsage> {
        let mut usage: BTreeMap<String, PoolUsage> = BTreeMap::new();
        for group in self.groups.values() {
            let entry = usage.entry(group.pool().to_string()).or_default();
            entry.addresses_in_use += 1;
            entry.services += group.len() as u64;
        }
        usage
    }

    fn publish(&self, pool: &str) {
        if let Some(stats) = self.pool_stats(pool) {
            self.metrics.pool_updated(pool, &stats);
        }
    }

    fn violation(&self, message: String) -> AllocatorError {
        tracing::error!("Allocator accounting violation - this is a bug: {message}");
        AllocatorError::AccountingViolation(message)
    }
}
