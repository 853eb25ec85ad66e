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

use std::{
    net::IpAddr,
    sync::{Arc, RwLock, RwLockReadGuard},
};

use super::{Allocation, Allocator, AllocatorError};
use crate::{
    address::IpFamily, dto::AllocatorStateDto, metrics::PoolStats, pool::Pools,
    sharing::SharingTerms,
};

/// An [Allocator] that can be shared between threads.
///
/// Mutations take the write lock for their whole duration, so every operation is atomic with
/// respect to all others. Queries take the read lock.
///
/// The lock is poisoned if a thread panics while holding it, and every later call then panics
/// as well. [Allocator] operations report all failures as [AllocatorError] and do not panic.
#[derive(Debug, Clone, Default)]
pub struct SharedAllocator {
    allocator: Arc<RwLock<Allocator>>,
}

impl SharedAllocator {
    /// Wraps `allocator`.
    pub fn new(allocator: Allocator) -> Self {
        Self {
            allocator: Arc::new(RwLock::new(allocator)),
        }
    }

    /// Tries to take the inner Arc and return the allocator.
    pub fn into_inner(self) -> Option<Allocator> {
        Arc::into_inner(self.allocator).map(|lock| lock.into_inner().unwrap())
    }

    /// Returns a Read Guard for the contained [Allocator].
    pub fn allocator(&self) -> RwLockReadGuard<'_, Allocator> {
        self.allocator.read().unwrap()
    }

    /// See [Allocator::set_pools].
    pub fn set_pools(&self, pools: Pools) -> Result<(), AllocatorError> {
        self.allocator.write().unwrap().set_pools(pools)
    }

    /// See [Allocator::assign].
    pub fn assign(
        &self,
        service: &str,
        address: IpAddr,
        terms: SharingTerms,
    ) -> Result<(), AllocatorError> {
        self.allocator
            .write()
            .unwrap()
            .assign(service, address, terms)
    }

    /// See [Allocator::allocate_from_pool].
    pub fn allocate_from_pool(
        &self,
        service: &str,
        pool: &str,
        family: Option<IpFamily>,
        terms: SharingTerms,
    ) -> Result<IpAddr, AllocatorError> {
        self.allocator
            .write()
            .unwrap()
            .allocate_from_pool(service, pool, family, terms)
    }

    /// See [Allocator::allocate].
    pub fn allocate(
        &self,
        service: &str,
        family: Option<IpFamily>,
        terms: SharingTerms,
    ) -> Result<IpAddr, AllocatorError> {
        self.allocator
            .write()
            .unwrap()
            .allocate(service, family, terms)
    }

    /// See [Allocator::unassign].
    pub fn unassign(&self, service: &str) -> Result<Option<Allocation>, AllocatorError> {
        self.allocator.write().unwrap().unassign(service)
    }

    /// See [Allocator::ip].
    pub fn ip(&self, service: &str) -> Option<IpAddr> {
        self.allocator().ip(service)
    }

    /// See [Allocator::pool].
    pub fn pool(&self, service: &str) -> Option<String> {
        self.allocator().pool(service).map(str::to_string)
    }

    /// See [Allocator::pool_stats].
    pub fn pool_stats(&self, pool: &str) -> Option<PoolStats> {
        self.allocator().pool_stats(pool)
    }

    /// Snapshot of pools and allocations.
    pub fn to_dto(&self) -> AllocatorStateDto {
        (&*self.allocator()).into()
    }
}

impl From<Allocator> for SharedAllocator {
    fn from(allocator: Allocator) -> Self {
        Self::new(allocator)
    }
}
