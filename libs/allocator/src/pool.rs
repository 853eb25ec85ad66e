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
//! Address pools.

use std::{collections::BTreeMap, net::IpAddr};

use ipnet::IpNet;

use crate::address::{IpFamily, PrefixAddresses, is_problematic_address};

mod capacity;

pub use capacity::PoolCapacity;

/// A named set of CIDR ranges from which addresses are assigned.
///
/// Pools are immutable once installed in an allocator; a configuration change replaces the
/// whole [Pools] set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    name: String,
    /// Ranges in configured order. Allocation scans them in this order.
    cidrs: Vec<IpNet>,
    /// Whether addresses may be handed out without an explicit pool request.
    auto_assign: bool,
    /// Whether IPv4 addresses ending in `.0` and `.255` are excluded.
    avoid_buggy_ips: bool,
}

impl Pool {
    /// Creates an auto-assignable pool that does not avoid buggy addresses.
    pub fn new(name: impl Into<String>, cidrs: Vec<IpNet>) -> Self {
        Self {
            name: name.into(),
            cidrs,
            auto_assign: true,
            avoid_buggy_ips: false,
        }
    }

    /// Sets whether the pool takes part in unrequested allocations.
    pub fn with_auto_assign(mut self, auto_assign: bool) -> Self {
        self.auto_assign = auto_assign;
        self
    }

    /// Sets whether the pool skips addresses ending in `.0` and `.255`.
    pub fn with_avoid_buggy_ips(mut self, avoid_buggy_ips: bool) -> Self {
        self.avoid_buggy_ips = avoid_buggy_ips;
        self
    }

    /// Name of the pool.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// CIDR ranges of the pool in configured order.
    pub fn cidrs(&self) -> &[IpNet] {
        &self.cidrs
    }

    /// Whether the pool takes part in unrequested allocations.
    pub fn auto_assign(&self) -> bool {
        self.auto_assign
    }

    /// Whether the pool skips addresses ending in `.0` and `.255`.
    pub fn avoid_buggy_ips(&self) -> bool {
        self.avoid_buggy_ips
    }

    /// Returns true if `address` can be handed out by this pool.
    pub fn owns(&self, address: IpAddr) -> bool {
        if self.avoid_buggy_ips && is_problematic_address(address) {
            return false;
        }
        self.cidrs.iter().any(|cidr| cidr.contains(&address))
    }

    /// Iterates over all assignable addresses of the pool: ranges in configured order, addresses
    /// ascending within a range.
    pub fn addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.addresses_of(None)
    }

    /// Like [Pool::addresses], restricted to the ranges of `family` unless it is `None`.
    pub fn addresses_of(&self, family: Option<IpFamily>) -> impl Iterator<Item = IpAddr> + '_ {
        self.cidrs
            .iter()
            .filter(move |cidr| family.is_none_or(|wanted| wanted == IpFamily::of_prefix(cidr)))
            .flat_map(|cidr| PrefixAddresses::new(*cidr))
            .filter(|address| !(self.avoid_buggy_ips && is_problematic_address(*address)))
    }

    /// Number of assignable addresses in the pool.
    pub fn capacity(&self) -> PoolCapacity {
        PoolCapacity::of(self)
    }
}

/// The set of configured pools, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pools {
    by_name: BTreeMap<String, Pool>,
}

impl Pools {
    /// Creates a pool set. A later pool replaces an earlier one with the same name.
    ///
    /// The CIDRs of distinct pools must not overlap; [crate::dto::PoolsDto] enforces this when
    /// configuration is parsed.
    pub fn new(pools: impl IntoIterator<Item = Pool>) -> Self {
        Self {
            by_name: pools
                .into_iter()
                .map(|pool| (pool.name.clone(), pool))
                .collect(),
        }
    }

    /// Returns the pool with the given name.
    pub fn get(&self, name: &str) -> Option<&Pool> {
        self.by_name.get(name)
    }

    /// Returns true if a pool with the given name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Iterates over the pools in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Pool> {
        self.by_name.values()
    }

    /// Iterates over the auto-assignable pools in name order.
    pub fn auto_assignable(&self) -> impl Iterator<Item = &Pool> {
        self.iter().filter(|pool| pool.auto_assign)
    }

    /// Number of pools.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Returns true if there are no pools.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Returns the pool owning `address`, if any.
    ///
    /// Pools avoiding buggy addresses never own a problematic address.
    pub fn pool_for(&self, address: IpAddr) -> Option<&Pool> {
        self.iter().find(|pool| pool.owns(address))
    }
}

impl FromIterator<Pool> for Pools {
    fn from_iter<T: IntoIterator<Item = Pool>>(iter: T) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::test_utils::{ip, pool, pools};

    #[test]
    fn should_resolve_address_to_containing_pool() {
        let pools = pools([
            pool("a", true, false, &["1.2.3.0/24"]),
            pool("b", true, false, &["1.2.4.0/24", "2001:db8::/120"]),
        ]);

        assert_eq!(pools.pool_for(ip("1.2.3.7")).map(Pool::name), Some("a"));
        assert_eq!(pools.pool_for(ip("1.2.4.7")).map(Pool::name), Some("b"));
        assert_eq!(pools.pool_for(ip("2001:db8::ff")).map(Pool::name), Some("b"));
        assert_eq!(pools.pool_for(ip("1.2.5.1")), None);
    }

    #[test]
    fn should_not_resolve_buggy_address_in_avoiding_pool() {
        let pools = pools([
            pool("plain", true, false, &["1.2.3.0/24"]),
            pool("avoid", true, true, &["1.2.4.0/24"]),
        ]);

        assert_eq!(
            pools.pool_for(ip("1.2.3.0")).map(Pool::name),
            Some("plain")
        );
        assert_eq!(pools.pool_for(ip("1.2.4.0")), None);
        assert_eq!(pools.pool_for(ip("1.2.4.255")), None);
        assert_eq!(
            pools.pool_for(ip("1.2.4.1")).map(Pool::name),
            Some("avoid")
        );
    }

    #[test]
    fn should_list_addresses_in_configured_order() {
        let pool = pool("p", true, false, &["10.0.0.10/31", "10.0.0.2/31"]);
        let addresses: Vec<IpAddr> = pool.addresses().collect();
        assert_eq!(
            addresses,
            vec![
                ip("10.0.0.10"),
                ip("10.0.0.11"),
                ip("10.0.0.2"),
                ip("10.0.0.3")
            ]
        );
    }

    #[test]
    fn should_skip_buggy_addresses_when_listing() {
        let pool = pool("p", true, true, &["10.0.0.254/31", "10.0.1.0/31"]);
        let addresses: Vec<IpAddr> = pool.addresses().collect();
        assert_eq!(addresses, vec![ip("10.0.0.254"), ip("10.0.1.1")]);
    }

    #[test]
    fn should_list_only_addresses_of_requested_family() {
        let pool = pool("p", true, false, &["2001:db8::/127", "10.0.0.0/31"]);
        let v4: Vec<IpAddr> = pool.addresses_of(Some(IpFamily::Ipv4)).collect();
        let v6: Vec<IpAddr> = pool.addresses_of(Some(IpFamily::Ipv6)).collect();
        assert_eq!(v4, vec![ip("10.0.0.0"), ip("10.0.0.1")]);
        assert_eq!(v6, vec![ip("2001:db8::"), ip("2001:db8::1")]);
        assert_eq!(pool.addresses_of(None).count(), 4);
    }

    #[test]
    fn should_list_auto_assignable_pools_by_name() {
        let pools = pools([
            pool("zeta", true, false, &["1.0.0.0/30"]),
            pool("alpha", true, false, &["2.0.0.0/30"]),
            pool("manual", false, false, &["3.0.0.0/30"]),
        ]);
        let names: Vec<&str> = pools.auto_assignable().map(Pool::name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
