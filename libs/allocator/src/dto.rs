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
//! Public facing DTOs (Data Transfer Objects) for pool configuration and allocator state.
//!
//! In contrast to the internal types, the DTOs are plain serializable data. Converting a DTO
//! into an internal type validates it.

use std::{
    collections::{BTreeMap, BTreeSet},
    net::IpAddr,
};

use anyhow::{Context as _, bail};
use ipnet::{IpNet, Ipv4Subnets, Ipv6Subnets};
use serde::{Deserialize, Serialize};

use crate::{
    allocator::{Allocation, Allocator},
    metrics::{NoopPoolMetrics, PoolMetrics, PoolStats},
    pool::{Pool, Pools},
};

/// Pool configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolsDto {
    /// The configured pools.
    pub pools: Vec<PoolDto>,
}

/// Configuration of one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDto {
    /// Unique, non-empty name.
    pub name: String,
    /// Address ranges, either in CIDR notation or as `<first>-<last>`.
    pub addresses: Vec<String>,
    /// Whether the pool takes part in unrequested allocations.
    #[serde(default = "default_auto_assign")]
    pub auto_assign: bool,
    /// Whether IPv4 addresses ending in `.0` and `.255` are skipped.
    #[serde(default)]
    pub avoid_buggy_ips: bool,
}

fn default_auto_assign() -> bool {
    true
}

impl TryFrom<PoolsDto> for Pools {
    type Error = anyhow::Error;

    fn try_from(value: PoolsDto) -> Result<Self, Self::Error> {
        let mut names = BTreeSet::new();
        let mut pools = Vec::with_capacity(value.pools.len());
        for dto in value.pools {
            if dto.name.is_empty() {
                bail!("pool name must not be empty");
            }
            if !names.insert(dto.name.clone()) {
                bail!("duplicate definition of pool {:?}", dto.name);
            }
            let name = dto.name.clone();
            pools.push(Pool::try_from(dto).with_context(|| format!("invalid pool {name:?}"))?);
        }

        let cidrs: Vec<(&str, &IpNet)> = pools
            .iter()
            .flat_map(|pool| pool.cidrs().iter().map(move |cidr| (pool.name(), cidr)))
            .collect();
        for (i, (pool, cidr)) in cidrs.iter().enumerate() {
            for (other_pool, other) in &cidrs[i + 1..] {
                if cidr.contains(&other.network()) || other.contains(&cidr.network()) {
                    bail!("CIDR {cidr} of pool {pool:?} overlaps with CIDR {other} of pool {other_pool:?}");
                }
            }
        }

        Ok(Pools::new(pools))
    }
}

impl TryFrom<PoolDto> for Pool {
    type Error = anyhow::Error;

    fn try_from(value: PoolDto) -> Result<Self, Self::Error> {
        let mut cidrs = Vec::new();
        for entry in &value.addresses {
            cidrs.extend(parse_address_range(entry)?);
        }
        Ok(Pool::new(value.name, cidrs)
            .with_auto_assign(value.auto_assign)
            .with_avoid_buggy_ips(value.avoid_buggy_ips))
    }
}

impl From<&Pools> for PoolsDto {
    fn from(value: &Pools) -> Self {
        Self {
            pools: value.iter().map(PoolDto::from).collect(),
        }
    }
}

impl From<&Pool> for PoolDto {
    fn from(value: &Pool) -> Self {
        Self {
            name: value.name().to_string(),
            addresses: value.cidrs().iter().map(ToString::to_string).collect(),
            auto_assign: value.auto_assign(),
            avoid_buggy_ips: value.avoid_buggy_ips(),
        }
    }
}

/// Parses a CIDR or a `<first>-<last>` range into the minimal list of CIDRs covering it.
pub fn parse_address_range(entry: &str) -> anyhow::Result<Vec<IpNet>> {
    let Some((first, last)) = entry.split_once('-') else {
        let cidr: IpNet = entry
            .trim()
            .parse()
            .with_context(|| format!("invalid CIDR {entry:?}"))?;
        return Ok(vec![cidr]);
    };

    let first: IpAddr = first
        .trim()
        .parse()
        .with_context(|| format!("invalid start address in range {entry:?}"))?;
    let last: IpAddr = last
        .trim()
        .parse()
        .with_context(|| format!("invalid end address in range {entry:?}"))?;
    if first > last {
        bail!("start of range {entry:?} is after its end");
    }

    let cidrs = match (first, last) {
        (IpAddr::V4(first), IpAddr::V4(last)) => {
            Ipv4Subnets::new(first, last, 0).map(IpNet::V4).collect()
        }
        (IpAddr::V6(first), IpAddr::V6(last)) => {
            Ipv6Subnets::new(first, last, 0).map(IpNet::V6).collect()
        }
        _ => bail!("range {entry:?} mixes IPv4 and IPv6 addresses"),
    };
    Ok(cidrs)
}

/// Snapshot of an allocator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocatorStateDto {
    /// The configured pools.
    pub pools: PoolsDto,
    /// Allocations by service name.
    pub allocations: BTreeMap<String, Allocation>,
    /// Pool usage by pool name. Derived from the allocations; ignored on restore.
    #[serde(default)]
    pub pool_stats: BTreeMap<String, PoolStats>,
}

impl From<&Allocator> for AllocatorStateDto {
    fn from(value: &Allocator) -> Self {
        Self {
            pools: value.pools().into(),
            allocations: value
                .allocations()
                .map(|(service, allocation)| (service.to_string(), allocation.clone()))
                .collect(),
            pool_stats: value
                .pools()
                .iter()
                .filter_map(|pool| Some((pool.name().to_string(), value.pool_stats(pool.name())?)))
                .collect(),
        }
    }
}

impl AllocatorStateDto {
    /// Rebuilds an allocator reporting to `metrics`.
    ///
    /// Fails if the pools are invalid, if an allocation is not permitted by the pools and the
    /// other allocations, or if an allocation names the wrong pool.
    pub fn restore(self, metrics: impl PoolMetrics + 'static) -> anyhow::Result<Allocator> {
        let mut allocator = Allocator::new().with_metrics(metrics);
        let pools = Pools::try_from(self.pools).context("invalid pool configuration")?;
        allocator.set_pools(pools)?;

        for (service, allocation) in self.allocations {
            allocator
                .assign(&service, allocation.address, allocation.terms)
                .with_context(|| format!("invalid allocation of service {service:?}"))?;
            if allocator.pool(&service) != Some(allocation.pool.as_str()) {
                bail!(
                    "allocation of service {service:?} names pool {:?}, but {} belongs to {:?}",
                    allocation.pool,
                    allocation.address,
                    allocator.pool(&service).unwrap_or_default()
                );
            }
        }
        Ok(allocator)
    }
}

impl TryFrom<AllocatorStateDto> for Allocator {
    type Error = anyhow::Error;

    fn try_from(value: AllocatorStateDto) -> Result<Self, Self::Error> {
        value.restore(NoopPoolMetrics)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::test_utils::{cidr, ip, terms};

    fn pools_dto(json: &str) -> PoolsDto {
        serde_json::from_str(json).expect("Should deserialize")
    }

    #[test]
    fn should_parse_pool_configuration() {
        let dto = pools_dto(
            r#"{"pools": [
                {"name": "default", "addresses": ["10.0.0.0/24", "10.0.1.1-10.0.1.6"]},
                {"name": "manual", "addresses": ["2001:db8::/120"], "auto_assign": false,
                 "avoid_buggy_ips": true}
            ]}"#,
        );
        let pools = Pools::try_from(dto).expect("Should succeed");

        let default = pools.get("default").unwrap();
        assert!(default.auto_assign());
        assert!(!default.avoid_buggy_ips());
        let cidrs: Vec<String> = default.cidrs().iter().map(ToString::to_string).collect();
        assert_eq!(
            cidrs,
            vec!["10.0.0.0/24", "10.0.1.1/32", "10.0.1.2/31", "10.0.1.4/31", "10.0.1.6/32"]
        );
        assert_eq!(default.capacity().total, 256 + 6);

        let manual = pools.get("manual").unwrap();
        assert!(!manual.auto_assign());
        assert!(manual.avoid_buggy_ips());
    }

    #[test]
    fn should_convert_pools_back_to_dto() {
        let dto = pools_dto(
            r#"{"pools": [{"name": "a", "addresses": ["10.0.0.0/24"], "auto_assign": false}]}"#,
        );
        let pools = Pools::try_from(dto.clone()).expect("Should succeed");
        assert_eq!(PoolsDto::from(&pools), dto);
    }

    #[test]
    fn should_reject_invalid_pool_configurations() {
        let cases = [
            (r#"{"pools": [{"name": "", "addresses": []}]}"#, "must not be empty"),
            (
                r#"{"pools": [{"name": "a", "addresses": []}, {"name": "a", "addresses": []}]}"#,
                "duplicate",
            ),
            (r#"{"pools": [{"name": "a", "addresses": ["10.0.0.0/33"]}]}"#, "invalid pool"),
            (r#"{"pools": [{"name": "a", "addresses": ["10.0.0.5-10.0.0.1"]}]}"#, "invalid pool"),
            (r#"{"pools": [{"name": "a", "addresses": ["10.0.0.1-::5"]}]}"#, "invalid pool"),
            (
                r#"{"pools": [{"name": "a", "addresses": ["10.0.0.0/24"]},
                              {"name": "b", "addresses": ["10.0.0.128/25"]}]}"#,
                "overlaps",
            ),
            (
                r#"{"pools": [{"name": "a", "addresses": ["10.0.0.0/24", "10.0.0.1-10.0.0.3"]}]}"#,
                "overlaps",
            ),
        ];

        for (json, message) in cases {
            let err = Pools::try_from(pools_dto(json)).expect_err("Should fail");
            assert!(
                format!("{err:#}").contains(message),
                "{json}: unexpected error {err:#}"
            );
        }
    }

    #[test]
    fn should_parse_address_ranges() {
        let cidrs = parse_address_range("2001:db8::-2001:db8::ff").expect("Should succeed");
        assert_eq!(cidrs, vec![cidr("2001:db8::/120")]);
        let cidrs = parse_address_range("10.0.0.7 - 10.0.0.7").expect("Should succeed");
        assert_eq!(cidrs, vec![cidr("10.0.0.7/32")]);
        assert!(parse_address_range("10.0.0.7").is_err());
    }

    #[test]
    fn should_restore_allocator_from_snapshot() {
        let mut allocator = Allocator::new();
        allocator
            .set_pools(
                Pools::try_from(pools_dto(
                    r#"{"pools": [{"name": "a", "addresses": ["10.0.0.0/30"]}]}"#,
                ))
                .unwrap(),
            )
            .expect("Should succeed");
        allocator
            .assign("s1", ip("10.0.0.1"), terms(&["tcp/80"], "k", "b"))
            .expect("Should succeed");
        allocator
            .assign("s2", ip("10.0.0.1"), terms(&["udp/53"], "k", "b"))
            .expect("Should succeed");

        let dto = AllocatorStateDto::from(&allocator);
        assert_eq!(dto.pool_stats["a"].services, 2);
        let json = serde_json::to_string(&dto).expect("Should serialize");
        let restored: AllocatorStateDto = serde_json::from_str(&json).expect("Should deserialize");
        let restored = Allocator::try_from(restored).expect("Should succeed");

        assert_eq!(AllocatorStateDto::from(&restored), dto);
    }

    #[test]
    fn should_reject_inconsistent_snapshot() {
        let json = r#"{
            "pools": {"pools": [{"name": "a", "addresses": ["10.0.0.0/30"]}]},
            "allocations": {
                "s1": {"address": "10.0.0.1", "pool": "a", "ports": ["tcp/80"],
                       "sharing_key": "", "backend_key": ""},
                "s2": {"address": "10.0.0.1", "pool": "a", "ports": ["tcp/81"],
                       "sharing_key": "", "backend_key": ""}
            }
        }"#;
        let dto: AllocatorStateDto = serde_json::from_str(json).expect("Should deserialize");
        let err = Allocator::try_from(dto).expect_err("Should fail");
        assert!(format!("{err:#}").contains("s2"), "unexpected error {err:#}");

        let json = r#"{
            "pools": {"pools": [{"name": "a", "addresses": ["10.0.0.0/30"]}]},
            "allocations": {
                "s1": {"address": "10.0.0.1", "pool": "b", "ports": [],
                       "sharing_key": "", "backend_key": ""}
            }
        }"#;
        let dto: AllocatorStateDto = serde_json::from_str(json).expect("Should deserialize");
        assert!(Allocator::try_from(dto).is_err());
    }
}
