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

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::{address::is_problematic_address, pool::Pool};

/// Number of assignable addresses of a pool.
///
/// Counts saturate at [u128::MAX]; a pool containing a very large IPv6 range never runs out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCapacity {
    /// All assignable addresses.
    pub total: u128,
    /// Assignable IPv4 addresses.
    pub ipv4: u128,
    /// Assignable IPv6 addresses.
    pub ipv6: u128,
}

impl PoolCapacity {
    pub(crate) fn of(pool: &Pool) -> Self {
        let mut capacity = PoolCapacity::default();
        for cidr in pool.cidrs() {
            let size = prefix_capacity(cidr, pool.avoid_buggy_ips());
            match cidr {
                IpNet::V4(_) => capacity.ipv4 = capacity.ipv4.saturating_add(size),
                IpNet::V6(_) => capacity.ipv6 = capacity.ipv6.saturating_add(size),
            }
            capacity.total = capacity.total.saturating_add(size);
        }
        capacity
    }
}

// A /24 or larger range holds one .0 and one .255 address per contained /24. A narrower range
// holds at most one of each, at its edges.
fn prefix_capacity(cidr: &IpNet, avoid_buggy_ips: bool) -> u128 {
    let host_bits = u32::from(cidr.max_prefix_len() - cidr.prefix_len());
    let Some(size) = 1u128.checked_shl(host_bits) else {
        return u128::MAX;
    };

    if !avoid_buggy_ips || !matches!(cidr, IpNet::V4(_)) {
        return size;
    }

    if cidr.prefix_len() <= 24 {
        size - 2 * (1u128 << (24 - cidr.prefix_len()))
    } else {
        // A /32 has a single edge.
        let mut edges = vec![cidr.network()];
        if cidr.broadcast() != cidr.network() {
            edges.push(cidr.broadcast());
        }
        let buggy = edges
            .into_iter()
            .filter(|address| is_problematic_address(*address))
            .count() as u128;
        size.saturating_sub(buggy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{param_test, pool};

    param_test! {
        test_pool_capacity: [
            single_slash24: (&["1.2.3.0/24"], false, 256, 256, 0),
            slash24_and_slash25: (&["1.2.3.0/24", "2.3.4.128/25"], false, 384, 384, 0),
            slash24_and_slash25_avoid_buggy: (&["1.2.3.0/24", "2.3.4.128/25"], true, 381, 381, 0),
            slash16_avoid_buggy: (&["10.1.0.0/16"], true, 65536 - 512, 65536 - 512, 0),
            narrow_inside_avoid_buggy: (&["1.2.3.4/30"], true, 4, 4, 0),
            narrow_at_start_avoid_buggy: (&["1.2.3.0/31"], true, 1, 1, 0),
            narrow_at_end_avoid_buggy: (&["1.2.3.254/31"], true, 1, 1, 0),
            single_buggy_address: (&["1.2.3.255/32"], true, 0, 0, 0),
            single_buggy_network_address: (&["1.2.3.0/32"], true, 0, 0, 0),
            single_buggy_address_kept: (&["1.2.3.255/32"], false, 1, 1, 0),
            single_regular_address_avoid_buggy: (&["1.2.3.7/32"], true, 1, 1, 0),
            mixed_families_avoid_buggy: (&["1.2.3.0/31", "1000::/127"], true, 3, 1, 2),
            ipv6_slash24_avoid_buggy: (&["1000::/24"], true, 1 << 104, 0, 1 << 104),
        ]
    }
    fn test_pool_capacity(cidrs: &[&str], avoid_buggy_ips: bool, total: u128, ipv4: u128, ipv6: u128) {
        let capacity = pool("p", true, avoid_buggy_ips, cidrs).capacity();
        assert_eq!(capacity, PoolCapacity { total, ipv4, ipv6 });
    }

    #[test]
    fn should_saturate_for_whole_ipv6_space() {
        let capacity = pool("p", true, false, &["1.2.3.0/24", "::/0"]).capacity();
        assert_eq!(capacity.ipv6, u128::MAX);
        assert_eq!(capacity.total, u128::MAX);
        assert_eq!(capacity.ipv4, 256);
    }

    #[test]
    fn should_match_number_of_listed_addresses() {
        let pool = pool(
            "p",
            true,
            true,
            &["10.0.0.0/23", "10.0.2.0/26", "10.0.3.192/26", "2001:db8::/120"],
        );
        assert_eq!(pool.capacity().total, pool.addresses().count() as u128);
    }
}
