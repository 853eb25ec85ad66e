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
//! Address arithmetic.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use derive_more::Display;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// Address family a service asks for.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    /// IPv4
    #[display("IPv4")]
    Ipv4,
    /// IPv6
    #[display("IPv6")]
    Ipv6,
}

impl IpFamily {
    /// Family of `address`.
    pub fn of(address: IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => IpFamily::Ipv4,
            IpAddr::V6(_) => IpFamily::Ipv6,
        }
    }

    /// Family of the addresses in `prefix`.
    pub fn of_prefix(prefix: &IpNet) -> Self {
        match prefix {
            IpNet::V4(_) => IpFamily::Ipv4,
            IpNet::V6(_) => IpFamily::Ipv6,
        }
    }

    /// Returns true if `address` satisfies the optional family selector `family`.
    pub fn selects(family: Option<IpFamily>, address: IpAddr) -> bool {
        family.is_none_or(|wanted| wanted == IpFamily::of(address))
    }
}

/// Returns the address immediately following `address`, or `None` if `address` is the last
/// address of its family.
pub fn next_address(address: IpAddr) -> Option<IpAddr> {
    match address {
        IpAddr::V4(v4) => v4.to_bits().checked_add(1).map(|bits| Ipv4Addr::from_bits(bits).into()),
        IpAddr::V6(v6) => v6.to_bits().checked_add(1).map(|bits| Ipv6Addr::from_bits(bits).into()),
    }
}

/// Returns true if `address` is an IPv4 address ending in `.0` or `.255`.
///
/// Smurf protection on some consumer router firmwares drops traffic for such addresses. IPv6
/// addresses are never considered problematic.
pub fn is_problematic_address(address: IpAddr) -> bool {
    match address {
        IpAddr::V4(v4) => matches!(v4.octets()[3], 0 | 255),
        IpAddr::V6(_) => false,
    }
}

/// Iterator over every address of a prefix, in ascending order.
#[derive(Debug, Clone)]
pub struct PrefixAddresses {
    next: Option<IpAddr>,
    last: IpAddr,
}

impl PrefixAddresses {
    /// Creates an iterator from the network address up to the broadcast address of `prefix`.
    pub fn new(prefix: IpNet) -> Self {
        Self {
            next: Some(prefix.network()),
            last: prefix.broadcast(),
        }
    }
}

impl Iterator for PrefixAddresses {
    type Item = IpAddr;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = if current == self.last {
            None
        } else {
            next_address(current)
        };
        Some(current)
    }
}
