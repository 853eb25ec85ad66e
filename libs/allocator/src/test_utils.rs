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
//! Test utilities

use std::net::IpAddr;

use ipnet::IpNet;

use crate::{
    pool::{Pool, Pools},
    sharing::{Port, SharingTerms},
};

/// Shortcut for `<string>.parse().unwrap()`.
macro_rules! parse {
    ($string:literal) => {
        $string.parse().unwrap()
    };
}

pub(crate) use parse;

/// Macro for creating parametrized tests.
///
/// Expands to a module named after the test function with one `#[test]` per case, each calling
/// the function with the case's arguments.
macro_rules! param_test {
    ($func_name:ident -> $return_ty:ty: [
        $( $(#[$outer:meta])* $case_name:ident: ( $($args:expr),+ )  ),+$(,)?
    ]) => {
        mod $func_name {
            use super::*;

            $(
                #[test]
                $(#[$outer])*
                fn $case_name() -> $return_ty {
                    $func_name($($args),+)
                }
            )*
        }
    };
    ($func_name:ident: [
        $( $(#[$outer:meta])* $case_name:ident: ( $($args:expr),+ ) ),+$(,)?
    ]) => {
        param_test!($func_name -> (): [ $( $(#[$outer])* $case_name: ( $($args),+ ) ),+ ]);
    };
}

pub(crate) use param_test;

/// Parses an IP address.
pub(crate) fn ip(address: &str) -> IpAddr {
    address.parse().unwrap()
}

/// Parses a CIDR.
pub(crate) fn cidr(cidr: &str) -> IpNet {
    cidr.parse().unwrap()
}

/// Builds a pool from a name, flags and CIDR strings.
pub(crate) fn pool(name: &str, auto_assign: bool, avoid_buggy_ips: bool, cidrs: &[&str]) -> Pool {
    Pool::new(
        name,
        cidrs
            .iter()
            .map(|c| cidr(c))
            .collect(),
    )
    .with_auto_assign(auto_assign)
    .with_avoid_buggy_ips(avoid_buggy_ips)
}

/// Builds a pool set from pools.
pub(crate) fn pools(pools: impl IntoIterator<Item = Pool>) -> Pools {
    Pools::new(pools)
}

/// Builds sharing terms from port strings such as `tcp/80`.
pub(crate) fn terms(ports: &[&str], sharing_key: &str, backend_key: &str) -> SharingTerms {
    SharingTerms::new(
        ports.iter().map(|p| p.parse::<Port>().unwrap()),
        sharing_key,
        backend_key,
    )
}
