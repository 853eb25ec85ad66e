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
//! Address sharing between services.
//!
//! Several services may use the same address if all of them declare the same non-empty
//! sharing key and the same backend key, and none of their ports overlap. The services
//! currently using one address form an [OwnershipGroup]; [OwnershipGroup::admit] decides whether
//! another service may join it.

use std::{
    collections::{BTreeMap, BTreeSet},
    net::IpAddr,
    str::FromStr,
};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport protocol of a service port.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    #[display("tcp")]
    Tcp,
    /// UDP
    #[display("udp")]
    Udp,
    /// SCTP
    #[display("sctp")]
    Sctp,
}

impl FromStr for Protocol {
    type Err = PortParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "sctp" => Ok(Protocol::Sctp),
            _ => Err(PortParseError::UnknownProtocol(s.to_string())),
        }
    }
}

/// One exposed service port, written as `<protocol>/<port>`, e.g. `tcp/80`.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[display("{protocol}/{port}")]
#[serde(try_from = "String", into = "String")]
pub struct Port {
    /// Transport protocol.
    pub protocol: Protocol,
    /// Port number.
    pub port: u16,
}

impl Port {
    /// Creates a port.
    pub const fn new(protocol: Protocol, port: u16) -> Self {
        Self { protocol, port }
    }
}

/// Port parsing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortParseError {
    /// Missing `/` separator.
    #[error("invalid port {0:?}, expected <protocol>/<port>")]
    InvalidFormat(String),
    /// Protocol is not one of tcp, udp or sctp.
    #[error("unknown protocol {0:?}")]
    UnknownProtocol(String),
    /// Port number is not a 16 bit unsigned integer.
    #[error("invalid port number {0:?}")]
    InvalidNumber(String),
}

impl FromStr for Port {
    type Err = PortParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (protocol, port) = s
            .split_once('/')
            .ok_or_else(|| PortParseError::InvalidFormat(s.to_string()))?;
        let port = port
            .parse()
            .map_err(|_| PortParseError::InvalidNumber(port.to_string()))?;
        Ok(Port::new(protocol.parse()?, port))
    }
}

impl TryFrom<String> for Port {
    type Error = PortParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Port> for String {
    fn from(port: Port) -> Self {
        port.to_string()
    }
}

/// The terms under which a service uses an address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingTerms {
    ports: BTreeSet<Port>,
    sharing_key: String,
    backend_key: String,
}

impl SharingTerms {
    /// Creates sharing terms. An empty `sharing_key` means the service does not share its
    /// address.
    pub fn new(
        ports: impl IntoIterator<Item = Port>,
        sharing_key: impl Into<String>,
        backend_key: impl Into<String>,
    ) -> Self {
        Self {
            ports: ports.into_iter().collect(),
            sharing_key: sharing_key.into(),
            backend_key: backend_key.into(),
        }
    }

    /// Terms of a service that does not share its address.
    pub fn exclusive(ports: impl IntoIterator<Item = Port>) -> Self {
        Self::new(ports, "", "")
    }

    /// Ports exposed by the service.
    pub fn ports(&self) -> &BTreeSet<Port> {
        &self.ports
    }

    /// The sharing key, empty if sharing is not allowed.
    pub fn sharing_key(&self) -> &str {
        &self.sharing_key
    }

    /// The backend key.
    pub fn backend_key(&self) -> &str {
        &self.backend_key
    }

    /// Whether the service agrees to share its address.
    pub fn allows_sharing(&self) -> bool {
        !self.sharing_key.is_empty()
    }
}

/// Outcome of a successful admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The address is free and the service becomes its only owner.
    Claim,
    /// The service joins the existing owners of the address.
    Join,
    /// The service already owns the address under identical terms.
    AlreadyMember,
}

/// Reasons why a service may not use an address owned by other services.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SharingConflict {
    /// The current owners do not allow sharing.
    #[error("address is in use by {owners:?}, which do not allow sharing")]
    OwnersDoNotShare {
        /// Services currently owning the address.
        owners: Vec<String>,
    },
    /// The requesting service did not ask for sharing.
    #[error("address is in use by {owners:?} and the service does not allow sharing")]
    ServiceDoesNotShare {
        /// Services currently owning the address.
        owners: Vec<String>,
    },
    /// Sharing keys differ.
    #[error("sharing key {requested:?} does not match existing sharing key {existing:?}")]
    SharingKeyMismatch {
        /// Sharing key of the current owners.
        existing: String,
        /// Sharing key of the requesting service.
        requested: String,
    },
    /// Backend keys differ.
    #[error("backend key {requested:?} does not match existing backend key {existing:?}")]
    BackendKeyMismatch {
        /// Backend key of the current owners.
        existing: String,
        /// Backend key of the requesting service.
        requested: String,
    },
    /// A requested port is already exposed on the address by another service.
    #[error("port {port} is already in use by {service}")]
    PortInUse {
        /// The overlapping port.
        port: Port,
        /// The service exposing it.
        service: String,
    },
}

/// Admission check errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SharingError {
    /// The service already owns the address under different terms.
    #[error("service already owns the address with different sharing terms")]
    ParameterChange,
    /// The address is owned incompatibly by other services.
    #[error(transparent)]
    Conflict(#[from] SharingConflict),
}

/// The services sharing one claimed address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipGroup {
    address: IpAddr,
    pool: String,
    members: BTreeMap<String, SharingTerms>,
}

impl OwnershipGroup {
    pub(crate) fn new(address: IpAddr, pool: impl Into<String>) -> Self {
        Self {
            address,
            pool: pool.into(),
            members: BTreeMap::new(),
        }
    }

    /// The shared address.
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// The pool owning the address.
    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Services owning the address, in name order.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    /// Terms of a member service.
    pub fn terms(&self, service: &str) -> Option<&SharingTerms> {
        self.members.get(service)
    }

    /// Number of member services.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if no service owns the address.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Decides whether `service` may use the address under `terms`.
    pub fn admit(&self, service: &str, terms: &SharingTerms) -> Result<Admission, SharingError> {
        if let Some(current) = self.members.get(service) {
            if current == terms {
                return Ok(Admission::AlreadyMember);
            }
            return Err(SharingError::ParameterChange);
        }

        let mut others = self.members.iter().peekable();
        if others.peek().is_none() {
            return Ok(Admission::Claim);
        }

        for (other, existing) in others {
            if !existing.allows_sharing() {
                return Err(SharingConflict::OwnersDoNotShare {
                    owners: self.owners(),
                }
                .into());
            }
            if !terms.allows_sharing() {
                return Err(SharingConflict::ServiceDoesNotShare {
                    owners: self.owners(),
                }
                .into());
            }
            if existing.sharing_key != terms.sharing_key {
                return Err(SharingConflict::SharingKeyMismatch {
                    existing: existing.sharing_key.clone(),
                    requested: terms.sharing_key.clone(),
                }
                .into());
            }
            if existing.backend_key != terms.backend_key {
                return Err(SharingConflict::BackendKeyMismatch {
                    existing: existing.backend_key.clone(),
                    requested: terms.backend_key.clone(),
                }
                .into());
            }
            if let Some(port) = existing.ports.intersection(&terms.ports).next() {
                return Err(SharingConflict::PortInUse {
                    port: *port,
                    service: other.clone(),
                }
                .into());
            }
        }

        Ok(Admission::Join)
    }

    pub(crate) fn insert(&mut self, service: impl Into<String>, terms: SharingTerms) {
        self.members.insert(service.into(), terms);
    }

    pub(crate) fn remove(&mut self, service: &str) -> Option<SharingTerms> {
        self.members.remove(service)
    }

    pub(crate) fn set_pool(&mut self, pool: impl Into<String>) {
        self.pool = pool.into();
    }

    fn owners(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::test_utils::{parse, terms};

    fn group(members: &[(&str, SharingTerms)]) -> OwnershipGroup {
        let mut group = OwnershipGroup::new(parse!("1.2.3.4"), "pool");
        for (service, terms) in members {
            group.insert(*service, terms.clone());
        }
        group
    }

    #[test]
    fn should_parse_and_format_ports() {
        let port: Port = "TCP/80".parse().unwrap();
        assert_eq!(port, Port::new(Protocol::Tcp, 80));
        assert_eq!(port.to_string(), "tcp/80");
        assert_eq!(
            "udp/53".parse::<Port>().unwrap(),
            Port::new(Protocol::Udp, 53)
        );
    }

    #[test]
    fn should_reject_malformed_ports() {
        assert_eq!(
            "tcp80".parse::<Port>(),
            Err(PortParseError::InvalidFormat("tcp80".to_string()))
        );
        assert_eq!(
            "icmp/1".parse::<Port>(),
            Err(PortParseError::UnknownProtocol("icmp".to_string()))
        );
        assert_eq!(
            "tcp/65536".parse::<Port>(),
            Err(PortParseError::InvalidNumber("65536".to_string()))
        );
    }

    #[test]
    fn should_claim_free_address() {
        let admission = group(&[]).admit("s1", &terms(&["tcp/80"], "", ""));
        assert_eq!(admission, Ok(Admission::Claim));
    }

    #[test]
    fn should_accept_identical_reassignment() {
        let t = terms(&["tcp/80"], "share", "backend");
        let group = group(&[("s1", t.clone())]);
        assert_eq!(group.admit("s1", &t), Ok(Admission::AlreadyMember));
    }

    #[test]
    fn should_reject_changed_terms_of_member() {
        let group = group(&[("s1", terms(&["tcp/80"], "share", "backend"))]);
        assert_eq!(
            group.admit("s1", &terms(&["tcp/81"], "share", "backend")),
            Err(SharingError::ParameterChange)
        );
        assert_eq!(
            group.admit("s1", &terms(&["tcp/80"], "other", "backend")),
            Err(SharingError::ParameterChange)
        );
    }

    #[test]
    fn should_join_compatible_group() {
        let group = group(&[
            ("s1", terms(&["tcp/80"], "share", "backend")),
            ("s2", terms(&["tcp/443"], "share", "backend")),
        ]);
        assert_eq!(
            group.admit("s3", &terms(&["udp/80"], "share", "backend")),
            Ok(Admission::Join)
        );
    }

    #[test]
    fn should_reject_when_owner_does_not_share() {
        let group = group(&[("s1", terms(&["tcp/80"], "", ""))]);
        assert_eq!(
            group.admit("s2", &terms(&["tcp/443"], "", "")),
            Err(SharingConflict::OwnersDoNotShare {
                owners: vec!["s1".to_string()]
            }
            .into())
        );
    }

    #[test]
    fn should_reject_when_service_does_not_share() {
        let group = group(&[("s1", terms(&["tcp/80"], "share", ""))]);
        assert_eq!(
            group.admit("s2", &terms(&["tcp/443"], "", "")),
            Err(SharingConflict::ServiceDoesNotShare {
                owners: vec!["s1".to_string()]
            }
            .into())
        );
    }

    #[test]
    fn should_reject_key_mismatches() {
        let group = group(&[("s1", terms(&["tcp/80"], "share", "backend"))]);
        assert_eq!(
            group.admit("s2", &terms(&["tcp/443"], "other", "backend")),
            Err(SharingConflict::SharingKeyMismatch {
                existing: "share".to_string(),
                requested: "other".to_string(),
            }
            .into())
        );
        assert_eq!(
            group.admit("s2", &terms(&["tcp/443"], "share", "other")),
            Err(SharingConflict::BackendKeyMismatch {
                existing: "backend".to_string(),
                requested: "other".to_string(),
            }
            .into())
        );
    }

    #[test]
    fn should_reject_port_overlap_with_any_member() {
        let group = group(&[
            ("s1", terms(&["tcp/80"], "share", "backend")),
            ("s2", terms(&["tcp/443"], "share", "backend")),
        ]);
        assert_eq!(
            group.admit("s3", &terms(&["tcp/22", "tcp/443"], "share", "backend")),
            Err(SharingConflict::PortInUse {
                port: parse!("tcp/443"),
                service: "s2".to_string(),
            }
            .into())
        );
    }
}
