// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use ipnet::IpNet;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;

/// Direction a rule set applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyKind {
    Ingress,
    Egress,
}

impl Display for PolicyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyKind::Ingress => write!(f, "Ingress"),
            PolicyKind::Egress => write!(f, "Egress"),
        }
    }
}

/// Verdict a rule carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyAction {
    Pass,
    Drop,
}

/// L4 protocol of a policy port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortProtocol {
    Tcp,
    Udp,
}

/// A single destination port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Port {
    pub protocol: PortProtocol,
    pub number: u16,
}

/// One abstract match/action rule. An empty `ip_cidrs` with non-empty
/// `ports` means "any IP on these ports"; both empty means "any traffic".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub ip_cidrs: Vec<IpNet>,
    pub ports: Vec<Port>,
    pub action: PolicyAction,
}

/// The pod interface a rule set targets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IfcInfo {
    /// Network the interface is attached to (as named in network-status).
    pub network: String,
    /// In-pod interface name.
    pub interface_name: String,
    /// IPs assigned to the interface.
    pub ips: Vec<IpAddr>,
    /// PCI address of the backing VF.
    pub device_id: String,
}

impl IfcInfo {
    /// Stable identity used to deduplicate and merge rule sets targeting the
    /// same interface.
    #[must_use]
    pub fn uid(&self) -> String {
        format!("{}/{}", self.network, self.interface_name)
    }
}

/// The set of rules of one kind applying to one pod interface.
///
/// `rules` distinguishes "no applicable policy" (`None`: the interface is
/// left unrestricted) from "applicable policy with zero rules"
/// (`Some(vec![])`: only the default-deny baseline is installed).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyRuleSet {
    pub ifc_info: IfcInfo,
    pub kind: PolicyKind,
    pub rules: Option<Vec<Rule>>,
}
