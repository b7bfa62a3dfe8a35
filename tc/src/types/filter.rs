// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::types::{Action, CmdLineArgs, CHAIN_DEFAULT_CHAIN};
use ipnet::IpNet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Filter kinds this system manages. Only flower classifiers are programmed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FilterKind {
    #[default]
    Flower,
}

impl Display for FilterKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterKind::Flower => write!(f, "flower"),
        }
    }
}

/// L2 protocol a filter binds to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FilterProtocol {
    #[default]
    All,
    Ipv4,
    Ipv6,
    Dot1Q,
}

impl Display for FilterProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterProtocol::All => write!(f, "all"),
            FilterProtocol::Ipv4 => write!(f, "ip"),
            FilterProtocol::Ipv6 => write!(f, "ipv6"),
            FilterProtocol::Dot1Q => write!(f, "802.1q"),
        }
    }
}

impl FromStr for FilterProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(FilterProtocol::All),
            "ip" => Ok(FilterProtocol::Ipv4),
            "ipv6" => Ok(FilterProtocol::Ipv6),
            "802.1q" => Ok(FilterProtocol::Dot1Q),
            other => Err(format!("unknown filter protocol: {other:?}")),
        }
    }
}

/// L4 protocol matched by the flower `ip_proto` key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowerIpProto {
    Tcp,
    Udp,
}

impl Display for FlowerIpProto {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowerIpProto::Tcp => write!(f, "tcp"),
            FlowerIpProto::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for FlowerIpProto {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(FlowerIpProto::Tcp),
            "udp" => Ok(FlowerIpProto::Udp),
            other => Err(format!("unknown ip_proto: {other:?}")),
        }
    }
}

/// Inner ethertype matched by the flower `vlan_ethtype` key on 802.1Q
/// filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VlanEthType {
    Ipv4,
    Ipv6,
}

impl Display for VlanEthType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VlanEthType::Ipv4 => write!(f, "ip"),
            VlanEthType::Ipv6 => write!(f, "ipv6"),
        }
    }
}

impl FromStr for VlanEthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ip" => Ok(VlanEthType::Ipv4),
            "ipv6" => Ok(VlanEthType::Ipv6),
            other => Err(format!("unknown vlan_ethtype: {other:?}")),
        }
    }
}

/// Common filter attributes.
///
/// Equality ignores `handle` (assigned by the kernel) and treats an absent
/// chain as chain 0.
#[derive(Clone, Debug, Default, Eq)]
pub struct FilterAttrs {
    pub kind: FilterKind,
    pub protocol: FilterProtocol,
    pub chain: Option<u32>,
    pub handle: Option<u32>,
    pub priority: Option<u16>,
}

impl PartialEq for FilterAttrs {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.protocol == other.protocol
            && self.chain.unwrap_or(u32::from(CHAIN_DEFAULT_CHAIN))
                == other.chain.unwrap_or(u32::from(CHAIN_DEFAULT_CHAIN))
            && self.priority == other.priority
    }
}

impl CmdLineArgs for FilterAttrs {
    fn cmd_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        args.push("protocol".to_owned());
        args.push(self.protocol.to_string());
        if let Some(handle) = self.handle {
            args.push("handle".to_owned());
            args.push(handle.to_string());
        }
        if let Some(chain) = self.chain {
            args.push("chain".to_owned());
            args.push(chain.to_string());
        }
        if let Some(priority) = self.priority {
            args.push("pref".to_owned());
            args.push(priority.to_string());
        }
        // kind must come last, filter specific parameters follow it
        args.push(self.kind.to_string());
        args
    }
}

/// Flower match keys used by this system.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowerSpec {
    pub vlan_eth_type: Option<VlanEthType>,
    pub ip_proto: Option<FlowerIpProto>,
    pub dst_ip: Option<IpNet>,
    pub dst_port: Option<u16>,
}

/// Whether the prefix covers a single address (`/32` for v4, `/128` for v6).
#[must_use]
pub fn is_full_mask(net: &IpNet) -> bool {
    net.prefix_len() == net.max_prefix_len()
}

impl CmdLineArgs for FlowerSpec {
    fn cmd_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(vlan_eth_type) = self.vlan_eth_type {
            args.push("vlan_ethtype".to_owned());
            args.push(vlan_eth_type.to_string());
        }
        if let Some(ip_proto) = self.ip_proto {
            args.push("ip_proto".to_owned());
            args.push(ip_proto.to_string());
        }
        if let Some(dst_ip) = &self.dst_ip {
            args.push("dst_ip".to_owned());
            if is_full_mask(dst_ip) {
                args.push(dst_ip.addr().to_string());
            } else {
                args.push(dst_ip.to_string());
            }
        }
        if let Some(dst_port) = self.dst_port {
            args.push("dst_port".to_owned());
            args.push(dst_port.to_string());
        }
        args
    }
}

/// A flower filter: attributes, match keys and an ordered action list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowerFilter {
    pub attrs: FilterAttrs,
    pub flower: FlowerSpec,
    pub actions: Vec<Action>,
}

impl FlowerFilter {
    #[must_use]
    pub fn attrs(&self) -> &FilterAttrs {
        &self.attrs
    }
}

impl CmdLineArgs for FlowerFilter {
    fn cmd_args(&self) -> Vec<String> {
        let mut args = self.attrs.cmd_args();
        args.extend(self.flower.cmd_args());
        for action in &self.actions {
            args.extend(action.cmd_args());
        }
        args
    }
}

/// Fluent builder for [`FlowerFilter`]; the kind is pinned to flower.
#[derive(Debug, Default)]
pub struct FlowerFilterBuilder {
    filter: FlowerFilter,
}

impl FlowerFilterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn protocol(mut self, protocol: FilterProtocol) -> Self {
        self.filter.attrs.protocol = protocol;
        self
    }

    #[must_use]
    pub fn chain(mut self, chain: u32) -> Self {
        self.filter.attrs.chain = Some(chain);
        self
    }

    #[must_use]
    pub fn handle(mut self, handle: u32) -> Self {
        self.filter.attrs.handle = Some(handle);
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: u16) -> Self {
        self.filter.attrs.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn vlan_eth_type(mut self, eth_type: VlanEthType) -> Self {
        self.filter.flower.vlan_eth_type = Some(eth_type);
        self
    }

    #[must_use]
    pub fn ip_proto(mut self, ip_proto: FlowerIpProto) -> Self {
        self.filter.flower.ip_proto = Some(ip_proto);
        self
    }

    #[must_use]
    pub fn dst_ip(mut self, dst_ip: IpNet) -> Self {
        self.filter.flower.dst_ip = Some(dst_ip);
        self
    }

    #[must_use]
    pub fn dst_port(mut self, dst_port: u16) -> Self {
        self.filter.flower.dst_port = Some(dst_port);
        self
    }

    #[must_use]
    pub fn action(mut self, action: Action) -> Self {
        self.filter.actions.push(action);
        self
    }

    #[must_use]
    pub fn build(mut self) -> FlowerFilter {
        self.filter.attrs.kind = FilterKind::Flower;
        self.filter
    }
}

/// Builder for bare [`FilterAttrs`], as used for delete-by-attributes.
#[derive(Debug, Default)]
pub struct FilterAttrsBuilder {
    attrs: FilterAttrs,
}

impl FilterAttrsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn protocol(mut self, protocol: FilterProtocol) -> Self {
        self.attrs.protocol = protocol;
        self
    }

    #[must_use]
    pub fn chain(mut self, chain: u32) -> Self {
        self.attrs.chain = Some(chain);
        self
    }

    #[must_use]
    pub fn handle(mut self, handle: u32) -> Self {
        self.attrs.handle = Some(handle);
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: u16) -> Self {
        self.attrs.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn build(mut self) -> FilterAttrs {
        self.attrs.kind = FilterKind::Flower;
        self.attrs
    }
}
