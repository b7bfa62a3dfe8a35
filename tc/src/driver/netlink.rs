// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Netlink TC driver: drives the kernel TC API directly through
//! `rtnetlink`, bound to one interface index. Only ingress qdiscs and
//! flower filters are accepted; anything else is a programmer error.

use crate::driver::TcApi;
use crate::error::TcError;
use crate::types::{
    Action, Chain, ChainBuilder, ControlAction, FilterAttrs, FilterKind, FilterProtocol,
    FlowerFilter, FlowerFilterBuilder, FlowerIpProto, IngressQdiscBuilder, Qdisc, VlanEthType,
    CHAIN_DEFAULT_PARENT,
};
use futures::TryStreamExt;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use rtnetlink::packet_route::IpProtocol;
use rtnetlink::packet_route::tc::{
    TcAction, TcActionAttribute, TcActionGeneric, TcActionGenericOption, TcActionOption,
    TcActionType, TcAttribute, TcFilterFlowerOption, TcHandle, TcMessage, TcOption,
};
use rtnetlink::Handle;
use tracing::warn;

const ETH_P_ALL: u16 = 0x0003;
const ETH_P_IP: u16 = 0x0800;
const ETH_P_IPV6: u16 = 0x86dd;
const ETH_P_8021Q: u16 = 0x8100;

const GACT_KIND: &str = "gact";

pub struct TcNetlink {
    handle: Handle,
    ifindex: u32,
}

fn proto_to_ethertype(protocol: FilterProtocol) -> u16 {
    match protocol {
        FilterProtocol::All => ETH_P_ALL,
        FilterProtocol::Ipv4 => ETH_P_IP,
        FilterProtocol::Ipv6 => ETH_P_IPV6,
        FilterProtocol::Dot1Q => ETH_P_8021Q,
    }
}

fn ethertype_to_proto(ethertype: u16) -> Option<FilterProtocol> {
    match ethertype {
        ETH_P_ALL => Some(FilterProtocol::All),
        ETH_P_IP => Some(FilterProtocol::Ipv4),
        ETH_P_IPV6 => Some(FilterProtocol::Ipv6),
        ETH_P_8021Q => Some(FilterProtocol::Dot1Q),
        _ => None,
    }
}

fn vlan_to_ethertype(eth_type: VlanEthType) -> u16 {
    match eth_type {
        VlanEthType::Ipv4 => ETH_P_IP,
        VlanEthType::Ipv6 => ETH_P_IPV6,
    }
}

fn ethertype_to_vlan(ethertype: u16) -> Option<VlanEthType> {
    match ethertype {
        ETH_P_IP => Some(VlanEthType::Ipv4),
        ETH_P_IPV6 => Some(VlanEthType::Ipv6),
        _ => None,
    }
}

fn ip_proto_to_nl(ip_proto: FlowerIpProto) -> IpProtocol {
    match ip_proto {
        FlowerIpProto::Tcp => IpProtocol::Tcp,
        FlowerIpProto::Udp => IpProtocol::Udp,
    }
}

fn nl_to_ip_proto(protocol: IpProtocol) -> Option<FlowerIpProto> {
    match protocol {
        IpProtocol::Tcp => Some(FlowerIpProto::Tcp),
        IpProtocol::Udp => Some(FlowerIpProto::Udp),
        _ => None,
    }
}

fn control_to_tc_action(control: ControlAction) -> TcActionType {
    match control {
        ControlAction::Pass => TcActionType::Ok,
        ControlAction::Drop => TcActionType::Shot,
    }
}

fn tc_action_to_control(action: TcActionType) -> Option<ControlAction> {
    match action {
        TcActionType::Ok => Some(ControlAction::Pass),
        TcActionType::Shot => Some(ControlAction::Drop),
        _ => None,
    }
}

fn packed(handle: TcHandle) -> u32 {
    (u32::from(handle.major) << 16) | u32::from(handle.minor)
}

/// Filter priority and protocol are packed into `tcm_info`.
fn split_info(info: u32) -> (u16, u16) {
    #[allow(clippy::cast_possible_truncation)]
    let priority = (info >> 16) as u16;
    #[allow(clippy::cast_possible_truncation)]
    let protocol = u16::from_be(info as u16);
    (priority, protocol)
}

fn gact(control: ControlAction) -> TcAction {
    let mut action = TcAction::default();
    action.attributes = vec![
        TcActionAttribute::Kind(GACT_KIND.to_string()),
        TcActionAttribute::Options(vec![TcActionOption::Generic(TcActionGenericOption::Parms({
            let mut parms = TcActionGeneric::default();
            parms.action = control_to_tc_action(control);
            parms
        }))]),
    ];
    action
}

fn flower_options(filter: &FlowerFilter) -> Vec<TcFilterFlowerOption> {
    let mut options = Vec::new();

    // the filter's eth_type is its protocol unless a VLAN inner type wins
    let eth_type = match filter.flower.vlan_eth_type {
        Some(inner) => vlan_to_ethertype(inner),
        None => proto_to_ethertype(filter.attrs.protocol),
    };
    options.push(TcFilterFlowerOption::EthType(eth_type));

    if let Some(ip_proto) = filter.flower.ip_proto {
        options.push(TcFilterFlowerOption::IpProto(ip_proto_to_nl(ip_proto)));
    }
    if let Some(dst_ip) = filter.flower.dst_ip {
        match dst_ip {
            IpNet::V4(net) => {
                options.push(TcFilterFlowerOption::Ipv4Dst(net.addr()));
                options.push(TcFilterFlowerOption::Ipv4DstMask(net.netmask()));
            }
            IpNet::V6(net) => {
                options.push(TcFilterFlowerOption::Ipv6Dst(net.addr()));
                options.push(TcFilterFlowerOption::Ipv6DstMask(net.netmask()));
            }
        }
    }
    if let Some(dst_port) = filter.flower.dst_port {
        match filter.flower.ip_proto {
            Some(FlowerIpProto::Udp) => options.push(TcFilterFlowerOption::UdpDst(dst_port)),
            _ => options.push(TcFilterFlowerOption::TcpDst(dst_port)),
        }
    }

    if !filter.actions.is_empty() {
        let actions = filter
            .actions
            .iter()
            .map(|action| match action {
                Action::Generic(control) => gact(*control),
            })
            .collect();
        options.push(TcFilterFlowerOption::Actions(actions));
    }

    options
}

fn parse_tc_actions(actions: &[TcAction]) -> Vec<Action> {
    let mut out = Vec::new();
    for action in actions {
        let mut is_gact = false;
        let mut control = None;
        for attr in &action.attributes {
            match attr {
                TcActionAttribute::Kind(kind) => is_gact = kind == GACT_KIND,
                TcActionAttribute::Options(options) => {
                    for option in options {
                        if let TcActionOption::Generic(TcActionGenericOption::Parms(parms)) = option
                        {
                            control = tc_action_to_control(parms.action);
                        }
                    }
                }
                _ => {}
            }
        }
        if !is_gact {
            continue;
        }
        if let Some(control) = control {
            out.push(Action::Generic(control));
        }
    }
    out
}

fn parse_filter_message(message: &TcMessage) -> Option<FlowerFilter> {
    let (priority, protocol) = split_info(message.header.info);
    let Some(protocol) = ethertype_to_proto(protocol) else {
        warn!("skipping filter with unknown protocol ethertype");
        return None;
    };

    let mut kind_is_flower = false;
    let mut builder = FlowerFilterBuilder::new()
        .protocol(protocol)
        .priority(priority)
        .handle(packed(message.header.handle));

    let mut v4_dst = None;
    let mut v4_mask = None;
    let mut v6_dst = None;
    let mut v6_mask = None;

    for attr in &message.attributes {
        match attr {
            TcAttribute::Kind(kind) => kind_is_flower = kind == "flower",
            TcAttribute::Chain(chain) => builder = builder.chain(*chain),
            TcAttribute::Options(options) => {
                for option in options {
                    let TcOption::Flower(flower) = option else {
                        continue;
                    };
                    match flower {
                        TcFilterFlowerOption::EthType(eth_type) => {
                            if protocol == FilterProtocol::Dot1Q {
                                if let Some(inner) = ethertype_to_vlan(*eth_type) {
                                    builder = builder.vlan_eth_type(inner);
                                }
                            }
                        }
                        TcFilterFlowerOption::IpProto(ip_proto) => {
                            if let Some(ip_proto) = nl_to_ip_proto(*ip_proto) {
                                builder = builder.ip_proto(ip_proto);
                            }
                        }
                        TcFilterFlowerOption::Ipv4Dst(addr) => v4_dst = Some(*addr),
                        TcFilterFlowerOption::Ipv4DstMask(mask) => v4_mask = Some(*mask),
                        TcFilterFlowerOption::Ipv6Dst(addr) => v6_dst = Some(*addr),
                        TcFilterFlowerOption::Ipv6DstMask(mask) => v6_mask = Some(*mask),
                        TcFilterFlowerOption::TcpDst(port) | TcFilterFlowerOption::UdpDst(port) => {
                            builder = builder.dst_port(*port);
                        }
                        TcFilterFlowerOption::Actions(actions) => {
                            for action in parse_tc_actions(actions) {
                                builder = builder.action(action);
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    if !kind_is_flower {
        return None;
    }

    if let Some(addr) = v4_dst {
        let net = match v4_mask {
            Some(mask) => Ipv4Net::with_netmask(addr, mask).ok()?,
            None => Ipv4Net::from(addr),
        };
        builder = builder.dst_ip(IpNet::V4(net));
    }
    if let Some(addr) = v6_dst {
        let net = match v6_mask {
            Some(mask) => Ipv6Net::with_netmask(addr, mask).ok()?,
            None => Ipv6Net::from(addr),
        };
        builder = builder.dst_ip(IpNet::V6(net));
    }

    Some(builder.build())
}

impl TcNetlink {
    /// Binds a driver to the named link.
    ///
    /// # Errors
    ///
    /// Returns an error when the link does not exist or netlink fails.
    pub async fn new(handle: Handle, netdev: &str) -> Result<Self, TcError> {
        let mut links = handle.link().get().match_name(netdev.to_owned()).execute();
        let link = links
            .try_next()
            .await?
            .ok_or_else(|| TcError::Parse(format!("link not found: {netdev}")))?;
        Ok(Self {
            handle,
            ifindex: link.header.index,
        })
    }

    fn ensure_ingress(qdisc: &Qdisc) -> Result<(), TcError> {
        if qdisc.is_ingress() {
            Ok(())
        } else {
            Err(TcError::UnsupportedQdisc(qdisc.kind.to_string()))
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn index(&self) -> i32 {
        self.ifindex as i32
    }
}

impl TcApi for TcNetlink {
    async fn qdisc_add(&self, qdisc: &Qdisc) -> Result<(), TcError> {
        Self::ensure_ingress(qdisc)?;
        self.handle
            .qdisc()
            .add(self.index())
            .ingress()
            .execute()
            .await?;
        Ok(())
    }

    async fn qdisc_del(&self, qdisc: &Qdisc) -> Result<(), TcError> {
        Self::ensure_ingress(qdisc)?;
        let mut request = self.handle.qdisc().del(self.index());
        request.message_mut().header.handle = TcHandle {
            major: 0xffff,
            minor: 0,
        };
        request.message_mut().header.parent = TcHandle {
            major: 0xffff,
            minor: 0xfff1,
        };
        request.execute().await?;
        Ok(())
    }

    async fn qdisc_list(&self) -> Result<Vec<Qdisc>, TcError> {
        let mut response = self.handle.qdisc().get().execute();
        let mut qdiscs = Vec::new();
        while let Some(message) = response.try_next().await? {
            #[allow(clippy::cast_sign_loss)]
            if message.header.index as u32 != self.ifindex {
                continue;
            }
            let is_ingress = message
                .attributes
                .iter()
                .any(|attr| matches!(attr, TcAttribute::Kind(kind) if kind == "ingress"));
            if !is_ingress {
                continue;
            }
            qdiscs.push(
                IngressQdiscBuilder::new()
                    .handle(packed(message.header.handle))
                    .parent(packed(message.header.parent))
                    .build(),
            );
        }
        Ok(qdiscs)
    }

    async fn filter_add(&self, qdisc: &Qdisc, filter: &FlowerFilter) -> Result<(), TcError> {
        Self::ensure_ingress(qdisc)?;
        if filter.attrs.kind != FilterKind::Flower {
            return Err(TcError::UnsupportedFilter(filter.attrs.kind.to_string()));
        }

        let mut request = self
            .handle
            .traffic_filter(self.index())
            .add()
            .parent(CHAIN_DEFAULT_PARENT)
            .priority(filter.attrs.priority.unwrap_or_default())
            .protocol(proto_to_ethertype(filter.attrs.protocol).to_be());
        if let Some(chain) = filter.attrs.chain {
            request = request.chain(chain);
        }
        request
            .flower(flower_options(filter).as_slice())?
            .execute()
            .await?;
        Ok(())
    }

    async fn filter_del(&self, qdisc: &Qdisc, attrs: &FilterAttrs) -> Result<(), TcError> {
        Self::ensure_ingress(qdisc)?;
        if attrs.kind != FilterKind::Flower {
            return Err(TcError::UnsupportedFilter(attrs.kind.to_string()));
        }

        let mut request = self.handle.traffic_filter(self.index()).del();
        request.message_mut().header.parent = TcHandle {
            major: 0xffff,
            minor: 0xfff1,
        };
        request.message_mut().header.info = (u32::from(attrs.priority.unwrap_or_default()) << 16)
            | u32::from(proto_to_ethertype(attrs.protocol).to_be());
        if let Some(chain) = attrs.chain {
            request
                .message_mut()
                .attributes
                .push(TcAttribute::Chain(chain));
        }
        request.execute().await?;
        Ok(())
    }

    async fn filter_list(&self, qdisc: &Qdisc) -> Result<Vec<FlowerFilter>, TcError> {
        Self::ensure_ingress(qdisc)?;
        let mut response = self
            .handle
            .traffic_filter(self.index())
            .get()
            .parent(CHAIN_DEFAULT_PARENT)
            .execute();
        let mut filters = Vec::new();
        while let Some(message) = response.try_next().await? {
            if let Some(filter) = parse_filter_message(&message) {
                filters.push(filter);
            }
        }
        Ok(filters)
    }

    async fn chain_add(&self, qdisc: &Qdisc, chain: &Chain) -> Result<(), TcError> {
        Self::ensure_ingress(qdisc)?;
        self.handle
            .traffic_chain(self.index())
            .add()
            .parent(chain.parent.unwrap_or(CHAIN_DEFAULT_PARENT))
            .chain(u32::from(chain.chain.unwrap_or_default()))
            .execute()
            .await?;
        Ok(())
    }

    async fn chain_del(&self, qdisc: &Qdisc, chain: &Chain) -> Result<(), TcError> {
        Self::ensure_ingress(qdisc)?;
        self.handle
            .traffic_chain(self.index())
            .del()
            .parent(chain.parent.unwrap_or(CHAIN_DEFAULT_PARENT))
            .chain(u32::from(chain.chain.unwrap_or_default()))
            .execute()
            .await?;
        Ok(())
    }

    async fn chain_list(&self, qdisc: &Qdisc) -> Result<Vec<Chain>, TcError> {
        Self::ensure_ingress(qdisc)?;
        let mut response = self
            .handle
            .traffic_chain(self.index())
            .get()
            .parent(CHAIN_DEFAULT_PARENT)
            .execute();
        let mut chains = Vec::new();
        while let Some(message) = response.try_next().await? {
            let mut builder = ChainBuilder::new().parent(packed(message.header.parent));
            for attr in &message.attributes {
                if let TcAttribute::Chain(chain) = attr {
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        builder = builder.chain(*chain as u16);
                    }
                }
            }
            chains.push(builder.build());
        }
        Ok(chains)
    }
}
