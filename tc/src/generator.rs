// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Pure translation of abstract policy rule sets into TC programs.
//!
//! Filters use a three-band priority base plus a per-protocol offset:
//! default-drop at 300, pass at 200, drop at 100; IPv4 +0, IPv6 +1,
//! 802.1Q +2 (the two VLAN variants share a band and are disambiguated by
//! the inner ethertype). Anything not matched by a pass/drop filter falls
//! through to the four default-drop filters, so no chain-terminal drop is
//! needed.

use crate::error::TcError;
use crate::types::{
    Action, ControlAction, FilterProtocol, FlowerFilter, FlowerFilterBuilder, FlowerIpProto,
    Qdisc, VlanEthType,
};
use ipnet::IpNet;
use policyrules::{PolicyAction, PolicyKind, PolicyRuleSet, Port, PortProtocol};

/// Base priority of the default-drop filters.
pub const PRIO_DEFAULT: u16 = 300;
/// Base priority of pass filters.
pub const PRIO_PASS: u16 = 200;
/// Base priority of drop filters.
pub const PRIO_DROP: u16 = 100;

const ALL_PROTOCOLS: [FilterProtocol; 3] = [
    FilterProtocol::Ipv4,
    FilterProtocol::Ipv6,
    FilterProtocol::Dot1Q,
];

/// A generated TC program: the qdisc the filters live under, plus the
/// filters themselves.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Objects {
    pub qdisc: Option<Qdisc>,
    pub filters: Vec<FlowerFilter>,
}

/// The generator. Pure and deterministic; never consults cluster state.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimpleGenerator;

impl SimpleGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Renders the TC objects satisfying `rule_set`.
    ///
    /// A rule set without rules (`None`) yields the ingress qdisc and no
    /// filters; the actuator then flushes chain 0. A rule set with rules
    /// (even zero of them) additionally yields the default-drop baseline.
    ///
    /// # Errors
    ///
    /// Returns an error for ingress rule sets; ingress enforcement is not
    /// implemented.
    pub fn generate(&self, rule_set: &PolicyRuleSet) -> Result<Objects, TcError> {
        if rule_set.kind != PolicyKind::Egress {
            return Err(TcError::UnsupportedPolicyKind(rule_set.kind));
        }

        let qdisc = Some(Qdisc::ingress());
        let Some(rules) = &rule_set.rules else {
            return Ok(Objects {
                qdisc,
                filters: Vec::new(),
            });
        };

        let mut filters = gen_default_filters();
        for rule in rules {
            let (prio, control) = match rule.action {
                PolicyAction::Pass => (PRIO_PASS, ControlAction::Pass),
                PolicyAction::Drop => (PRIO_DROP, ControlAction::Drop),
            };
            filters.extend(gen_filters(
                &rule.ip_cidrs,
                &rule.ports,
                prio,
                Action::Generic(control),
            ));
        }
        Ok(Objects { qdisc, filters })
    }
}

/// The deny baseline: drop IPv4, IPv6, 802.1Q-inner-IPv4 and
/// 802.1Q-inner-IPv6 traffic at the default band.
fn gen_default_filters() -> Vec<FlowerFilter> {
    gen_filters(&[], &[], PRIO_DEFAULT, Action::Generic(ControlAction::Drop))
}

fn flower_ip_proto(protocol: PortProtocol) -> FlowerIpProto {
    match protocol {
        PortProtocol::Tcp => FlowerIpProto::Tcp,
        PortProtocol::Udp => FlowerIpProto::Udp,
    }
}

/// Expands one (CIDRs × ports) combination into flower filters at the given
/// priority band. With neither CIDRs nor ports the filters match all
/// IPv4/IPv6/802.1Q traffic with the given action.
fn gen_filters(ip_cidrs: &[IpNet], ports: &[Port], prio: u16, action: Action) -> Vec<FlowerFilter> {
    let mut filters = Vec::new();

    if !ip_cidrs.is_empty() {
        for cidr in ip_cidrs {
            let (proto, native_prio, inner) = match cidr {
                IpNet::V4(_) => (FilterProtocol::Ipv4, prio, VlanEthType::Ipv4),
                IpNet::V6(_) => (FilterProtocol::Ipv6, prio + 1, VlanEthType::Ipv6),
            };
            let vlan_prio = prio + 2;

            if ports.is_empty() {
                filters.push(
                    FlowerFilterBuilder::new()
                        .protocol(proto)
                        .priority(native_prio)
                        .dst_ip(*cidr)
                        .action(action)
                        .build(),
                );
                // the same endpoint may be reached with tagged traffic
                filters.push(
                    FlowerFilterBuilder::new()
                        .protocol(FilterProtocol::Dot1Q)
                        .priority(vlan_prio)
                        .vlan_eth_type(inner)
                        .dst_ip(*cidr)
                        .action(action)
                        .build(),
                );
            } else {
                for port in ports {
                    filters.push(
                        FlowerFilterBuilder::new()
                            .protocol(proto)
                            .priority(native_prio)
                            .dst_ip(*cidr)
                            .ip_proto(flower_ip_proto(port.protocol))
                            .dst_port(port.number)
                            .action(action)
                            .build(),
                    );
                    filters.push(
                        FlowerFilterBuilder::new()
                            .protocol(FilterProtocol::Dot1Q)
                            .priority(vlan_prio)
                            .vlan_eth_type(inner)
                            .dst_ip(*cidr)
                            .ip_proto(flower_ip_proto(port.protocol))
                            .dst_port(port.number)
                            .action(action)
                            .build(),
                    );
                }
            }
        }
    } else if !ports.is_empty() {
        for port in ports {
            for (idx, proto) in ALL_PROTOCOLS.iter().enumerate() {
                #[allow(clippy::cast_possible_truncation)]
                let actual_prio = prio + idx as u16;
                if *proto == FilterProtocol::Dot1Q {
                    for inner in [VlanEthType::Ipv4, VlanEthType::Ipv6] {
                        filters.push(
                            FlowerFilterBuilder::new()
                                .protocol(*proto)
                                .priority(actual_prio)
                                .vlan_eth_type(inner)
                                .ip_proto(flower_ip_proto(port.protocol))
                                .dst_port(port.number)
                                .action(action)
                                .build(),
                        );
                    }
                } else {
                    filters.push(
                        FlowerFilterBuilder::new()
                            .protocol(*proto)
                            .priority(actual_prio)
                            .ip_proto(flower_ip_proto(port.protocol))
                            .dst_port(port.number)
                            .action(action)
                            .build(),
                    );
                }
            }
        }
    } else {
        for (idx, proto) in ALL_PROTOCOLS.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let actual_prio = prio + idx as u16;
            if *proto == FilterProtocol::Dot1Q {
                for inner in [VlanEthType::Ipv4, VlanEthType::Ipv6] {
                    filters.push(
                        FlowerFilterBuilder::new()
                            .protocol(*proto)
                            .priority(actual_prio)
                            .vlan_eth_type(inner)
                            .action(action)
                            .build(),
                    );
                }
            } else {
                filters.push(
                    FlowerFilterBuilder::new()
                        .protocol(*proto)
                        .priority(actual_prio)
                        .action(action)
                        .build(),
                );
            }
        }
    }

    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filterset::FilterSet;
    use policyrules::{IfcInfo, Rule};

    fn rule_set(rules: Option<Vec<Rule>>) -> PolicyRuleSet {
        PolicyRuleSet {
            ifc_info: IfcInfo {
                network: "default/accel-net".to_owned(),
                interface_name: "net1".to_owned(),
                ips: vec!["192.168.1.2".parse().unwrap()],
                device_id: "0000:03:00.4".to_owned(),
            },
            kind: PolicyKind::Egress,
            rules,
        }
    }

    fn tcp(number: u16) -> Port {
        Port {
            protocol: PortProtocol::Tcp,
            number,
        }
    }

    fn udp(number: u16) -> Port {
        Port {
            protocol: PortProtocol::Udp,
            number,
        }
    }

    fn prios(filters: &[FlowerFilter]) -> Vec<u16> {
        let mut prios: Vec<u16> = filters.iter().filter_map(|f| f.attrs.priority).collect();
        prios.sort_unstable();
        prios
    }

    #[test]
    fn ingress_rule_sets_are_unsupported() {
        let mut rs = rule_set(Some(vec![]));
        rs.kind = PolicyKind::Ingress;
        assert!(matches!(
            SimpleGenerator::new().generate(&rs),
            Err(TcError::UnsupportedPolicyKind(PolicyKind::Ingress))
        ));
    }

    #[test]
    fn no_rules_yields_qdisc_without_filters() {
        let objects = SimpleGenerator::new().generate(&rule_set(None)).unwrap();
        assert_eq!(objects.qdisc, Some(Qdisc::ingress()));
        assert!(objects.filters.is_empty());
    }

    #[test]
    fn empty_rules_yield_the_default_drop_baseline() {
        let objects = SimpleGenerator::new()
            .generate(&rule_set(Some(vec![])))
            .unwrap();
        assert_eq!(objects.qdisc, Some(Qdisc::ingress()));
        assert_eq!(prios(&objects.filters), vec![300, 301, 302, 302]);

        let expected: FilterSet = [
            FlowerFilterBuilder::new()
                .protocol(FilterProtocol::Ipv4)
                .priority(300)
                .action(Action::Generic(ControlAction::Drop))
                .build(),
            FlowerFilterBuilder::new()
                .protocol(FilterProtocol::Ipv6)
                .priority(301)
                .action(Action::Generic(ControlAction::Drop))
                .build(),
            FlowerFilterBuilder::new()
                .protocol(FilterProtocol::Dot1Q)
                .priority(302)
                .vlan_eth_type(VlanEthType::Ipv4)
                .action(Action::Generic(ControlAction::Drop))
                .build(),
            FlowerFilterBuilder::new()
                .protocol(FilterProtocol::Dot1Q)
                .priority(302)
                .vlan_eth_type(VlanEthType::Ipv6)
                .action(Action::Generic(ControlAction::Drop))
                .build(),
        ]
        .into_iter()
        .collect();
        let actual: FilterSet = objects.filters.into_iter().collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn ip_block_scenario_expands_cidrs_by_ports() {
        // pass 10.17.0.0/16 and drop 10.17.0.0/24 on three ports each
        let ports = vec![tcp(6666), udp(7777), tcp(8888)];
        let objects = SimpleGenerator::new()
            .generate(&rule_set(Some(vec![
                Rule {
                    ip_cidrs: vec!["10.17.0.0/16".parse().unwrap()],
                    ports: ports.clone(),
                    action: PolicyAction::Pass,
                },
                Rule {
                    ip_cidrs: vec!["10.17.0.0/24".parse().unwrap()],
                    ports,
                    action: PolicyAction::Drop,
                },
            ])))
            .unwrap();

        // 4 defaults + 6 pass + 6 drop
        assert_eq!(objects.filters.len(), 16);
        assert_eq!(
            prios(&objects.filters),
            vec![100, 100, 100, 102, 102, 102, 200, 200, 200, 202, 202, 202, 300, 301, 302, 302]
        );

        let sample_pass = FlowerFilterBuilder::new()
            .protocol(FilterProtocol::Ipv4)
            .priority(200)
            .dst_ip("10.17.0.0/16".parse().unwrap())
            .ip_proto(FlowerIpProto::Udp)
            .dst_port(7777)
            .action(Action::Generic(ControlAction::Pass))
            .build();
        let sample_pass_vlan = FlowerFilterBuilder::new()
            .protocol(FilterProtocol::Dot1Q)
            .priority(202)
            .vlan_eth_type(VlanEthType::Ipv4)
            .dst_ip("10.17.0.0/16".parse().unwrap())
            .ip_proto(FlowerIpProto::Tcp)
            .dst_port(6666)
            .action(Action::Generic(ControlAction::Pass))
            .build();
        let sample_drop = FlowerFilterBuilder::new()
            .protocol(FilterProtocol::Ipv4)
            .priority(100)
            .dst_ip("10.17.0.0/24".parse().unwrap())
            .ip_proto(FlowerIpProto::Tcp)
            .dst_port(8888)
            .action(Action::Generic(ControlAction::Drop))
            .build();

        let set: FilterSet = objects.filters.into_iter().collect();
        assert!(set.has(&sample_pass));
        assert!(set.has(&sample_pass_vlan));
        assert!(set.has(&sample_drop));
    }

    #[test]
    fn default_allow_rule_passes_all_protocols() {
        // a pass rule with no CIDRs and no ports
        let objects = SimpleGenerator::new()
            .generate(&rule_set(Some(vec![Rule {
                ip_cidrs: vec![],
                ports: vec![],
                action: PolicyAction::Pass,
            }])))
            .unwrap();
        assert_eq!(
            prios(&objects.filters),
            vec![200, 201, 202, 202, 300, 301, 302, 302]
        );

        let pass_all_v4 = FlowerFilterBuilder::new()
            .protocol(FilterProtocol::Ipv4)
            .priority(200)
            .action(Action::Generic(ControlAction::Pass))
            .build();
        let set: FilterSet = objects.filters.into_iter().collect();
        assert!(set.has(&pass_all_v4));
    }

    #[test]
    fn ports_only_rule_covers_all_encapsulations() {
        let objects = SimpleGenerator::new()
            .generate(&rule_set(Some(vec![Rule {
                ip_cidrs: vec![],
                ports: vec![tcp(443)],
                action: PolicyAction::Pass,
            }])))
            .unwrap();
        // 4 defaults + ipv4 + ipv6 + two 802.1q variants
        assert_eq!(objects.filters.len(), 8);
        assert_eq!(
            prios(&objects.filters),
            vec![200, 201, 202, 202, 300, 301, 302, 302]
        );
        for filter in objects.filters.iter().filter(|f| f.attrs.priority < Some(300)) {
            assert_eq!(filter.flower.dst_port, Some(443));
            assert_eq!(filter.flower.ip_proto, Some(FlowerIpProto::Tcp));
        }
    }

    #[test]
    fn ipv6_cidrs_land_in_the_v6_band() {
        let objects = SimpleGenerator::new()
            .generate(&rule_set(Some(vec![Rule {
                ip_cidrs: vec!["2001:db8::/64".parse().unwrap()],
                ports: vec![],
                action: PolicyAction::Pass,
            }])))
            .unwrap();
        let pass: Vec<&FlowerFilter> = objects
            .filters
            .iter()
            .filter(|f| f.attrs.priority < Some(300))
            .collect();
        assert_eq!(pass.len(), 2);
        assert!(pass
            .iter()
            .any(|f| f.attrs.protocol == FilterProtocol::Ipv6 && f.attrs.priority == Some(201)));
        assert!(pass.iter().any(|f| {
            f.attrs.protocol == FilterProtocol::Dot1Q
                && f.attrs.priority == Some(202)
                && f.flower.vlan_eth_type == Some(VlanEthType::Ipv6)
        }));
    }
}
