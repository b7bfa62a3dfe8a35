// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::types::{IfcInfo, PolicyAction, PolicyKind, PolicyRuleSet, Port, PortProtocol, Rule};
use controllers::{
    selector_is_empty, selector_matches, InterfaceInfo, NamespaceMap, PodInfo, PodMap, PolicyInfo,
    PolicyMap,
};
use ipnet::IpNet;
use k8s_api::multi_policy::{
    IpBlock, MultiNetworkPolicy, MultiNetworkPolicyPort, POLICY_TYPE_EGRESS,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("ingress rendering is not implemented")]
    IngressNotImplemented,
}

/// Renders per-interface policy rule sets for a target pod against a
/// cluster snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct Renderer;

impl Renderer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Renders egress rule sets for `target`: one per interface governed by
    /// at least one applicable policy, plus an empty (`rules: None`) set for
    /// every remaining pod interface.
    ///
    /// # Errors
    ///
    /// Infallible for egress; the `Result` mirrors [`Renderer::render_ingress`].
    pub fn render_egress(
        &self,
        target: &PodInfo,
        policies: &PolicyMap,
        pods: &PodMap,
        namespaces: &NamespaceMap,
    ) -> Result<Vec<PolicyRuleSet>, RenderError> {
        let mut rule_sets: HashMap<String, PolicyRuleSet> = HashMap::new();

        for policy in policies.values() {
            if !policy_renders_egress(&policy.policy) {
                debug!(
                    policy = %policy.name(),
                    "policy does not enforce egress, skipping"
                );
                continue;
            }
            match target.policy_applies(&policy.policy) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    warn!(
                        policy = %policy.name(),
                        %err,
                        "cannot evaluate policy pod selector, skipping policy"
                    );
                    continue;
                }
            }

            for ifc in &target.interfaces {
                if !policy.applies_to_network(&ifc.netattach_name) {
                    continue;
                }
                let rendered = self.render_egress_for_interface(ifc, policy, pods, namespaces);
                match rule_sets.entry(rendered.ifc_info.uid()) {
                    Entry::Occupied(mut entry) => {
                        if let (Some(existing), Some(new)) =
                            (entry.get_mut().rules.as_mut(), rendered.rules)
                        {
                            existing.extend(new);
                        }
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(rendered);
                    }
                }
            }
        }

        // interfaces no policy touched still get a rule set so the actuator
        // clears any leftover kernel state
        for ifc in &target.interfaces {
            let ifc_info = ifc_info_of(ifc);
            rule_sets.entry(ifc_info.uid()).or_insert(PolicyRuleSet {
                ifc_info,
                kind: PolicyKind::Egress,
                rules: None,
            });
        }

        let mut out: Vec<PolicyRuleSet> = rule_sets.into_values().collect();
        out.sort_by_key(|rs| rs.ifc_info.uid());
        Ok(out)
    }

    /// Ingress rendering is deliberately unimplemented.
    ///
    /// # Errors
    ///
    /// Always returns [`RenderError::IngressNotImplemented`].
    pub fn render_ingress(
        &self,
        _target: &PodInfo,
        _policies: &PolicyMap,
        _pods: &PodMap,
        _namespaces: &NamespaceMap,
    ) -> Result<Vec<PolicyRuleSet>, RenderError> {
        Err(RenderError::IngressNotImplemented)
    }

    fn render_egress_for_interface(
        &self,
        ifc: &InterfaceInfo,
        policy: &PolicyInfo,
        pods: &PodMap,
        namespaces: &NamespaceMap,
    ) -> PolicyRuleSet {
        let mut rules = Vec::new();

        for egress in &policy.policy.spec.egress {
            let ports = parse_ports(&egress.ports);
            for peer in &egress.to {
                if let Some(ip_block) = &peer.ip_block {
                    rules.extend(rules_with_ip_block(ip_block, &ports));
                } else if peer.pod_selector.is_some() || peer.namespace_selector.is_some() {
                    rules.extend(rules_with_selectors(
                        peer.pod_selector.as_ref(),
                        peer.namespace_selector.as_ref(),
                        &ports,
                        pods,
                        namespaces,
                        &ifc.netattach_name,
                        policy.namespace(),
                    ));
                }
                // a peer with neither ipBlock nor selectors is invalid, skip
            }

            // no peers at all: allow-to-any on these ports, allow-all when
            // ports are also empty
            if egress.to.is_empty() {
                rules.push(Rule {
                    ip_cidrs: Vec::new(),
                    ports,
                    action: PolicyAction::Pass,
                });
            }
        }

        PolicyRuleSet {
            ifc_info: ifc_info_of(ifc),
            kind: PolicyKind::Egress,
            rules: Some(rules),
        }
    }
}

/// Whether the policy enforces egress rules: an absent/empty `policyTypes`
/// list leaves the policy egress-applicable, otherwise the list must name
/// `Egress`. Ingress-only policies are not applicable to egress rendering.
fn policy_renders_egress(policy: &MultiNetworkPolicy) -> bool {
    policy.spec.policy_types.is_empty()
        || policy
            .spec
            .policy_types
            .iter()
            .any(|t| t == POLICY_TYPE_EGRESS)
}

fn ifc_info_of(ifc: &InterfaceInfo) -> IfcInfo {
    let ips = ifc
        .ips
        .iter()
        .filter_map(|ip| match ip.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(err) => {
                warn!(ip = ip.as_str(), %err, "failed to parse pod interface IP");
                None
            }
        })
        .collect();
    IfcInfo {
        network: ifc.netattach_name.clone(),
        interface_name: ifc.interface_name.clone(),
        ips,
        device_id: ifc.device_id.clone(),
    }
}

fn selector_matches_or_false(
    selector: &LabelSelector,
    labels: &std::collections::BTreeMap<String, String>,
) -> bool {
    selector_matches(selector, labels).unwrap_or(false)
}

fn has_expressions(selector: &LabelSelector) -> bool {
    selector
        .match_expressions
        .as_ref()
        .is_some_and(|exprs| !exprs.is_empty())
}

#[allow(clippy::too_many_arguments)]
fn rules_with_selectors(
    pod_selector: Option<&LabelSelector>,
    ns_selector: Option<&LabelSelector>,
    ports: &[Port],
    pods: &PodMap,
    namespaces: &NamespaceMap,
    network: &str,
    policy_namespace: &str,
) -> Vec<Rule> {
    // select peers by pod label across the whole cluster
    let matching: Vec<&PodInfo> = match pod_selector {
        None => pods.values().collect(),
        Some(selector) => {
            if has_expressions(selector) {
                warn!("cannot evaluate peer pod selector, skipping peer");
                return Vec::new();
            }
            if selector_is_empty(selector) {
                pods.values().collect()
            } else {
                pods.values()
                    .filter(|pod| selector_matches_or_false(selector, &pod.labels))
                    .collect()
            }
        }
    };

    // restrict by namespace: absent selector pins the policy's namespace,
    // an empty selector allows any, otherwise namespaces must match
    let matching: Vec<&PodInfo> = match ns_selector {
        None => matching
            .into_iter()
            .filter(|pod| pod.namespace == policy_namespace)
            .collect(),
        Some(selector) if selector_is_empty(selector) => matching,
        Some(selector) => {
            if has_expressions(selector) {
                warn!("cannot evaluate peer namespace selector, skipping peer");
                return Vec::new();
            }
            matching
                .into_iter()
                .filter(|pod| match namespaces.get(&pod.namespace) {
                    Some(ns) => selector_matches_or_false(selector, &ns.labels),
                    None => {
                        warn!(namespace = pod.namespace.as_str(), "namespace not in map, skipping pod");
                        false
                    }
                })
                .collect()
        }
    };

    // collect full-mask CIDRs of the peers' interfaces on this network
    let mut ip_cidrs: Vec<IpNet> = Vec::new();
    for pod in matching {
        for ifc in &pod.interfaces {
            if ifc.netattach_name != network {
                continue;
            }
            for ip in &ifc.ips {
                match ip.parse::<IpAddr>() {
                    Ok(ip) => ip_cidrs.push(IpNet::from(ip)),
                    Err(err) => {
                        warn!(ip = ip.as_str(), %err, "failed to parse peer pod IP");
                    }
                }
            }
        }
    }

    if ip_cidrs.is_empty() && ports.is_empty() {
        return Vec::new();
    }
    vec![Rule {
        ip_cidrs,
        ports: ports.to_vec(),
        action: PolicyAction::Pass,
    }]
}

fn rules_with_ip_block(ip_block: &IpBlock, ports: &[Port]) -> Vec<Rule> {
    let cidr: IpNet = match ip_block.cidr.parse() {
        Ok(cidr) => cidr,
        Err(err) => {
            warn!(cidr = ip_block.cidr.as_str(), %err, "failed to parse ipBlock CIDR");
            return Vec::new();
        }
    };
    let mut rules = vec![Rule {
        ip_cidrs: vec![cidr],
        ports: ports.to_vec(),
        action: PolicyAction::Pass,
    }];

    let except: Vec<IpNet> = ip_block
        .except
        .iter()
        .filter_map(|cidr| match cidr.parse() {
            Ok(cidr) => Some(cidr),
            Err(err) => {
                warn!(cidr = cidr.as_str(), %err, "failed to parse ipBlock except CIDR, skipping");
                None
            }
        })
        .collect();
    if !except.is_empty() {
        rules.push(Rule {
            ip_cidrs: except,
            ports: ports.to_vec(),
            action: PolicyAction::Drop,
        });
    }
    rules
}

fn parse_ports(ports: &[MultiNetworkPolicyPort]) -> Vec<Port> {
    let mut out = Vec::with_capacity(ports.len());
    for port in ports {
        let number = match &port.port {
            Some(IntOrString::Int(number)) => match u16::try_from(*number) {
                Ok(number) => number,
                Err(err) => {
                    warn!(port = number, %err, "port out of range, skipping");
                    continue;
                }
            },
            Some(IntOrString::String(name)) => match name.parse::<u16>() {
                Ok(number) => number,
                Err(err) => {
                    warn!(port = name.as_str(), %err, "cannot resolve named port, skipping");
                    continue;
                }
            },
            None => {
                warn!("policy port carries no port number, skipping");
                continue;
            }
        };
        let protocol = match port.protocol.as_deref() {
            None | Some("TCP") => PortProtocol::Tcp,
            Some("UDP") => PortProtocol::Udp,
            Some(other) => {
                warn!(protocol = other, "unsupported port protocol, skipping");
                continue;
            }
        };
        out.push(Port { protocol, number });
    }
    out
}
