// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The `MultiNetworkPolicy` CRD (`k8s.cni.cncf.io/v1beta1`).
//!
//! Field shapes follow the upstream multi-networkpolicy API: the spec mirrors
//! `NetworkPolicySpec` from core Kubernetes, with peers carrying either an
//! `ipBlock` or a pod/namespace selector pair.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `policyTypes` entry selecting egress rule enforcement.
pub const POLICY_TYPE_EGRESS: &str = "Egress";
/// `policyTypes` entry selecting ingress rule enforcement.
pub const POLICY_TYPE_INGRESS: &str = "Ingress";

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "k8s.cni.cncf.io",
    version = "v1beta1",
    kind = "MultiNetworkPolicy",
    plural = "multi-networkpolicies",
    namespaced,
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct MultiNetworkPolicySpec {
    /// Pods the policy applies to. An empty selector selects every pod in the
    /// policy's namespace.
    #[serde(default)]
    pub pod_selector: LabelSelector,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<MultiNetworkPolicyIngressRule>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub egress: Vec<MultiNetworkPolicyEgressRule>,

    /// Which rule kinds this policy enforces. When empty the policy is
    /// treated as applying to the rule lists it carries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_types: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MultiNetworkPolicyIngressRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<MultiNetworkPolicyPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from: Vec<MultiNetworkPolicyPeer>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MultiNetworkPolicyEgressRule {
    /// Destination ports. An absent list allows all ports.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<MultiNetworkPolicyPort>,
    /// Destination peers. An absent list allows all destinations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<MultiNetworkPolicyPeer>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MultiNetworkPolicyPort {
    /// `TCP` or `UDP`; defaults to `TCP` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Numeric port. Named ports are not resolvable on secondary networks
    /// and are skipped by the renderer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<IntOrString>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MultiNetworkPolicyPeer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_block: Option<IpBlock>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IpBlock {
    pub cidr: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub except: Vec<String>,
}
