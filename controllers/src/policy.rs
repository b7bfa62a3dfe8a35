// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::tracker::ChangeTracker;
use crate::NamespacedName;
use k8s_api::annotations::{parse_policy_networks, POLICY_FOR_ANNOTATION};
use k8s_api::MultiNetworkPolicy;
use std::collections::HashMap;

/// Materialized view of a multi-network policy.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyInfo {
    /// The raw policy object.
    pub policy: MultiNetworkPolicy,
    /// Normalized `namespace/name` network references from the policy-for
    /// annotation.
    pub policy_networks: Vec<String>,
}

impl PolicyInfo {
    fn from_policy(policy: &MultiNetworkPolicy) -> Self {
        let namespace = policy.metadata.namespace.as_deref().unwrap_or_default();
        let policy_networks = policy
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(POLICY_FOR_ANNOTATION))
            .map(|annotation| parse_policy_networks(annotation, namespace))
            .unwrap_or_default();
        Self {
            policy: policy.clone(),
            policy_networks,
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        self.policy.metadata.namespace.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.policy.metadata.name.as_deref().unwrap_or_default()
    }

    /// Whether this policy governs the named network.
    #[must_use]
    pub fn applies_to_network(&self, network: &str) -> bool {
        self.policy_networks.iter().any(|n| n == network)
    }
}

/// Authoritative policy map keyed by `namespace/name`.
pub type PolicyMap = HashMap<NamespacedName, PolicyInfo>;

/// Delta buffer for policy events.
#[derive(Debug, Default)]
pub struct PolicyChangeTracker {
    tracker: ChangeTracker<NamespacedName, PolicyInfo>,
}

impl PolicyChangeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one policy event into the buffer. Returns `false` iff both
    /// sides are absent.
    pub fn update(
        &self,
        previous: Option<&MultiNetworkPolicy>,
        current: Option<&MultiNetworkPolicy>,
    ) -> bool {
        let Some(policy) = current.or(previous) else {
            return false;
        };
        let key = NamespacedName::new(
            policy.metadata.namespace.clone().unwrap_or_default(),
            policy.metadata.name.clone().unwrap_or_default(),
        );
        self.tracker.update(
            key,
            previous.map(PolicyInfo::from_policy),
            current.map(PolicyInfo::from_policy),
        );
        true
    }

    pub fn apply(&self, map: &mut PolicyMap) {
        self.tracker.apply(map);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }
}
