// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::labels::{selector_is_empty, selector_matches, SelectorError};
use crate::netdef::NetDefChangeTracker;
use crate::tracker::ChangeTracker;
use crate::NamespacedName;
use k8s_api::annotations::{
    parse_network_status, parse_pod_networks, NetworkStatus, NETWORKS_ANNOTATION,
    NETWORK_STATUS_ANNOTATION,
};
use k8s_api::MultiNetworkPolicy;
use k8s_openapi::api::core::v1::Pod;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// One secondary network attachment of a pod whose CNI plugin type is in the
/// configured allow-list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// Network name exactly as reported in the pod's network-status.
    pub netattach_name: String,
    /// PCI address (BDF) of the backing VF.
    pub device_id: String,
    /// In-pod interface name.
    pub interface_name: String,
    /// CNI plugin type of the attachment definition.
    pub interface_type: String,
    /// IPs assigned to the interface.
    pub ips: Vec<String>,
}

impl InterfaceInfo {
    /// Whether this interface belongs to one of `policy_networks`.
    #[must_use]
    pub fn in_policy_networks(&self, policy_networks: &[String]) -> bool {
        policy_networks.iter().any(|n| n == &self.netattach_name)
    }
}

/// Materialized view of a pod. Pods that are not policy targets (not
/// running, or host-networked) carry an empty interface list but are still
/// tracked; they may become targets later.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PodInfo {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub node_name: String,
    pub network_status: Vec<NetworkStatus>,
    pub interfaces: Vec<InterfaceInfo>,
}

impl PodInfo {
    /// Whether `policy` applies to this pod: same namespace, and an empty or
    /// matching pod selector. This says nothing about the pod's networks.
    ///
    /// # Errors
    ///
    /// Returns an error for selectors this agent cannot evaluate.
    pub fn policy_applies(&self, policy: &MultiNetworkPolicy) -> Result<bool, SelectorError> {
        if policy.metadata.namespace.as_deref() != Some(self.namespace.as_str()) {
            return Ok(false);
        }
        if selector_is_empty(&policy.spec.pod_selector) {
            return Ok(true);
        }
        selector_matches(&policy.spec.pod_selector, &self.labels)
    }
}

/// Authoritative pod map keyed by `namespace/name`.
pub type PodMap = HashMap<NamespacedName, PodInfo>;

/// Whether the pod can be subject to multi-network policy: running and not
/// host-networked.
#[must_use]
pub fn is_policy_target(pod: &Pod) -> bool {
    let running = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Running");
    let host_network = pod
        .spec
        .as_ref()
        .and_then(|s| s.host_network)
        .unwrap_or(false);
    running && !host_network
}

/// Delta buffer for pod events.
///
/// Materialization is where the pod's secondary interfaces are derived:
/// the `networks` annotation is parsed, each referenced attachment is
/// cross-referenced against the netdef tracker for its plugin type, plugin
/// types are filtered against the allow-list, and the result is joined with
/// the `network-status` annotation for PCI addresses and IPs. Parse failures
/// are logged and leave the pod with an empty interface list; the pod is
/// re-evaluated on its next update.
#[derive(Debug)]
pub struct PodChangeTracker {
    tracker: ChangeTracker<NamespacedName, PodInfo>,
    network_plugins: Vec<String>,
    netdef_changes: Arc<NetDefChangeTracker>,
}

impl PodChangeTracker {
    #[must_use]
    pub fn new(network_plugins: Vec<String>, netdef_changes: Arc<NetDefChangeTracker>) -> Self {
        Self {
            tracker: ChangeTracker::new(),
            network_plugins,
            netdef_changes,
        }
    }

    fn pod_interfaces(&self, pod: &Pod, statuses: &[NetworkStatus]) -> Vec<InterfaceInfo> {
        let pod_namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        let annotations = pod.metadata.annotations.as_ref();

        let networks = match annotations.and_then(|a| a.get(NETWORKS_ANNOTATION)) {
            Some(annotation) => match parse_pod_networks(annotation) {
                Ok(networks) => networks,
                Err(err) => {
                    warn!(%err, "failed to parse pod networks annotation");
                    return Vec::new();
                }
            },
            None => return Vec::new(),
        };

        // netdef name -> plugin type, resolved against the netdef tracker
        let mut plugin_types: HashMap<NamespacedName, Option<String>> = HashMap::new();
        for network in &networks {
            let namespace = network.namespace.as_deref().unwrap_or(pod_namespace);
            let key = NamespacedName::new(namespace, network.name.clone());
            let plugin_type = self.netdef_changes.plugin_type(&key);
            plugin_types.insert(key, plugin_type);
        }

        let mut interfaces = Vec::new();
        for status in statuses {
            let key = match status.name.split_once('/') {
                Some((namespace, name)) => NamespacedName::new(namespace.trim(), name),
                None => NamespacedName::new(pod_namespace, status.name.clone()),
            };
            let Some(Some(plugin_type)) = plugin_types.get(&key) else {
                continue;
            };
            if !self.network_plugins.contains(plugin_type) {
                debug!(
                    network = %key,
                    plugin = plugin_type.as_str(),
                    "skipping interface with unmanaged plugin type"
                );
                continue;
            }
            let device_id = match status.device_id() {
                Ok(device_id) => device_id.to_owned(),
                Err(err) => {
                    warn!(network = %key, %err, "failed to get device ID for pod interface");
                    continue;
                }
            };
            interfaces.push(InterfaceInfo {
                netattach_name: status.name.clone(),
                device_id,
                interface_name: status.interface.clone(),
                interface_type: plugin_type.clone(),
                ips: status.ips.clone(),
            });
        }
        interfaces
    }

    fn materialize(&self, pod: &Pod) -> PodInfo {
        let mut statuses = Vec::new();
        let mut interfaces = Vec::new();

        if is_policy_target(pod) {
            statuses = match pod
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(NETWORK_STATUS_ANNOTATION))
            {
                Some(annotation) => match parse_network_status(annotation) {
                    Ok(statuses) => statuses,
                    Err(err) => {
                        debug!(%err, "unable to parse pod network status");
                        Vec::new()
                    }
                },
                None => Vec::new(),
            };
            interfaces = self.pod_interfaces(pod, &statuses);
        }

        PodInfo {
            uid: pod.metadata.uid.clone().unwrap_or_default(),
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            labels: pod.metadata.labels.clone().unwrap_or_default(),
            node_name: pod
                .spec
                .as_ref()
                .and_then(|s| s.node_name.clone())
                .unwrap_or_default(),
            network_status: statuses,
            interfaces,
        }
    }

    /// Folds one pod event into the buffer. Returns `false` iff both sides
    /// are absent.
    pub fn update(&self, previous: Option<&Pod>, current: Option<&Pod>) -> bool {
        let Some(pod) = current.or(previous) else {
            return false;
        };
        let key = NamespacedName::new(
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        self.tracker.update(
            key,
            previous.map(|p| self.materialize(p)),
            current.map(|p| self.materialize(p)),
        );
        true
    }

    pub fn apply(&self, map: &mut PodMap) {
        self.tracker.apply(map);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_api::{NetworkAttachmentDefinition, NetworkAttachmentDefinitionSpec};
    use k8s_openapi::api::core::v1::{PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn netdef_tracker_with(defs: &[(&str, &str, &str)]) -> Arc<NetDefChangeTracker> {
        let tracker = Arc::new(NetDefChangeTracker::new());
        for (namespace, name, plugin) in defs {
            let nd = NetworkAttachmentDefinition {
                metadata: ObjectMeta {
                    namespace: Some((*namespace).to_owned()),
                    name: Some((*name).to_owned()),
                    ..ObjectMeta::default()
                },
                spec: NetworkAttachmentDefinitionSpec {
                    config: Some(format!(r#"{{"name": "{name}", "type": "{plugin}"}}"#)),
                },
            };
            tracker.update(None, Some(&nd));
        }
        tracker
    }

    fn pod(namespace: &str, name: &str, annotations: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_owned()),
                name: Some(name.to_owned()),
                uid: Some(format!("uid-{name}")),
                labels: Some([("app".to_owned(), "target".to_owned())].into()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                        .collect(),
                ),
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec {
                node_name: Some("node1".to_owned()),
                ..PodSpec::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_owned()),
                ..PodStatus::default()
            }),
        }
    }

    const STATUS: &str = r#"[
        {"name": "default/accel-net", "interface": "net1",
         "ips": ["192.168.1.1"], "mac": "0a:58:c0:a8:01:01",
         "device-info": {"type": "pci", "version": "1.0.0",
                         "pci": {"pci-address": "0000:03:00.4"}}}
    ]"#;

    fn tracker() -> PodChangeTracker {
        PodChangeTracker::new(
            vec!["accelerated-bridge".to_owned()],
            netdef_tracker_with(&[("default", "accel-net", "accelerated-bridge")]),
        )
    }

    #[test]
    fn interfaces_join_networks_and_status() {
        let tracker = tracker();
        let pod = pod(
            "default",
            "target-pod",
            &[
                (NETWORKS_ANNOTATION, "accel-net"),
                (NETWORK_STATUS_ANNOTATION, STATUS),
            ],
        );
        let mut map = PodMap::new();
        assert!(tracker.update(None, Some(&pod)));
        tracker.apply(&mut map);

        let info = &map[&NamespacedName::new("default", "target-pod")];
        assert_eq!(info.interfaces.len(), 1);
        let ifc = &info.interfaces[0];
        assert_eq!(ifc.netattach_name, "default/accel-net");
        assert_eq!(ifc.interface_name, "net1");
        assert_eq!(ifc.device_id, "0000:03:00.4");
        assert_eq!(ifc.interface_type, "accelerated-bridge");
        assert_eq!(ifc.ips, vec!["192.168.1.1".to_owned()]);
    }

    #[test]
    fn unmanaged_plugin_type_is_filtered_out() {
        let tracker = PodChangeTracker::new(
            vec!["accelerated-bridge".to_owned()],
            netdef_tracker_with(&[("default", "accel-net", "macvlan")]),
        );
        let pod = pod(
            "default",
            "target-pod",
            &[
                (NETWORKS_ANNOTATION, "accel-net"),
                (NETWORK_STATUS_ANNOTATION, STATUS),
            ],
        );
        let mut map = PodMap::new();
        tracker.update(None, Some(&pod));
        tracker.apply(&mut map);
        assert!(map[&NamespacedName::new("default", "target-pod")]
            .interfaces
            .is_empty());
    }

    #[test]
    fn malformed_status_leaves_an_empty_interface_list() {
        let tracker = tracker();
        let pod = pod(
            "default",
            "target-pod",
            &[
                (NETWORKS_ANNOTATION, "accel-net"),
                (NETWORK_STATUS_ANNOTATION, "not json"),
            ],
        );
        let mut map = PodMap::new();
        tracker.update(None, Some(&pod));
        tracker.apply(&mut map);

        let info = &map[&NamespacedName::new("default", "target-pod")];
        assert!(info.interfaces.is_empty());
        assert!(info.network_status.is_empty());
    }

    #[test]
    fn non_running_pod_is_tracked_without_interfaces() {
        let tracker = tracker();
        let mut pending = pod(
            "default",
            "target-pod",
            &[
                (NETWORKS_ANNOTATION, "accel-net"),
                (NETWORK_STATUS_ANNOTATION, STATUS),
            ],
        );
        pending.status = Some(PodStatus {
            phase: Some("Pending".to_owned()),
            ..PodStatus::default()
        });

        let mut map = PodMap::new();
        tracker.update(None, Some(&pending));
        tracker.apply(&mut map);
        assert!(map[&NamespacedName::new("default", "target-pod")]
            .interfaces
            .is_empty());
    }

    #[test]
    fn identical_update_is_suppressed() {
        let tracker = tracker();
        let pod = pod(
            "default",
            "target-pod",
            &[
                (NETWORKS_ANNOTATION, "accel-net"),
                (NETWORK_STATUS_ANNOTATION, STATUS),
            ],
        );
        assert!(tracker.update(Some(&pod), Some(&pod)));
        assert!(tracker.is_empty());
    }
}
