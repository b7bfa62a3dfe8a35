// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::tracker::ChangeTracker;
use crate::NamespacedName;
use k8s_api::NetworkAttachmentDefinition;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

/// Materialized view of a network attachment definition.
#[derive(Clone, Debug, PartialEq)]
pub struct NetDefInfo {
    /// The raw attachment definition.
    pub netdef: NetworkAttachmentDefinition,
    /// CNI plugin type from the embedded CNI config (first plugin of a
    /// plugin list, else the top-level type).
    pub plugin_type: String,
}

/// Authoritative attachment-definition map keyed by `namespace/name`.
pub type NetDefMap = HashMap<NamespacedName, NetDefInfo>;

/// Delta buffer for attachment-definition events.
///
/// Unlike the other trackers this one also owns a materialized map, so the
/// pod tracker can resolve plugin types mid-materialization without waiting
/// for the next reconcile.
#[derive(Debug, Default)]
pub struct NetDefChangeTracker {
    tracker: ChangeTracker<NamespacedName, NetDefInfo>,
    map: Mutex<NetDefMap>,
}

impl NetDefChangeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn materialize(netdef: &NetworkAttachmentDefinition) -> Option<NetDefInfo> {
        match netdef.cni_plugin_type() {
            Ok(plugin_type) => Some(NetDefInfo {
                netdef: netdef.clone(),
                plugin_type,
            }),
            Err(err) => {
                warn!(
                    netdef = netdef.metadata.name.as_deref().unwrap_or_default(),
                    %err,
                    "failed to parse attachment definition CNI config"
                );
                None
            }
        }
    }

    /// Folds one attachment-definition event into the buffer. Returns
    /// `false` iff both sides are absent.
    pub fn update(
        &self,
        previous: Option<&NetworkAttachmentDefinition>,
        current: Option<&NetworkAttachmentDefinition>,
    ) -> bool {
        let Some(netdef) = current.or(previous) else {
            return false;
        };
        let key = NamespacedName::new(
            netdef.metadata.namespace.clone().unwrap_or_default(),
            netdef.metadata.name.clone().unwrap_or_default(),
        );
        self.tracker.update(
            key,
            previous.and_then(Self::materialize),
            current.and_then(Self::materialize),
        );
        true
    }

    pub fn apply(&self, map: &mut NetDefMap) {
        self.tracker.apply(map);
    }

    /// CNI plugin type of the attachment identified by `name`, folding any
    /// pending deltas into the internal map first.
    #[must_use]
    pub fn plugin_type(&self, name: &NamespacedName) -> Option<String> {
        let mut map = self.map.lock().expect("netdef map lock poisoned");
        self.tracker.apply(&mut map);
        map.get(name).map(|info| info.plugin_type.clone())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_api::NetworkAttachmentDefinitionSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn netdef(namespace: &str, name: &str, plugin: &str) -> NetworkAttachmentDefinition {
        NetworkAttachmentDefinition {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_owned()),
                name: Some(name.to_owned()),
                ..ObjectMeta::default()
            },
            spec: NetworkAttachmentDefinitionSpec {
                config: Some(format!(
                    r#"{{"cniVersion": "0.3.1", "name": "{name}", "type": "{plugin}"}}"#
                )),
            },
        }
    }

    #[test]
    fn create_create_delete_leaves_the_survivor() {
        // create nd1, create nd2, delete nd2: only nd1 survives the apply
        let tracker = NetDefChangeTracker::new();
        let mut map = NetDefMap::new();
        let nd1 = netdef("default", "accel-net", "accelerated-bridge");
        let nd2 = netdef("default", "other-net", "accelerated-bridge");

        assert!(tracker.update(None, Some(&nd1)));
        assert!(tracker.update(None, Some(&nd2)));
        assert!(tracker.update(Some(&nd2), None));
        tracker.apply(&mut map);

        assert_eq!(map.len(), 1);
        let info = &map[&NamespacedName::new("default", "accel-net")];
        assert_eq!(info.plugin_type, "accelerated-bridge");
    }

    #[test]
    fn plugin_type_sees_pending_deltas() {
        let tracker = NetDefChangeTracker::new();
        let nd = netdef("default", "accel-net", "accelerated-bridge");
        tracker.update(None, Some(&nd));
        assert_eq!(
            tracker.plugin_type(&NamespacedName::new("default", "accel-net")),
            Some("accelerated-bridge".to_owned())
        );
        assert_eq!(tracker.plugin_type(&NamespacedName::new("default", "nope")), None);
    }

    #[test]
    fn unparseable_config_materializes_as_absent() {
        let tracker = NetDefChangeTracker::new();
        let mut bad = netdef("default", "bad-net", "x");
        bad.spec.config = Some("not json".to_owned());

        tracker.update(None, Some(&bad));
        assert!(tracker.is_empty());
        assert_eq!(tracker.plugin_type(&NamespacedName::new("default", "bad-net")), None);
    }
}
