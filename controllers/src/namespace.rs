// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::tracker::ChangeTracker;
use k8s_openapi::api::core::v1::Namespace;
use std::collections::{BTreeMap, HashMap};

/// Materialized view of a namespace: only name and labels are consumed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl NamespaceInfo {
    fn from_namespace(ns: &Namespace) -> Self {
        Self {
            name: ns.metadata.name.clone().unwrap_or_default(),
            labels: ns.metadata.labels.clone().unwrap_or_default(),
        }
    }
}

/// Authoritative namespace map keyed by name.
pub type NamespaceMap = HashMap<String, NamespaceInfo>;

/// Delta buffer for namespace events.
#[derive(Debug, Default)]
pub struct NamespaceChangeTracker {
    tracker: ChangeTracker<String, NamespaceInfo>,
}

impl NamespaceChangeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one namespace event into the buffer. Returns `false` iff both
    /// sides are absent (nothing to track).
    pub fn update(&self, previous: Option<&Namespace>, current: Option<&Namespace>) -> bool {
        let Some(ns) = current.or(previous) else {
            return false;
        };
        let key = ns.metadata.name.clone().unwrap_or_default();
        self.tracker.update(
            key,
            previous.map(NamespaceInfo::from_namespace),
            current.map(NamespaceInfo::from_namespace),
        );
        true
    }

    pub fn apply(&self, map: &mut NamespaceMap) {
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
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                        .collect(),
                ),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        }
    }

    #[test]
    fn identical_update_is_suppressed() {
        let tracker = NamespaceChangeTracker::new();
        let ns = namespace("source", &[("team", "net")]);
        assert!(tracker.update(Some(&ns), Some(&ns)));
        assert!(tracker.is_empty());
    }

    #[test]
    fn both_absent_is_a_noop() {
        let tracker = NamespaceChangeTracker::new();
        assert!(!tracker.update(None, None));
    }

    #[test]
    fn label_change_reaches_the_map() {
        let tracker = NamespaceChangeTracker::new();
        let mut map = NamespaceMap::new();

        let before = namespace("source", &[]);
        tracker.update(None, Some(&before));
        tracker.apply(&mut map);
        assert!(map["source"].labels.is_empty());

        let after = namespace("source", &[("kubernetes.io/metadata.name", "source")]);
        tracker.update(Some(&before), Some(&after));
        tracker.apply(&mut map);
        assert_eq!(
            map["source"].labels.get("kubernetes.io/metadata.name"),
            Some(&"source".to_owned())
        );

        tracker.update(Some(&after), None);
        tracker.apply(&mut map);
        assert!(map.is_empty());
    }
}
