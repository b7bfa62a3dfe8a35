// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Cluster state for the multinet-tc agent.
//!
//! Each watched resource kind owns a pair: a [`tracker::ChangeTracker`]
//! (a lock-protected delta buffer written by watch callbacks) and an
//! authoritative map (owned by the reconciler, updated only through
//! `apply`). Trackers fold observed mutations into per-key before/after
//! pairs, commutatively with respect to event order, so the reconciler sees
//! every delta since it last synced as one batch.

#![deny(clippy::all)]

pub mod labels;
pub mod namespace;
pub mod netdef;
pub mod pod;
pub mod policy;
pub mod tracker;

use std::fmt::{Display, Formatter};

pub use labels::{selector_is_empty, selector_matches, SelectorError};
pub use namespace::{NamespaceChangeTracker, NamespaceInfo, NamespaceMap};
pub use netdef::{NetDefChangeTracker, NetDefInfo, NetDefMap};
pub use pod::{InterfaceInfo, PodChangeTracker, PodInfo, PodMap};
pub use policy::{PolicyChangeTracker, PolicyInfo, PolicyMap};
pub use tracker::ChangeTracker;

/// Resource identity: namespace plus name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for NamespacedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
