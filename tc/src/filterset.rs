// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A mathematical set of flower filters with value equality.
//!
//! Membership is an equality-based linear scan; expected cardinality is tens
//! to low hundreds of filters per interface, so no hashing is attempted
//! (filter equality is normalized and cannot piggyback on `Hash`).

use crate::types::FlowerFilter;

#[derive(Clone, Debug, Default)]
pub struct FilterSet {
    items: Vec<FlowerFilter>,
}

impl FilterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `filter` unless an equal filter is already present.
    pub fn add(&mut self, filter: FlowerFilter) {
        if !self.has(&filter) {
            self.items.push(filter);
        }
    }

    /// Removes the filter equal to `filter`; a no-op when absent.
    pub fn remove(&mut self, filter: &FlowerFilter) {
        if let Some(idx) = self.items.iter().position(|f| f == filter) {
            self.items.swap_remove(idx);
        }
    }

    #[must_use]
    pub fn has(&self, filter: &FlowerFilter) -> bool {
        self.items.iter().any(|f| f == filter)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether every element of `self` is an element of `other` (⊆).
    #[must_use]
    pub fn is_subset_of(&self, other: &FilterSet) -> bool {
        self.len() <= other.len() && self.items.iter().all(|f| other.has(f))
    }

    /// Elements present in both sets.
    #[must_use]
    pub fn intersect(&self, other: &FilterSet) -> FilterSet {
        let mut out = FilterSet::new();
        for filter in &self.items {
            if other.has(filter) {
                out.add(filter.clone());
            }
        }
        out
    }

    /// Elements of `self` not present in `other`.
    #[must_use]
    pub fn difference(&self, other: &FilterSet) -> FilterSet {
        let mut out = FilterSet::new();
        for filter in &self.items {
            if !other.has(filter) {
                out.add(filter.clone());
            }
        }
        out
    }

    #[must_use]
    pub fn list(&self) -> &[FlowerFilter] {
        &self.items
    }

    #[must_use]
    pub fn into_list(self) -> Vec<FlowerFilter> {
        self.items
    }
}

impl PartialEq for FilterSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.is_subset_of(other)
    }
}

impl Eq for FilterSet {}

impl FromIterator<FlowerFilter> for FilterSet {
    fn from_iter<I: IntoIterator<Item = FlowerFilter>>(iter: I) -> Self {
        let mut set = FilterSet::new();
        for filter in iter {
            set.add(filter);
        }
        set
    }
}
