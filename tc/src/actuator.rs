// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Reconciles a generated TC program against the kernel through a driver.
//!
//! The actuator is idempotent and one-shot: it lists current state, diffs
//! it against the desired program with filter-set semantics, and mutates
//! only the difference. It holds no state between calls; any driver error
//! aborts the current interface's reconcile and the next pass retries from
//! scratch.

use crate::driver::TcApi;
use crate::error::TcError;
use crate::filterset::FilterSet;
use crate::generator::Objects;
use crate::types::{Chain, ChainBuilder, Qdisc, CHAIN_DEFAULT_CHAIN};
use tracing::debug;

/// Applies TC programs to one netdev through a driver. All filters are
/// assumed to live in chain 0 of the ingress qdisc.
pub struct Actuator<T: TcApi> {
    api: T,
}

impl<T: TcApi> Actuator<T> {
    pub fn new(api: T) -> Self {
        Self { api }
    }

    /// Brings the kernel in line with `objects`.
    ///
    /// # Errors
    ///
    /// Returns [`TcError::QdiscRequired`] when filters are supplied without
    /// a qdisc, and propagates driver errors.
    pub async fn actuate(&self, objects: &Objects) -> Result<(), TcError> {
        if objects.qdisc.is_none() && !objects.filters.is_empty() {
            return Err(TcError::QdiscRequired);
        }

        let current_qdiscs = self.api.qdisc_list().await?;
        let ingress_exists = current_qdiscs.iter().any(Qdisc::is_ingress);

        let Some(qdisc) = &objects.qdisc else {
            // no program for this interface, drop the whole qdisc
            if ingress_exists {
                return self.api.qdisc_del(&Qdisc::ingress()).await;
            }
            return Ok(());
        };

        if objects.filters.is_empty() {
            // flush chain 0 if present, cascading its filters
            let chains = self.api.chain_list(&Qdisc::ingress()).await?;
            if chains
                .iter()
                .any(|c| c.chain == Some(CHAIN_DEFAULT_CHAIN))
            {
                let chain: Chain = ChainBuilder::new().chain(CHAIN_DEFAULT_CHAIN).build();
                return self.api.chain_del(qdisc, &chain).await;
            }
            return Ok(());
        }

        if !ingress_exists {
            self.api.qdisc_add(qdisc).await?;
        }

        let existing: FilterSet = self.api.filter_list(qdisc).await?.into_iter().collect();
        let desired: FilterSet = objects.filters.iter().cloned().collect();

        if existing == desired {
            debug!("filters unchanged, nothing to do");
            return Ok(());
        }

        let to_remove = existing.difference(&desired);
        let to_add = desired.difference(&existing);

        for filter in to_remove.list() {
            self.api.filter_del(qdisc, filter.attrs()).await?;
        }
        for filter in to_add.list() {
            self.api.filter_add(qdisc, filter).await?;
        }
        Ok(())
    }
}
