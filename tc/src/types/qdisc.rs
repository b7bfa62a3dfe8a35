// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::types::CmdLineArgs;
use std::fmt::{Display, Formatter};

/// Qdisc kinds this system manages. Only the ingress qdisc is programmed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum QdiscKind {
    #[default]
    Ingress,
}

impl Display for QdiscKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            QdiscKind::Ingress => write!(f, "ingress"),
        }
    }
}

/// A TC qdisc. `handle` and `parent` are packed `major:minor` values and are
/// populated by list operations; they are not required for add/delete of the
/// ingress qdisc, whose identity is fixed by the kernel
/// (handle `ffff:`, parent `ffff:fff1`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Qdisc {
    pub kind: QdiscKind,
    pub handle: Option<u32>,
    pub parent: Option<u32>,
}

impl Qdisc {
    /// A bare ingress qdisc, as used for add/delete requests.
    #[must_use]
    pub fn ingress() -> Self {
        Qdisc::default()
    }

    #[must_use]
    pub fn is_ingress(&self) -> bool {
        self.kind == QdiscKind::Ingress
    }
}

impl CmdLineArgs for Qdisc {
    fn cmd_args(&self) -> Vec<String> {
        // handle/parent are implied for the ingress qdisc
        vec![self.kind.to_string()]
    }
}

/// Builder for ingress [`Qdisc`] objects observed from the kernel.
#[derive(Debug, Default)]
pub struct IngressQdiscBuilder {
    handle: Option<u32>,
    parent: Option<u32>,
}

impl IngressQdiscBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn handle(mut self, handle: u32) -> Self {
        self.handle = Some(handle);
        self
    }

    #[must_use]
    pub fn parent(mut self, parent: u32) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn build(self) -> Qdisc {
        Qdisc {
            kind: QdiscKind::Ingress,
            handle: self.handle,
            parent: self.parent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingress_cmd_args() {
        assert_eq!(Qdisc::ingress().cmd_args(), vec!["ingress".to_owned()]);
    }

    #[test]
    fn builder_carries_observed_handles() {
        let qdisc = IngressQdiscBuilder::new()
            .handle(0xffff_0000)
            .parent(0xffff_fff1)
            .build();
        assert!(qdisc.is_ingress());
        assert_eq!(qdisc.handle, Some(0xffff_0000));
        assert_eq!(qdisc.parent, Some(0xffff_fff1));
    }
}
