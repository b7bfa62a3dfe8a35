// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Typed TC objects: qdiscs, chains, flower filters and their actions.
//!
//! Every object renders its exact `tc(8)` command-line token sequence via
//! [`CmdLineArgs`]; this doubles as the canonical string form used by the
//! rules-file writer. Value equality carries two normalizations: an absent
//! chain equals chain 0, and a full-mask prefix renders as the bare address.

mod action;
mod chain;
mod filter;
mod qdisc;

pub use action::{Action, ControlAction};
pub use chain::{Chain, ChainBuilder, CHAIN_DEFAULT_CHAIN, CHAIN_DEFAULT_PARENT};
pub use filter::{
    FilterAttrs, FilterAttrsBuilder, FilterKind, FilterProtocol, FlowerFilter,
    FlowerFilterBuilder, FlowerIpProto, FlowerSpec, VlanEthType,
};
pub use qdisc::{IngressQdiscBuilder, Qdisc, QdiscKind};

/// Renders the `tc` command line tokens describing an object.
pub trait CmdLineArgs {
    fn cmd_args(&self) -> Vec<String>;
}

/// Formats a 32-bit TC handle as its `major:minor` hex form
/// (`0xfffffff1` → `"ffff:fff1"`).
#[must_use]
pub fn format_handle(handle: u32) -> String {
    #[allow(clippy::cast_possible_truncation)]
    let (major, minor) = ((handle >> 16) as u16, handle as u16);
    format!("{major:x}:{minor:x}")
}

#[cfg(test)]
mod tests {
    use super::format_handle;

    #[test]
    fn handle_formats_as_major_minor() {
        assert_eq!(format_handle(0xffff_fff1), "ffff:fff1");
        assert_eq!(format_handle(0xffff_0000), "ffff:0");
        assert_eq!(format_handle(0x1), "0:1");
    }
}
