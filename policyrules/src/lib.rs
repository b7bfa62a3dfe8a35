// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Abstract policy rules for multinet-tc.
//!
//! The renderer evaluates multi-network policies against a cluster snapshot
//! and emits, per pod interface, an ordered set of match/action rules
//! (CIDRs × ports × action). The TC generator consumes these rule sets;
//! nothing in this crate knows about TC.

#![deny(clippy::all)]

pub mod renderer;
pub mod types;

pub use renderer::{RenderError, Renderer};
pub use types::{IfcInfo, PolicyAction, PolicyKind, PolicyRuleSet, Port, PortProtocol, Rule};
