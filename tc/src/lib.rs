// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Linux Traffic Control for multinet-tc.
//!
//! The crate is layered the way the kernel interaction is layered: a typed
//! object model ([`types`]) with value equality and a canonical `tc` command
//! line rendering, a set algebra over filters ([`filterset`]), two drivers
//! speaking to the kernel ([`driver`]), a pure generator turning abstract
//! policy rule sets into TC programs ([`generator`]), and an actuator
//! reconciling a program against a driver ([`actuator`]).

#![deny(clippy::all)]

pub mod actuator;
pub mod driver;
pub mod error;
pub mod file_writer;
pub mod filterset;
pub mod generator;
pub mod types;

pub use actuator::Actuator;
pub use driver::{TcApi, TcCmdline, TcDriver, TcDriverKind, TcNetlink};
pub use error::TcError;
pub use file_writer::FileWriter;
pub use filterset::FilterSet;
pub use generator::{Objects, SimpleGenerator};
