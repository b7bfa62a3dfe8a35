// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! TC drivers: one small imperative API over the kernel TC subsystem for a
//! single netdev, with two siblings behind a tagged variant — a shell-out
//! to `tc -json` and a direct rtnetlink implementation. Drivers do not
//! retry; the actuator decides what a failure means.

pub mod cmdline;
pub mod netlink;

use crate::error::TcError;
use crate::types::{Chain, FilterAttrs, FlowerFilter, Qdisc};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

pub use cmdline::TcCmdline;
pub use netlink::TcNetlink;

/// Imperative TC operations on one netdev.
pub trait TcApi {
    fn qdisc_add(&self, qdisc: &Qdisc) -> impl Future<Output = Result<(), TcError>> + Send;
    fn qdisc_del(&self, qdisc: &Qdisc) -> impl Future<Output = Result<(), TcError>> + Send;
    fn qdisc_list(&self) -> impl Future<Output = Result<Vec<Qdisc>, TcError>> + Send;

    fn filter_add(
        &self,
        qdisc: &Qdisc,
        filter: &FlowerFilter,
    ) -> impl Future<Output = Result<(), TcError>> + Send;
    fn filter_del(
        &self,
        qdisc: &Qdisc,
        attrs: &FilterAttrs,
    ) -> impl Future<Output = Result<(), TcError>> + Send;
    fn filter_list(
        &self,
        qdisc: &Qdisc,
    ) -> impl Future<Output = Result<Vec<FlowerFilter>, TcError>> + Send;

    fn chain_add(
        &self,
        qdisc: &Qdisc,
        chain: &Chain,
    ) -> impl Future<Output = Result<(), TcError>> + Send;
    fn chain_del(
        &self,
        qdisc: &Qdisc,
        chain: &Chain,
    ) -> impl Future<Output = Result<(), TcError>> + Send;
    fn chain_list(&self, qdisc: &Qdisc) -> impl Future<Output = Result<Vec<Chain>, TcError>> + Send;
}

/// Which driver implementation to use, selected at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TcDriverKind {
    #[default]
    Cmdline,
    Netlink,
}

impl Display for TcDriverKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TcDriverKind::Cmdline => write!(f, "cmdline"),
            TcDriverKind::Netlink => write!(f, "netlink"),
        }
    }
}

impl FromStr for TcDriverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cmdline" => Ok(TcDriverKind::Cmdline),
            "netlink" => Ok(TcDriverKind::Netlink),
            other => Err(format!("unknown TC driver: {other:?}")),
        }
    }
}

/// The two driver implementations behind one dispatchable type.
pub enum TcDriver {
    Cmdline(TcCmdline),
    Netlink(TcNetlink),
}

macro_rules! dispatch {
    ($self:ident, $driver:ident => $call:expr) => {
        match $self {
            TcDriver::Cmdline($driver) => $call.await,
            TcDriver::Netlink($driver) => $call.await,
        }
    };
}

impl TcApi for TcDriver {
    async fn qdisc_add(&self, qdisc: &Qdisc) -> Result<(), TcError> {
        dispatch!(self, driver => driver.qdisc_add(qdisc))
    }

    async fn qdisc_del(&self, qdisc: &Qdisc) -> Result<(), TcError> {
        dispatch!(self, driver => driver.qdisc_del(qdisc))
    }

    async fn qdisc_list(&self) -> Result<Vec<Qdisc>, TcError> {
        dispatch!(self, driver => driver.qdisc_list())
    }

    async fn filter_add(&self, qdisc: &Qdisc, filter: &FlowerFilter) -> Result<(), TcError> {
        dispatch!(self, driver => driver.filter_add(qdisc, filter))
    }

    async fn filter_del(&self, qdisc: &Qdisc, attrs: &FilterAttrs) -> Result<(), TcError> {
        dispatch!(self, driver => driver.filter_del(qdisc, attrs))
    }

    async fn filter_list(&self, qdisc: &Qdisc) -> Result<Vec<FlowerFilter>, TcError> {
        dispatch!(self, driver => driver.filter_list(qdisc))
    }

    async fn chain_add(&self, qdisc: &Qdisc, chain: &Chain) -> Result<(), TcError> {
        dispatch!(self, driver => driver.chain_add(qdisc, chain))
    }

    async fn chain_del(&self, qdisc: &Qdisc, chain: &Chain) -> Result<(), TcError> {
        dispatch!(self, driver => driver.chain_del(qdisc, chain))
    }

    async fn chain_list(&self, qdisc: &Qdisc) -> Result<Vec<Chain>, TcError> {
        dispatch!(self, driver => driver.chain_list(qdisc))
    }
}
