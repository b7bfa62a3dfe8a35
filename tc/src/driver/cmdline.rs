// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Shell-out TC driver: invokes `tc -json` with arguments rendered by the
//! object model and parses the JSON documents `tc` prints for list
//! operations.

use crate::driver::TcApi;
use crate::error::TcError;
use crate::types::{
    Chain, ChainBuilder, CmdLineArgs, FilterAttrs, FlowerFilter, FlowerFilterBuilder,
    IngressQdiscBuilder, Qdisc, QdiscKind,
};
use ipnet::IpNet;
use serde::Deserialize;
use std::net::IpAddr;
use tokio::process::Command;
use tracing::{trace, warn};

pub struct TcCmdline {
    netdev: String,
}

#[derive(Debug, Default, Deserialize)]
struct JsonQdisc {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    handle: String,
    #[serde(default)]
    parent: String,
}

#[derive(Debug, Default, Deserialize)]
struct JsonChain {
    #[serde(default)]
    parent: String,
    #[serde(default)]
    chain: u16,
}

#[derive(Debug, Default, Deserialize)]
struct JsonFilter {
    #[serde(default)]
    protocol: String,
    #[serde(default, rename = "pref")]
    priority: u16,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    chain: u32,
    #[serde(default)]
    options: Option<JsonFilterOptions>,
}

#[derive(Debug, Default, Deserialize)]
struct JsonFilterOptions {
    #[serde(default)]
    handle: u32,
    #[serde(default)]
    keys: JsonFlowerKeys,
    #[serde(default)]
    actions: Vec<JsonAction>,
}

#[derive(Debug, Default, Deserialize)]
struct JsonFlowerKeys {
    #[serde(default)]
    vlan_ethtype: Option<String>,
    #[serde(default)]
    ip_proto: Option<String>,
    #[serde(default)]
    dst_ip: Option<String>,
    #[serde(default)]
    dst_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct JsonAction {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    control_action: JsonControlAction,
}

#[derive(Debug, Default, Deserialize)]
struct JsonControlAction {
    #[serde(rename = "type", default)]
    kind: String,
}

/// Parses a TC `major:minor` string into its packed 32-bit form:
/// `"ffff:fff1"` → `0xfffffff1`, `"ffff:"` and `"ffff"` → `0xffff`.
fn parse_major_minor(value: &str) -> Result<u32, TcError> {
    let parts: Vec<&str> = value.split(':').collect();
    match parts.as_slice() {
        [single] => u32::from_str_radix(single, 16)
            .map_err(|err| TcError::Parse(format!("bad handle {value:?}: {err}"))),
        [major, minor] => {
            let major = u32::from_str_radix(major, 16)
                .map_err(|err| TcError::Parse(format!("bad handle {value:?}: {err}")))?;
            if minor.is_empty() {
                return Ok(major);
            }
            let minor = u32::from_str_radix(minor, 16)
                .map_err(|err| TcError::Parse(format!("bad handle {value:?}: {err}")))?;
            Ok(((major & 0xffff) << 16) | (minor & 0xffff))
        }
        _ => Err(TcError::Parse(format!("bad major:minor string: {value:?}"))),
    }
}

/// Parses an IP or CIDR string into a prefix; bare addresses get a full
/// mask.
fn ip_to_ipnet(value: &str) -> Result<IpNet, TcError> {
    if value.contains('/') {
        value
            .parse::<IpNet>()
            .map_err(|err| TcError::Parse(format!("bad dst_ip {value:?}: {err}")))
    } else {
        value
            .parse::<IpAddr>()
            .map(IpNet::from)
            .map_err(|err| TcError::Parse(format!("bad dst_ip {value:?}: {err}")))
    }
}

fn parse_qdiscs(out: &[u8]) -> Result<Vec<Qdisc>, TcError> {
    let docs: Vec<JsonQdisc> = serde_json::from_slice(out)?;
    let mut qdiscs = Vec::new();
    for doc in docs {
        if doc.kind != QdiscKind::Ingress.to_string() {
            continue;
        }
        qdiscs.push(
            IngressQdiscBuilder::new()
                .handle(parse_major_minor(&doc.handle)?)
                .parent(parse_major_minor(&doc.parent)?)
                .build(),
        );
    }
    Ok(qdiscs)
}

fn parse_chains(out: &[u8]) -> Result<Vec<Chain>, TcError> {
    let docs: Vec<JsonChain> = serde_json::from_slice(out)?;
    let mut chains = Vec::new();
    for doc in docs {
        let mut builder = ChainBuilder::new().chain(doc.chain);
        if !doc.parent.is_empty() {
            builder = builder.parent(parse_major_minor(&doc.parent)?);
        }
        chains.push(builder.build());
    }
    Ok(chains)
}

fn parse_filters(out: &[u8]) -> Result<Vec<FlowerFilter>, TcError> {
    let docs: Vec<JsonFilter> = serde_json::from_slice(out)?;
    let mut filters = Vec::new();
    'filters: for doc in docs {
        // tc prints each filter twice, once bare and once with options
        let Some(options) = doc.options else {
            continue;
        };
        if doc.kind != "flower" {
            return Err(TcError::UnsupportedFilter(doc.kind));
        }

        let protocol = match doc.protocol.parse() {
            Ok(protocol) => protocol,
            Err(err) => {
                warn!(%err, "skipping filter with unknown protocol");
                continue;
            }
        };
        let mut builder = FlowerFilterBuilder::new()
            .protocol(protocol)
            .chain(doc.chain)
            .priority(doc.priority)
            .handle(options.handle);

        if let Some(vlan_ethtype) = &options.keys.vlan_ethtype {
            match vlan_ethtype.parse() {
                Ok(vlan_ethtype) => builder = builder.vlan_eth_type(vlan_ethtype),
                Err(err) => {
                    warn!(%err, "skipping filter with unknown vlan_ethtype");
                    continue;
                }
            }
        }
        if let Some(ip_proto) = &options.keys.ip_proto {
            match ip_proto.parse() {
                Ok(ip_proto) => builder = builder.ip_proto(ip_proto),
                Err(err) => {
                    warn!(%err, "skipping filter with unknown ip_proto");
                    continue;
                }
            }
        }
        if let Some(dst_ip) = &options.keys.dst_ip {
            builder = builder.dst_ip(ip_to_ipnet(dst_ip)?);
        }
        if let Some(dst_port) = options.keys.dst_port {
            builder = builder.dst_port(dst_port);
        }

        for action in &options.actions {
            if action.kind != "gact" {
                return Err(TcError::Parse(format!(
                    "unexpected action kind: {}",
                    action.kind
                )));
            }
            match action.control_action.kind.parse() {
                Ok(control) => builder = builder.action(crate::types::Action::Generic(control)),
                Err(err) => {
                    warn!(%err, "skipping filter with unknown control action");
                    continue 'filters;
                }
            }
        }
        filters.push(builder.build());
    }
    Ok(filters)
}

impl TcCmdline {
    pub fn new(netdev: impl Into<String>) -> Self {
        Self {
            netdev: netdev.into(),
        }
    }

    async fn exec(&self, args: Vec<String>) -> Result<Vec<u8>, TcError> {
        trace!(netdev = self.netdev.as_str(), args = args.join(" "), "executing tc");
        let output = Command::new("tc").arg("-json").args(&args).output().await?;
        if !output.status.success() {
            return Err(TcError::Command(format!(
                "tc {}: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    fn base_args(&self, object: &str, verb: &str) -> Vec<String> {
        vec![
            object.to_owned(),
            verb.to_owned(),
            "dev".to_owned(),
            self.netdev.clone(),
        ]
    }
}

impl TcApi for TcCmdline {
    async fn qdisc_add(&self, qdisc: &Qdisc) -> Result<(), TcError> {
        let mut args = self.base_args("qdisc", "add");
        args.extend(qdisc.cmd_args());
        self.exec(args).await.map(drop)
    }

    async fn qdisc_del(&self, qdisc: &Qdisc) -> Result<(), TcError> {
        let mut args = self.base_args("qdisc", "del");
        args.extend(qdisc.cmd_args());
        self.exec(args).await.map(drop)
    }

    async fn qdisc_list(&self) -> Result<Vec<Qdisc>, TcError> {
        let out = self.exec(self.base_args("qdisc", "list")).await?;
        parse_qdiscs(&out)
    }

    async fn filter_add(&self, qdisc: &Qdisc, filter: &FlowerFilter) -> Result<(), TcError> {
        let mut args = self.base_args("filter", "add");
        args.extend(qdisc.cmd_args());
        args.extend(filter.cmd_args());
        self.exec(args).await.map(drop)
    }

    async fn filter_del(&self, qdisc: &Qdisc, attrs: &FilterAttrs) -> Result<(), TcError> {
        let mut args = self.base_args("filter", "del");
        args.extend(qdisc.cmd_args());
        args.extend(attrs.cmd_args());
        self.exec(args).await.map(drop)
    }

    async fn filter_list(&self, qdisc: &Qdisc) -> Result<Vec<FlowerFilter>, TcError> {
        let mut args = self.base_args("filter", "list");
        args.extend(qdisc.cmd_args());
        let out = self.exec(args).await?;
        parse_filters(&out)
    }

    async fn chain_add(&self, qdisc: &Qdisc, chain: &Chain) -> Result<(), TcError> {
        let mut args = self.base_args("chain", "add");
        args.extend(qdisc.cmd_args());
        args.extend(chain.cmd_args());
        self.exec(args).await.map(drop)
    }

    async fn chain_del(&self, qdisc: &Qdisc, chain: &Chain) -> Result<(), TcError> {
        let mut args = self.base_args("chain", "del");
        args.extend(qdisc.cmd_args());
        args.extend(chain.cmd_args());
        self.exec(args).await.map(drop)
    }

    async fn chain_list(&self, qdisc: &Qdisc) -> Result<Vec<Chain>, TcError> {
        let mut args = self.base_args("chain", "list");
        args.extend(qdisc.cmd_args());
        let out = self.exec(args).await?;
        parse_chains(&out)
    }
}
