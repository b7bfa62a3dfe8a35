// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use clap::Parser;
use std::path::PathBuf;
use tc::TcDriverKind;

#[derive(Parser, Clone, Debug)]
#[command(name = "multinet-tc")]
#[command(about = "Enforces multi-network policies on SR-IOV VF representors via Linux TC")]
pub struct Options {
    /// Path to a kubeconfig file with authorization information. When
    /// absent, in-cluster configuration is used.
    #[arg(long, value_name = "PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// Address of the Kubernetes API server (overrides any value in the
    /// kubeconfig).
    #[arg(long, value_name = "URL")]
    pub master: Option<String>,

    /// Identity to use for node-local pod filtering and as event source
    /// instead of the actual hostname.
    #[arg(long, value_name = "NAME")]
    pub hostname_override: Option<String>,

    /// CNI plugin types whose attachments are considered for network
    /// policies.
    #[arg(
        long,
        value_name = "PLUGIN[,PLUGIN...]",
        value_delimiter = ',',
        default_value = "accelerated-bridge"
    )]
    pub network_plugins: Vec<String>,

    /// When set, dump per-pod human readable rules under this directory for
    /// troubleshooting.
    #[arg(long, value_name = "DIR")]
    pub pod_rules_path: Option<PathBuf>,

    /// How to program TC: "cmdline" shells out to tc(8), "netlink" speaks
    /// to the kernel directly.
    #[arg(long, value_name = "cmdline|netlink", default_value_t = TcDriverKind::Cmdline)]
    pub tc_driver: TcDriverKind,

    /// Default tracing filter (overridable per target, e.g.
    /// "info,tc=debug").
    #[arg(long, value_name = "FILTER", default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = Options::parse_from(["multinet-tc"]);
        assert!(options.kubeconfig.is_none());
        assert_eq!(options.network_plugins, vec!["accelerated-bridge".to_owned()]);
        assert_eq!(options.tc_driver, TcDriverKind::Cmdline);
        assert!(options.pod_rules_path.is_none());
        assert_eq!(options.log_level, "info");
    }

    #[test]
    fn network_plugins_split_on_commas() {
        let options = Options::parse_from([
            "multinet-tc",
            "--network-plugins",
            "accelerated-bridge,ovs",
            "--tc-driver",
            "netlink",
        ]);
        assert_eq!(
            options.network_plugins,
            vec!["accelerated-bridge".to_owned(), "ovs".to_owned()]
        );
        assert_eq!(options.tc_driver, TcDriverKind::Netlink);
    }
}
