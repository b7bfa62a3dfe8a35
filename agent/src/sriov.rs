// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! SR-IOV representor lookup: a pure `(pci_addr) → rep_netdev` resolution in
//! three sysfs steps — VF index from the PCI address, uplink netdev from the
//! physical function, representor from the uplink's switch by port name.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("cannot determine VF index for PCI address {0}")]
    NoVfIndex(String),
    #[error("no uplink netdev for PCI address {0}")]
    NoUplink(String),
    #[error("no representor netdev for uplink {uplink} VF index {vf_index}")]
    NoRepresentor { uplink: String, vf_index: u32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Resolves the representor netdev for a VF's PCI address. Errors are
/// transient: the interface is skipped for the current reconcile pass.
pub trait RepresentorResolver: Send + Sync {
    fn vf_representor(&self, pci_address: &str) -> Result<String, ResolveError>;
}

/// Sysfs-backed resolver. Roots are injectable so tests can stage a fake
/// sysfs tree.
pub struct SysfsResolver {
    pci_root: PathBuf,
    net_root: PathBuf,
}

impl Default for SysfsResolver {
    fn default() -> Self {
        Self {
            pci_root: PathBuf::from("/sys/bus/pci/devices"),
            net_root: PathBuf::from("/sys/class/net"),
        }
    }
}

/// Normalizes a `phys_port_name` to a VF index. Accepted forms are
/// `vf<N>` and `pf<X>vf<N>`.
fn parse_port_name(name: &str) -> Option<u32> {
    let name = name.trim();
    let vf_at = name.find("vf")?;
    let prefix = &name[..vf_at];
    let index = &name[vf_at + 2..];
    let prefix_ok = prefix.is_empty()
        || (prefix.len() > 2
            && prefix.starts_with("pf")
            && prefix[2..].chars().all(|c| c.is_ascii_digit()));
    if !prefix_ok {
        return None;
    }
    index.parse().ok()
}

impl SysfsResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_roots(pci_root: impl Into<PathBuf>, net_root: impl Into<PathBuf>) -> Self {
        Self {
            pci_root: pci_root.into(),
            net_root: net_root.into(),
        }
    }

    fn physfn_dir(&self, pci_address: &str) -> PathBuf {
        self.pci_root.join(pci_address).join("physfn")
    }

    /// The VF's index on its physical function: the `virtfn<N>` link under
    /// the physfn directory pointing back at the VF's PCI address.
    fn vf_index(&self, pci_address: &str) -> Result<u32, ResolveError> {
        for entry in std::fs::read_dir(self.physfn_dir(pci_address))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(index) = name.strip_prefix("virtfn") else {
                continue;
            };
            let Ok(target) = std::fs::read_link(entry.path()) else {
                continue;
            };
            if target.file_name().is_some_and(|t| t == pci_address) {
                if let Ok(index) = index.parse() {
                    return Ok(index);
                }
            }
        }
        Err(ResolveError::NoVfIndex(pci_address.to_owned()))
    }

    /// The uplink netdev of the VF's physical function.
    fn uplink(&self, pci_address: &str) -> Result<String, ResolveError> {
        let net_dir = self.physfn_dir(pci_address).join("net");
        let mut names: Vec<String> = std::fs::read_dir(net_dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
            .into_iter()
            .next()
            .ok_or_else(|| ResolveError::NoUplink(pci_address.to_owned()))
    }

    fn read_trimmed(path: &Path) -> Option<String> {
        std::fs::read_to_string(path)
            .ok()
            .map(|s| s.trim().to_owned())
    }

    /// The representor netdev: a sibling of the uplink on the same switch
    /// whose port name normalizes to the VF index.
    fn representor(&self, uplink: &str, vf_index: u32) -> Result<String, ResolveError> {
        let switch_id = Self::read_trimmed(&self.net_root.join(uplink).join("phys_switch_id"))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ResolveError::NoRepresentor {
                uplink: uplink.to_owned(),
                vf_index,
            })?;

        for entry in std::fs::read_dir(&self.net_root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == uplink {
                continue;
            }
            let dev_switch_id = Self::read_trimmed(&entry.path().join("phys_switch_id"));
            if dev_switch_id.as_deref() != Some(switch_id.as_str()) {
                continue;
            }
            let Some(port_name) = Self::read_trimmed(&entry.path().join("phys_port_name")) else {
                continue;
            };
            if parse_port_name(&port_name) == Some(vf_index) {
                return Ok(name);
            }
        }
        Err(ResolveError::NoRepresentor {
            uplink: uplink.to_owned(),
            vf_index,
        })
    }
}

impl RepresentorResolver for SysfsResolver {
    fn vf_representor(&self, pci_address: &str) -> Result<String, ResolveError> {
        let vf_index = self.vf_index(pci_address)?;
        let uplink = self.uplink(pci_address)?;
        self.representor(&uplink, vf_index)
    }
}
