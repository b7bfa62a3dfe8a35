// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Multus pod and policy annotations.
//!
//! Pods reference secondary networks through `k8s.v1.cni.cncf.io/networks`
//! (JSON array or comma-separated references) and report the realized
//! attachments through `k8s.v1.cni.cncf.io/network-status`. Policies name
//! their target networks through `k8s.v1.cni.cncf.io/policy-for`.

use serde::{Deserialize, Serialize};

/// Pod annotation listing requested secondary network attachments.
pub const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";
/// Pod annotation reporting the realized secondary network attachments.
pub const NETWORK_STATUS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/network-status";
/// Policy annotation enumerating the attachment definitions it targets.
pub const POLICY_FOR_ANNOTATION: &str = "k8s.v1.cni.cncf.io/policy-for";

/// `device-info.type` value for PCI-backed attachments.
pub const DEVICE_INFO_TYPE_PCI: &str = "pci";

/// One requested network attachment, as referenced from the `networks`
/// annotation.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct NetworkSelectionElement {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

/// One realized network attachment, as reported in the `network-status`
/// annotation.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct NetworkStatus {
    pub name: String,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub mac: String,
    #[serde(default, rename = "device-info", skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DeviceInfo {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pci: Option<PciDeviceInfo>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PciDeviceInfo {
    #[serde(rename = "pci-address", default)]
    pub pci_address: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AnnotationError {
    #[error("invalid network attachment reference: {0:?}")]
    InvalidReference(String),
    #[error("failed to decode annotation JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("network status carries no device-info")]
    NoDeviceInfo,
    #[error("device-info type is not PCI: {0:?}")]
    NotPci(String),
    #[error("device-info carries no PCI address")]
    NoPciAddress,
}

/// Parses the `networks` annotation. Accepts either a JSON array of
/// selection elements or a comma-separated list of `[namespace/]name[@ifname]`
/// references.
///
/// # Errors
///
/// Returns an error for malformed JSON or references with more than one `/`.
pub fn parse_pod_networks(annotation: &str) -> Result<Vec<NetworkSelectionElement>, AnnotationError> {
    let trimmed = annotation.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    let mut elements = Vec::new();
    for item in trimmed.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (reference, interface) = match item.split_once('@') {
            Some((r, ifname)) => (r, Some(ifname.to_owned())),
            None => (item, None),
        };
        let (namespace, name) = match reference.split_once('/') {
            Some((ns, rest)) if !rest.contains('/') => (Some(ns.to_owned()), rest),
            Some(_) => return Err(AnnotationError::InvalidReference(item.to_owned())),
            None => (None, reference),
        };
        if name.is_empty() {
            return Err(AnnotationError::InvalidReference(item.to_owned()));
        }
        elements.push(NetworkSelectionElement {
            name: name.to_owned(),
            namespace,
            interface,
        });
    }
    Ok(elements)
}

/// Parses the `network-status` annotation (a JSON array of status objects).
///
/// # Errors
///
/// Returns an error for malformed JSON.
pub fn parse_network_status(annotation: &str) -> Result<Vec<NetworkStatus>, AnnotationError> {
    Ok(serde_json::from_str(annotation)?)
}

/// Parses the `policy-for` annotation value into normalized
/// `namespace/name` references. Bare names inherit `default_namespace`;
/// whitespace and empty items are dropped.
#[must_use]
pub fn parse_policy_networks(annotation: &str, default_namespace: &str) -> Vec<String> {
    let stripped: String = annotation.chars().filter(|c| !c.is_whitespace()).collect();
    stripped
        .split(',')
        .filter(|item| !item.is_empty())
        .map(|item| {
            if item.contains('/') {
                item.to_owned()
            } else {
                format!("{default_namespace}/{item}")
            }
        })
        .collect()
}

impl NetworkStatus {
    /// PCI address (BDF) of the device backing this attachment.
    ///
    /// # Errors
    ///
    /// Returns an error when the status carries no PCI device info.
    pub fn device_id(&self) -> Result<&str, AnnotationError> {
        let info = self.device_info.as_ref().ok_or(AnnotationError::NoDeviceInfo)?;
        if info.kind != DEVICE_INFO_TYPE_PCI {
            return Err(AnnotationError::NotPci(info.kind.clone()));
        }
        let pci = info.pci.as_ref().ok_or(AnnotationError::NoPciAddress)?;
        if pci.pci_address.is_empty() {
            return Err(AnnotationError::NoPciAddress);
        }
        Ok(&pci.pci_address)
    }
}
