// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The `NetworkAttachmentDefinition` CRD (`k8s.cni.cncf.io/v1`) and the CNI
//! configuration documents carried in its `spec.config` field.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "k8s.cni.cncf.io",
    version = "v1",
    kind = "NetworkAttachmentDefinition",
    plural = "network-attachment-definitions",
    namespaced,
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttachmentDefinitionSpec {
    /// CNI configuration: either a single network configuration document or
    /// a configuration list (`{"plugins": [...]}`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

/// A single CNI network configuration document. Only the fields this agent
/// consumes are modeled.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CniNetConf {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub plugin_type: String,
}

/// A CNI network configuration list document.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CniNetConfList {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub plugins: Vec<CniNetConf>,
}

#[derive(Debug, thiserror::Error)]
pub enum CniConfigError {
    #[error("attachment definition carries no CNI configuration")]
    MissingConfig,
    #[error("failed to decode CNI configuration: {0}")]
    Decode(#[from] serde_json::Error),
}

impl NetworkAttachmentDefinition {
    /// CNI plugin type of this attachment: the first plugin of a plugin
    /// list, else the top-level `type` of a single configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when `spec.config` is absent or not valid JSON.
    pub fn cni_plugin_type(&self) -> Result<String, CniConfigError> {
        let config = self
            .spec
            .config
            .as_deref()
            .ok_or(CniConfigError::MissingConfig)?;

        let conf_list: CniNetConfList = serde_json::from_str(config)?;
        if let Some(first) = conf_list.plugins.first() {
            return Ok(first.plugin_type.clone());
        }

        let conf: CniNetConf = serde_json::from_str(config)?;
        Ok(conf.plugin_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn netdef(config: Option<&str>) -> NetworkAttachmentDefinition {
        NetworkAttachmentDefinition::new(
            "accel-net",
            NetworkAttachmentDefinitionSpec {
                config: config.map(str::to_owned),
            },
        )
    }

    #[test]
    fn plugin_type_from_single_config() {
        let nd = netdef(Some(
            r#"{"cniVersion": "0.3.1", "name": "accel-net", "type": "accelerated-bridge"}"#,
        ));
        assert_eq!(nd.cni_plugin_type().unwrap(), "accelerated-bridge");
    }

    #[test]
    fn plugin_type_from_plugin_list_takes_first() {
        let nd = netdef(Some(
            r#"{"cniVersion": "0.3.1", "name": "accel-net",
                "plugins": [{"type": "accelerated-bridge"}, {"type": "tuning"}]}"#,
        ));
        assert_eq!(nd.cni_plugin_type().unwrap(), "accelerated-bridge");
    }

    #[test]
    fn missing_config_is_an_error() {
        assert!(matches!(
            netdef(None).cni_plugin_type(),
            Err(CniConfigError::MissingConfig)
        ));
    }

    #[test]
    fn malformed_config_is_an_error() {
        assert!(matches!(
            netdef(Some("not json")).cni_plugin_type(),
            Err(CniConfigError::Decode(_))
        ));
    }
}
