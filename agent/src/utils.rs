// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::error::AgentError;

/// Resolves this node's identity: the override when given, else the
/// `HOSTNAME` environment variable, else `gethostname(2)`. The result is
/// trimmed and lowercased; an empty hostname is an error.
pub fn get_hostname(hostname_override: Option<&str>) -> Result<String, AgentError> {
    let raw = match hostname_override {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => match std::env::var("HOSTNAME") {
            Ok(name) if !name.trim().is_empty() => name,
            _ => nix::unistd::gethostname()
                .map_err(|errno| AgentError::Hostname(errno.desc().to_owned()))?
                .to_string_lossy()
                .into_owned(),
        },
    };
    let hostname = raw.trim().to_lowercase();
    if hostname.is_empty() {
        return Err(AgentError::Hostname("empty hostname is invalid".to_owned()));
    }
    Ok(hostname)
}

/// Whether two node names refer to the same node, ignoring any domain
/// suffix.
#[must_use]
pub fn node_names_match(a: &str, b: &str) -> bool {
    let short = |name: &str| name.split('.').next().unwrap_or_default().to_owned();
    short(a) == short(b)
}
