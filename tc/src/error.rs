// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use policyrules::PolicyKind;

/// Errors surfaced by TC drivers, the generator and the actuator.
///
/// Driver failures (`Command`, `Netlink`, `Io`) are transient: the caller
/// logs them and retries on the next reconcile. The remaining variants are
/// programmer errors and are surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum TcError {
    #[error("qdisc must be provided when filters are present")]
    QdiscRequired,
    #[error("unsupported qdisc kind: {0}")]
    UnsupportedQdisc(String),
    #[error("unsupported filter kind: {0}")]
    UnsupportedFilter(String),
    #[error("unsupported policy rule set kind: {0}")]
    UnsupportedPolicyKind(PolicyKind),
    #[error("tc command failed: {0}")]
    Command(String),
    #[error("failed to parse tc output: {0}")]
    Parse(String),
    #[error("netlink error: {0}")]
    Netlink(#[from] rtnetlink::Error),
    #[error("failed to decode tc json output: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
