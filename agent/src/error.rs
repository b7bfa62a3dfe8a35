// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::sriov::ResolveError;
use tc::TcError;

/// Agent-level errors. Startup variants are fatal (exit 1); the rest abort
/// one interface's reconcile and are retried on the next pass.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to determine hostname: {0}")]
    Hostname(String),
    #[error("failed to build kubernetes configuration: {0}")]
    KubeConfig(String),
    #[error("kubernetes client error: {0}")]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to resolve VF representor: {0}")]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Tc(#[from] TcError),
}
