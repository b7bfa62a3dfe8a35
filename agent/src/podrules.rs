// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-pod rules dumps under `--pod-rules-path`: one directory per pod UID
//! holding `<network-with-slashes-as-dashes>-<representor>.rules` files.
//! Directories of pods that no longer produce rules are pruned after each
//! reconcile pass.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tc::{FileWriter, Objects, TcError};
use tokio::fs::DirBuilder;
use tracing::{debug, warn};

pub struct PodRulesDir {
    base: PathBuf,
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_dir())
}

impl PodRulesDir {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Creates the base directory (mode 0700) if missing. Failure here is a
    /// startup error.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created.
    pub async fn ensure(&self) -> std::io::Result<()> {
        if is_dir(&self.base).await {
            return Ok(());
        }
        let mut builder = DirBuilder::new();
        builder.mode(0o700);
        builder.create(&self.base).await
    }

    /// Writes one interface's rules dump, creating the pod directory as
    /// needed. The file is rewritten only when content differs.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory or file cannot be written.
    pub async fn save(
        &self,
        pod_uid: &str,
        network: &str,
        representor: &str,
        objects: &Objects,
    ) -> Result<(), TcError> {
        let pod_dir = self.base.join(pod_uid);
        if !is_dir(&pod_dir).await {
            let mut builder = DirBuilder::new();
            builder.mode(0o700);
            builder.create(&pod_dir).await?;
        }
        let file_name = format!("{}-{}.rules", network.replace('/', "-"), representor);
        FileWriter::new(pod_dir.join(file_name)).actuate(objects).await
    }

    /// Removes rule directories of pods not in `active`.
    pub async fn prune(&self, active: &HashSet<String>) {
        let mut entries = match tokio::fs::read_dir(&self.base).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %self.base.display(), %err, "failed to read pod rules dir");
                return;
            }
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(path = %self.base.display(), %err, "failed to list pod rules dir");
                    break;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if active.contains(&name) {
                continue;
            }
            debug!(pod = name.as_str(), "deleting stale pod rules dir");
            if let Err(err) = tokio::fs::remove_dir_all(entry.path()).await {
                warn!(pod = name.as_str(), %err, "failed to delete pod rules dir");
            }
        }
    }
}
