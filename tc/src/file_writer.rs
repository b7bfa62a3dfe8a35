// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Writes a generated TC program to a file in a human-readable, two-section
//! form (`qdisc:` line, then one `tc` cmdline-form line per filter). Used
//! for debugging when `--pod-rules-path` is set; the file is rewritten only
//! when its content differs.

use crate::error::TcError;
use crate::generator::Objects;
use crate::types::CmdLineArgs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct FileWriter {
    path: PathBuf,
}

impl FileWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renders `objects` and writes them to the file, unless the rendered
    /// content matches what is already there.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub async fn actuate(&self, objects: &Objects) -> Result<(), TcError> {
        let mut rendered = String::new();
        match &objects.qdisc {
            None => rendered.push_str("qdisc: <none>\n"),
            Some(qdisc) => {
                rendered.push_str("qdisc: ");
                rendered.push_str(&qdisc.cmd_args().join(" "));
                rendered.push('\n');
            }
        }
        rendered.push_str("filters:\n");
        for filter in &objects.filters {
            rendered.push_str(&filter.cmd_args().join(" "));
            rendered.push('\n');
        }

        if let Ok(current) = tokio::fs::read_to_string(&self.path).await {
            if current == rendered {
                debug!(path = %self.path.display(), "rules unchanged, not rewriting");
                return Ok(());
            }
        }

        debug!(path = %self.path.display(), "saving rules");
        tokio::fs::write(&self.path, rendered).await?;
        Ok(())
    }
}
