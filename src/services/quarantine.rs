use super::load_order_file::{LoadOrderFile, LoadOrderFileError};
use crate::models::{LoadOrder, LoadOrderError, QuarantineDisposition};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use thiserror::Error;

/// Tool name written into removal markers
pub const DEFAULT_TOOL_NAME: &str = "CRASHBISECT";

#[derive(Error, Debug)]
pub enum QuarantineError {
    #[error(transparent)]
    LoadOrder(#[from] LoadOrderError),

    #[error("Failed to move {plugin} into {dir}: {source}")]
    Relocate {
        plugin: String,
        dir: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    File(#[from] LoadOrderFileError),
}

/// What one quarantine pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuarantineReport {
    /// Plugin files moved into the session quarantine directory
    pub relocated: Vec<String>,

    /// Plugins commented out (or dropped when their file was already gone)
    pub commented: Vec<String>,

    /// Already quarantined, left alone
    pub skipped: Vec<String>,

    /// Final content of the load-order file
    pub content: String,
}

/// Takes confirmed-failing plugins out of the load order at session end.
///
/// Works only on plugins marked failed; passed and untested plugins are never
/// touched. Applying it twice to the same final state yields the same file.
#[derive(Debug, Clone)]
pub struct QuarantineManager {
    data_dir: Utf8PathBuf,
    quarantine_dir: Utf8PathBuf,
    tool: String,
    marker_timestamp: String,
}

impl QuarantineManager {
    /// # Arguments
    /// * `data_dir` - Directory holding the plugin files
    /// * `quarantine_dir` - Session quarantine directory
    /// * `marker_timestamp` - Session timestamp used in every removal marker
    pub fn new(
        data_dir: impl Into<Utf8PathBuf>,
        quarantine_dir: impl Into<Utf8PathBuf>,
        marker_timestamp: impl Into<String>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            quarantine_dir: quarantine_dir.into(),
            tool: DEFAULT_TOOL_NAME.to_string(),
            marker_timestamp: marker_timestamp.into(),
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    pub fn quarantine_dir(&self) -> &Utf8Path {
        &self.quarantine_dir
    }

    /// Quarantine every failed plugin and rewrite the load-order file.
    ///
    /// # Arguments
    /// * `load_order` - Final session state; failed plugins become quarantined
    /// * `disposition` - Relocate the files or comment the entries out
    /// * `file` - The load-order file parsed at session start
    pub fn apply(
        &self,
        load_order: &mut LoadOrder,
        disposition: QuarantineDisposition,
        file: &LoadOrderFile,
    ) -> Result<QuarantineReport, QuarantineError> {
        let mut report = QuarantineReport {
            skipped: load_order.quarantined(),
            ..Default::default()
        };

        for plugin in load_order.failed() {
            let applied = match disposition {
                QuarantineDisposition::Relocated if self.relocate(&plugin)? => {
                    report.relocated.push(plugin.clone());
                    QuarantineDisposition::Relocated
                }
                QuarantineDisposition::Relocated => {
                    // Nothing to move; keep a marker so the removal stays visible.
                    report.commented.push(plugin.clone());
                    QuarantineDisposition::Commented
                }
                QuarantineDisposition::Commented => {
                    report.commented.push(plugin.clone());
                    QuarantineDisposition::Commented
                }
            };
            load_order.mark_quarantined(&plugin, applied)?;
            tracing::info!("Quarantined {} ({:?})", plugin, applied);
        }

        report.content = file.write_final(load_order, &self.tool, &self.marker_timestamp)?;
        Ok(report)
    }

    /// Move one plugin file into the quarantine directory.
    ///
    /// # Returns
    /// `true` when the file is (now) in quarantine, `false` when it was not found
    fn relocate(&self, plugin: &str) -> Result<bool, QuarantineError> {
        let source = self.data_dir.join(plugin);
        let target = self.quarantine_dir.join(plugin);

        if !source.exists() {
            if target.exists() {
                return Ok(true);
            }
            tracing::warn!("{} not found in {}, commenting it out instead", plugin, self.data_dir);
            return Ok(false);
        }

        let err = |source| QuarantineError::Relocate {
            plugin: plugin.to_string(),
            dir: self.quarantine_dir.clone(),
            source,
        };

        fs::create_dir_all(&self.quarantine_dir).map_err(err)?;
        if fs::rename(&source, &target).is_err() {
            // Different filesystem: copy then remove.
            fs::copy(&source, &target).map_err(err)?;
            fs::remove_file(&source).map_err(err)?;
        }
        tracing::info!("Moved {} to {}", source, target);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_relocate_missing_file_falls_back_to_comment() {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let plugin_file = root.join("plugins.txt");
        fs::write(&plugin_file, "A.esm\nB.esp\n").unwrap();

        let file = LoadOrderFile::read(&plugin_file).unwrap();
        let mut lo = LoadOrder::new(file.entries(), &names(&["A.esm"]), &[], &[]);
        lo.mark_failed(&names(&["B.esp"])).unwrap();

        let manager = QuarantineManager::new(&root, root.join("Quarantine"), "2025-05-01 10:00:00");
        let report = manager
            .apply(&mut lo, QuarantineDisposition::Relocated, &file)
            .unwrap();

        assert!(report.relocated.is_empty());
        assert_eq!(report.commented, names(&["B.esp"]));
        assert!(report
            .content
            .contains("#B.esp #REMOVED BY CRASHBISECT (2025-05-01 10:00:00)"));
    }
}
