//! Session artifacts.
//!
//! Every run owns three parallel directories under the session root, keyed by
//! the session timestamp:
//!
//! - `Backups/session_<ts>/plugins_original_backup.txt`
//! - `Logs/session_<ts>/plugin_test_results.txt` and `session_summary.yaml`
//! - `Quarantine/session_<ts>/`

pub mod outcome_log;

pub use outcome_log::{OutcomeEvent, OutcomeLog, OutcomeSender};

use crate::metrics::MetricsSnapshot;
use crate::models::LoadOrderSummary;
use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::fs;

pub const BACKUPS_DIR: &str = "Backups";
pub const LOGS_DIR: &str = "Logs";
pub const QUARANTINE_DIR: &str = "Quarantine";

pub const BACKUP_FILE_NAME: &str = "plugins_original_backup.txt";
pub const RESULTS_FILE_NAME: &str = "plugin_test_results.txt";
pub const SUMMARY_FILE_NAME: &str = "session_summary.yaml";

/// Session directory timestamp, e.g. `2025-05-01_14-03-59`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Timestamp written into removal markers
pub const MARKER_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How the run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Success,
    SanityFailure,
    LaunchFailure,
    Aborted { reverted: bool },
    Error,
}

/// Sealed record of a finished session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session: String,
    pub outcome: SessionOutcome,
    pub counts: LoadOrderSummary,
    pub metrics: MetricsSnapshot,
    pub failed: Vec<String>,
    pub inferred: Vec<String>,
    pub quarantined: Vec<String>,
    pub finish_action: Option<String>,
}

/// Creates and reads the timestamped artifacts of one session
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: Utf8PathBuf,
    id: String,
    marker_timestamp: String,
    backup_dir: Utf8PathBuf,
    log_dir: Utf8PathBuf,
    quarantine_dir: Utf8PathBuf,
}

impl SessionStore {
    /// Create a session stamped with the current local time.
    pub fn create<P: AsRef<Utf8Path>>(root: P) -> Result<Self> {
        Self::with_timestamp(root, Local::now().naive_local())
    }

    /// Create a session with an explicit timestamp and its three directories.
    pub fn with_timestamp<P: AsRef<Utf8Path>>(root: P, started: NaiveDateTime) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let id = started.format(TIMESTAMP_FORMAT).to_string();
        let dir_name = format!("session_{}", id);

        let store = Self {
            backup_dir: root.join(BACKUPS_DIR).join(&dir_name),
            log_dir: root.join(LOGS_DIR).join(&dir_name),
            quarantine_dir: root.join(QUARANTINE_DIR).join(&dir_name),
            marker_timestamp: started.format(MARKER_TIMESTAMP_FORMAT).to_string(),
            id,
            root,
        };

        for dir in [&store.backup_dir, &store.log_dir, &store.quarantine_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create session directory: {}", dir))?;
        }

        tracing::info!("Session {} created under {}", store.id, store.root);
        Ok(store)
    }

    /// Session identifier (its creation timestamp)
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn marker_timestamp(&self) -> &str {
        &self.marker_timestamp
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn backup_path(&self) -> Utf8PathBuf {
        self.backup_dir.join(BACKUP_FILE_NAME)
    }

    pub fn results_path(&self) -> Utf8PathBuf {
        self.log_dir.join(RESULTS_FILE_NAME)
    }

    pub fn summary_path(&self) -> Utf8PathBuf {
        self.log_dir.join(SUMMARY_FILE_NAME)
    }

    pub fn quarantine_dir(&self) -> &Utf8Path {
        &self.quarantine_dir
    }

    /// Copy the untouched load-order file into the session backup.
    pub fn backup_original(&self, plugin_file: &Utf8Path) -> Result<Utf8PathBuf> {
        let backup = self.backup_path();
        if backup.exists() {
            bail!("Session backup already exists: {}", backup);
        }
        fs::copy(plugin_file, &backup)
            .with_context(|| format!("Failed to back up {} to {}", plugin_file, backup))?;
        tracing::info!("Backed up {} to {}", plugin_file, backup);
        Ok(backup)
    }

    /// Put the original load-order file back.
    pub fn restore_original(&self, plugin_file: &Utf8Path) -> Result<()> {
        restore_from(&self.backup_path(), plugin_file)
    }

    /// Write `session_summary.yaml`. A session can only be sealed once.
    pub fn seal(&self, summary: &SessionSummary) -> Result<Utf8PathBuf> {
        let path = self.summary_path();
        if path.exists() {
            bail!("Session {} is already sealed", self.id);
        }
        let yaml = serde_yaml_ng::to_string(summary).context("Failed to serialize session summary")?;
        fs::write(&path, yaml).with_context(|| format!("Failed to write {}", path))?;
        tracing::info!("Session {} sealed: {:?}", self.id, summary.outcome);
        Ok(path)
    }

    /// Newest backup under `root`, by session timestamp.
    pub fn latest_backup<P: AsRef<Utf8Path>>(root: P) -> Result<Option<Utf8PathBuf>> {
        let backups = root.as_ref().join(BACKUPS_DIR);
        if !backups.exists() {
            return Ok(None);
        }

        let mut sessions: Vec<Utf8PathBuf> = backups
            .read_dir_utf8()
            .with_context(|| format!("Failed to list {}", backups))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().starts_with("session_"))
            .map(|entry| entry.path().join(BACKUP_FILE_NAME))
            .filter(|path| path.is_file())
            .collect();

        // The timestamp format sorts lexicographically.
        sessions.sort();
        Ok(sessions.pop())
    }

    /// Restore the newest backup under `root` into `plugin_file`.
    ///
    /// # Returns
    /// The backup that was restored, or `None` when there is none
    pub fn restore_latest<P: AsRef<Utf8Path>>(
        root: P,
        plugin_file: &Utf8Path,
    ) -> Result<Option<Utf8PathBuf>> {
        let Some(backup) = Self::latest_backup(root)? else {
            return Ok(None);
        };
        restore_from(&backup, plugin_file)?;
        Ok(Some(backup))
    }
}

fn restore_from(backup: &Utf8Path, plugin_file: &Utf8Path) -> Result<()> {
    fs::copy(backup, plugin_file)
        .with_context(|| format!("Failed to restore {} from {}", plugin_file, backup))?;
    tracing::info!("Restored {} from {}", plugin_file, backup);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn root(temp_dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_session_layout() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::with_timestamp(root(&temp_dir), at(14, 3, 59)).unwrap();

        assert_eq!(store.id(), "2025-05-01_14-03-59");
        assert_eq!(store.marker_timestamp(), "2025-05-01 14:03:59");
        assert!(store
            .backup_path()
            .as_str()
            .ends_with("Backups/session_2025-05-01_14-03-59/plugins_original_backup.txt"));
        assert!(store.quarantine_dir().is_dir());
    }

    #[test]
    fn test_backup_and_restore() {
        let temp_dir = TempDir::new().unwrap();
        let root = root(&temp_dir);
        let plugin_file = root.join("plugins.txt");
        fs::write(&plugin_file, "A.esm\nB.esp\n").unwrap();

        let store = SessionStore::with_timestamp(&root, at(10, 0, 0)).unwrap();
        store.backup_original(&plugin_file).unwrap();
        assert!(store.backup_original(&plugin_file).is_err());

        fs::write(&plugin_file, "A.esm\n").unwrap();
        store.restore_original(&plugin_file).unwrap();
        assert_eq!(fs::read_to_string(&plugin_file).unwrap(), "A.esm\nB.esp\n");
    }

    #[test]
    fn test_restore_latest_picks_newest() {
        let temp_dir = TempDir::new().unwrap();
        let root = root(&temp_dir);
        let plugin_file = root.join("plugins.txt");

        fs::write(&plugin_file, "old\n").unwrap();
        SessionStore::with_timestamp(&root, at(9, 0, 0))
            .unwrap()
            .backup_original(&plugin_file)
            .unwrap();
        fs::write(&plugin_file, "new\n").unwrap();
        SessionStore::with_timestamp(&root, at(11, 0, 0))
            .unwrap()
            .backup_original(&plugin_file)
            .unwrap();

        fs::write(&plugin_file, "scrambled\n").unwrap();
        let restored = SessionStore::restore_latest(&root, &plugin_file)
            .unwrap()
            .unwrap();
        assert!(restored.as_str().contains("2025-05-01_11-00-00"));
        assert_eq!(fs::read_to_string(&plugin_file).unwrap(), "new\n");
    }

    #[test]
    fn test_restore_latest_without_backups() {
        let temp_dir = TempDir::new().unwrap();
        let root = root(&temp_dir);
        let plugin_file = root.join("plugins.txt");
        assert!(SessionStore::restore_latest(&root, &plugin_file)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_seal_only_once() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::with_timestamp(root(&temp_dir), at(12, 0, 0)).unwrap();
        let summary = SessionSummary {
            session: store.id().to_string(),
            outcome: SessionOutcome::Success,
            counts: LoadOrderSummary::default(),
            metrics: MetricsSnapshot::default(),
            failed: vec!["D.esp".to_string()],
            inferred: Vec::new(),
            quarantined: Vec::new(),
            finish_action: Some("comment".to_string()),
        };

        let path = store.seal(&summary).unwrap();
        let yaml = fs::read_to_string(path).unwrap();
        assert!(yaml.contains("outcome: success"));
        assert!(yaml.contains("D.esp"));
        assert!(store.seal(&summary).is_err());
    }
}
