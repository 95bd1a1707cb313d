use serde::{Deserialize, Serialize};
use thiserror::Error;

/// User configuration from `crashbisect.yaml`
///
/// Every section falls back to its defaults, so a partial file is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub settings: Settings,
    pub core_plugins: CorePlugins,
    pub paths: PathSettings,
    pub debug: DebugSettings,
}

/// How a host that is still running when the wait expires is classified
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutOutcome {
    /// The host never exited on its own: treat as a hang
    #[default]
    Hung,
    /// Surviving the whole wait means the load order is stable
    Passed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Launch timeout in seconds
    pub wait_seconds: u64,

    /// Settle delay after the host has closed, in seconds
    pub after_close_delay: u64,

    /// Standard batch size
    pub batch_size: usize,

    /// Plugin names longer than this are shortened in the status display
    pub truncate_length: usize,

    /// Shorter host polling intervals
    pub turbo_mode: bool,

    /// Retest the whole remaining pool after each isolated failure
    pub turbo_batch_mode: bool,

    pub timeout_outcome: TimeoutOutcome,

    /// Retest each failed plugin alone once the pool is exhausted
    pub retest_failed: bool,

    pub patch_keywords: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wait_seconds: 11,
            after_close_delay: 3,
            batch_size: 10,
            truncate_length: 25,
            turbo_mode: false,
            turbo_batch_mode: false,
            timeout_outcome: TimeoutOutcome::Hung,
            retest_failed: false,
            patch_keywords: default_patch_keywords(),
        }
    }
}

/// The fixed baseline: plugins that must load before anything is tested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorePlugins {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

impl Default for CorePlugins {
    fn default() -> Self {
        Self {
            required: [
                "Oblivion.esm",
                "DLCBattlehornCastle.esp",
                "DLCFrostcrag.esp",
                "DLCHorseArmor.esp",
                "DLCMehrunesRazor.esp",
                "DLCOrrery.esp",
                "DLCShiveringIsles.esp",
                "DLCSpellTomes.esp",
                "DLCThievesDen.esp",
                "DLCVileLair.esp",
                "Knights.esp",
                "AltarESPMain.esp",
                "AltarDeluxe.esp",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            optional: [
                "Unofficial Oblivion Remastered Patch.esp",
                "Unofficial Oblivion Remastered Patch - Deluxe.esp",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// The external load-order file (plugins.txt)
    pub plugin_file: String,

    /// Host executable or its loader
    pub game_exe: String,

    pub game_args: Vec<String>,

    /// Process to track when `game_exe` is a loader that exits immediately
    pub game_process_name: Option<String>,

    /// Directory holding the plugin files; defaults to the plugin file's directory
    pub data_dir: Option<String>,

    /// Root for the Backups/, Logs/ and Quarantine/ session directories
    pub session_root: String,

    /// Processes killed after every launch (crash reporters and the like)
    pub cleanup_processes: Vec<String>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            plugin_file: String::new(),
            game_exe: String::new(),
            game_args: Vec::new(),
            game_process_name: None,
            data_dir: None,
            session_root: ".".to_string(),
            cleanup_processes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    /// Dump the materialized load order before every launch
    pub show_load_order_per_batch: bool,

    pub debug_mode: bool,
}

/// Validation failures for an otherwise well-formed configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be a positive integer")]
    NotPositive { field: &'static str },

    #[error("{field} is not configured")]
    Missing { field: &'static str },
}

fn default_patch_keywords() -> Vec<String> {
    ["patch", "fix", "compat", "merge"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl UserConfig {
    /// Check the values a session cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.batch_size == 0 {
            return Err(ConfigError::NotPositive {
                field: "settings.batch_size",
            });
        }
        if self.settings.wait_seconds == 0 {
            return Err(ConfigError::NotPositive {
                field: "settings.wait_seconds",
            });
        }
        if self.paths.plugin_file.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "paths.plugin_file",
            });
        }
        if self.paths.game_exe.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "paths.game_exe",
            });
        }
        Ok(())
    }
}
