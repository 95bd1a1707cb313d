use crate::models::UserConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// File name of the user configuration inside the config directory
pub const CONFIG_FILE_NAME: &str = "crashbisect.yaml";

/// Prefix of environment variables that override file values.
///
/// Nested keys use `__`, e.g. `CRASHBISECT_SETTINGS__BATCH_SIZE=4`.
pub const ENV_PREFIX: &str = "CRASHBISECT";

/// Configuration manager for loading and saving `crashbisect.yaml`.
///
/// Values are layered: built-in defaults, then the YAML file, then
/// `CRASHBISECT_*` environment variables.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory containing `crashbisect.yaml`, created if missing
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
        })
    }

    /// Load the user configuration.
    ///
    /// A default file is written first when none exists, so the operator
    /// has something to edit after the first run.
    ///
    /// # Returns
    /// The merged, unvalidated UserConfig
    pub fn load_user_config(&self) -> Result<UserConfig> {
        if !self.config_path.exists() {
            tracing::warn!(
                "Config file not found at {}, writing defaults",
                self.config_path
            );
            self.save_user_config(&UserConfig::default())?;
        }

        let settings = config::Config::builder()
            .add_source(
                config::File::from(self.config_path.as_std_path())
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config: {}", self.config_path))?;

        let config: UserConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse config: {}", self.config_path))?;

        tracing::info!("Loaded config from {}", self.config_path);
        Ok(config)
    }

    /// Save the user configuration file.
    ///
    /// # Arguments
    /// * `config` - The UserConfig to save
    pub fn save_user_config(&self, config: &UserConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write config: {}", self.config_path))?;

        tracing::info!("Saved config to {}", self.config_path);
        Ok(())
    }

    /// Write a default configuration file.
    ///
    /// # Returns
    /// `false` when a file already exists and `overwrite` is not set
    pub fn init_default(&self, overwrite: bool) -> Result<bool> {
        if self.config_path.exists() && !overwrite {
            return Ok(false);
        }
        self.save_user_config(&UserConfig::default())?;
        Ok(true)
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeoutOutcome;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = ConfigManager::new(&config_path).unwrap();
        (manager, temp_dir)
    }

    #[test]
    fn test_missing_file_written_with_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        assert!(!manager.config_path().exists());

        let config = manager.load_user_config().unwrap();
        assert!(manager.config_path().exists());
        assert_eq!(config.settings.batch_size, 10);
    }

    #[test]
    fn test_load_save_user_config() {
        let (manager, _temp_dir) = create_test_config_manager();

        let mut config = UserConfig::default();
        config.settings.batch_size = 3;
        config.settings.timeout_outcome = TimeoutOutcome::Passed;
        config.paths.game_process_name = Some("Game.exe".to_string());
        manager.save_user_config(&config).unwrap();

        let loaded = manager.load_user_config().unwrap();
        assert_eq!(loaded.settings.batch_size, 3);
        assert_eq!(loaded.settings.timeout_outcome, TimeoutOutcome::Passed);
        assert_eq!(loaded.paths.game_process_name.as_deref(), Some("Game.exe"));
    }

    #[test]
    fn test_init_default_does_not_clobber() {
        let (manager, _temp_dir) = create_test_config_manager();
        assert!(manager.init_default(false).unwrap());

        fs::write(manager.config_path(), "settings:\n  batch_size: 7\n").unwrap();
        assert!(!manager.init_default(false).unwrap());
        assert_eq!(manager.load_user_config().unwrap().settings.batch_size, 7);
    }
}
