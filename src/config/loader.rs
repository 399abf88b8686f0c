//! Configuration loading with hierarchy merging.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::error::ConfigError;
use super::schema::{Config, DbusConfig};

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/busgate/config.toml";

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "busgate";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to system-wide configuration.
    system_path: PathBuf,
    /// Path to user configuration.
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new ConfigLoader with default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a ConfigLoader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    /// Load and merge configuration from all sources.
    ///
    /// Missing system and user files are skipped; a missing `extra` file is
    /// an error. Invalid TOML is always an error. The `[dbus]` table is read
    /// from the system file only: its paths are used with effective root.
    pub fn load(&self, extra: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        if let Some(layer) = self.load_file(&self.system_path)? {
            config.merge(layer);
            debug!("Loaded config from {:?}", self.system_path);
        } else {
            debug!("No config found at {:?}", self.system_path);
        }

        if let Some(layer) = self.load_file(&self.user_path)? {
            merge_unprivileged(&mut config, layer, &self.user_path);
            debug!("Loaded config from {:?}", self.user_path);
        } else {
            debug!("No config found at {:?}", self.user_path);
        }

        if let Some(path) = extra {
            match self.load_file(path)? {
                Some(layer) => {
                    merge_unprivileged(&mut config, layer, path);
                    debug!("Loaded additional config from {:?}", path);
                }
                None => return Err(ConfigError::MissingFile(path.to_path_buf())),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a config file, returning None if it doesn't exist.
    fn load_file(&self, path: &Path) -> Result<Option<Config>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config =
                    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                Ok(Some(config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

/// Merge a layer the invoking user controls, dropping its `[dbus]` table.
fn merge_unprivileged(config: &mut Config, mut layer: Config, path: &Path) {
    if !layer.dbus.is_empty() {
        warn!(
            "Ignoring [dbus] settings in {:?}: only {} may set them",
            path, SYSTEM_CONFIG_PATH
        );
        layer.dbus = DbusConfig::default();
    }
    config.merge(layer);
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
