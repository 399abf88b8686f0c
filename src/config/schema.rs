//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ConfigError;
use crate::dbus::proxy::{DEFAULT_PROXY_BINARY, DEFAULT_SECCOMP_FILTER, DEFAULT_STAGING_ROOT};

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// D-Bus mediation settings.
    #[serde(default)]
    pub dbus: DbusConfig,
}

impl Config {
    /// Merge another config into this one. Values set in `other` win.
    pub fn merge(&mut self, other: Config) {
        self.general.merge(other.general);
        self.dbus.merge(other.dbus);
    }

    /// Check values that cannot be caught by deserialization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, path) in [
            ("dbus.proxy_binary", self.dbus.proxy_binary()),
            ("dbus.staging_root", self.dbus.staging_root()),
            ("dbus.seccomp_filter", self.dbus.seccomp_filter()),
        ] {
            if !path.is_absolute() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("{} is not an absolute path", path.display()),
                });
            }
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub log_level: String,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        if !other.log_level.is_empty() {
            self.log_level = other.log_level;
        }
    }
}

/// D-Bus mediation settings. Unset fields fall back to built-in defaults.
///
/// Only honoured from the system configuration file.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DbusConfig {
    /// Global mediation switch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Path to xdg-dbus-proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_binary: Option<PathBuf>,

    /// Root of the per-user proxy socket directories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_root: Option<PathBuf>,

    /// Precompiled seccomp filter loaded into the proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seccomp_filter: Option<PathBuf>,

    /// Refuse to start the proxy when the seccomp filter is missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_seccomp: Option<bool>,
}

impl DbusConfig {
    fn merge(&mut self, other: DbusConfig) {
        if other.enabled.is_some() {
            self.enabled = other.enabled;
        }
        if other.proxy_binary.is_some() {
            self.proxy_binary = other.proxy_binary;
        }
        if other.staging_root.is_some() {
            self.staging_root = other.staging_root;
        }
        if other.seccomp_filter.is_some() {
            self.seccomp_filter = other.seccomp_filter;
        }
        if other.require_seccomp.is_some() {
            self.require_seccomp = other.require_seccomp;
        }
    }

    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        self.enabled.is_none()
            && self.proxy_binary.is_none()
            && self.staging_root.is_none()
            && self.seccomp_filter.is_none()
            && self.require_seccomp.is_none()
    }

    /// Whether mediation is enabled (default: yes).
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Proxy binary path.
    pub fn proxy_binary(&self) -> &Path {
        self.proxy_binary
            .as_deref()
            .unwrap_or(Path::new(DEFAULT_PROXY_BINARY))
    }

    /// Staging root path.
    pub fn staging_root(&self) -> &Path {
        self.staging_root
            .as_deref()
            .unwrap_or(Path::new(DEFAULT_STAGING_ROOT))
    }

    /// Seccomp filter path.
    pub fn seccomp_filter(&self) -> &Path {
        self.seccomp_filter
            .as_deref()
            .unwrap_or(Path::new(DEFAULT_SECCOMP_FILTER))
    }

    /// Whether a missing seccomp filter is fatal (default: no, warn only).
    pub fn require_seccomp(&self) -> bool {
        self.require_seccomp.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.dbus.enabled());
        assert_eq!(
            config.dbus.proxy_binary(),
            Path::new("/usr/bin/xdg-dbus-proxy")
        );
        assert_eq!(config.dbus.staging_root(), Path::new("/run/busgate/dbus"));
        assert_eq!(
            config.dbus.seccomp_filter(),
            Path::new("/run/busgate/seccomp/dbus-proxy")
        );
        assert!(!config.dbus.require_seccomp());
        assert!(config.dbus.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_overrides_set_values_only() {
        let mut base: Config = toml::from_str(
            r#"
            [dbus]
            enabled = false
            proxy_binary = "/opt/proxy"
            "#,
        )
        .unwrap();
        let other: Config = toml::from_str(
            r#"
            [dbus]
            staging_root = "/run/other"
            "#,
        )
        .unwrap();

        base.merge(other);
        assert!(!base.dbus.enabled());
        assert_eq!(base.dbus.proxy_binary(), Path::new("/opt/proxy"));
        assert_eq!(base.dbus.staging_root(), Path::new("/run/other"));
    }

    #[test]
    fn test_relative_paths_rejected() {
        let config: Config = toml::from_str(
            r#"
            [dbus]
            proxy_binary = "xdg-dbus-proxy"
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
