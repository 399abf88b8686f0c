//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading or validating busgate configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file exists but could not be read.
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A config file is not valid TOML for the schema.
    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        /// File that could not be parsed.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A file given with `--config` does not exist.
    #[error("Config file {0} not found")]
    MissingFile(PathBuf),

    /// A value parsed but is not usable.
    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        /// Dotted field name, e.g. `dbus.staging_root`.
        field: String,
        /// Why the value was rejected.
        message: String,
    },

    /// `$HOME` could not be determined.
    #[error("Could not determine home directory")]
    NoHomeDirectory,
}
