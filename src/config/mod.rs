//! Configuration system for busgate.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Built-in defaults
//! 2. System config: `/etc/busgate/config.toml`
//! 3. User config: `~/.config/busgate/config.toml`
//! 4. Additional config file (via `--config` flag)
//!
//! Missing system and user files are skipped. Scalars set in a later file
//! override earlier ones. The `[dbus]` table is honoured only in the system
//! file, since its paths are created and mounted with effective root; it is
//! ignored with a warning elsewhere.
//!
//! ```toml
//! [general]
//! log_level = "info"
//!
//! [dbus]
//! enabled = true
//! proxy_binary = "/usr/bin/xdg-dbus-proxy"
//! staging_root = "/run/busgate/dbus"
//! seccomp_filter = "/run/busgate/seccomp/dbus-proxy"
//! require_seccomp = false
//! ```

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{Config, DbusConfig, GeneralConfig};
