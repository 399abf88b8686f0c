//! busgate: D-Bus mediation for sandboxed processes.
//!
//! A sandbox's access to the session and system bus is either left alone,
//! blocked by hiding the bus sockets, or filtered through xdg-dbus-proxy
//! whose socket is bind-mounted over the canonical bus path.
//!
//! # Architecture
//!
//! - **dbus**: name grammar, profile rules, proxy lifecycle, socket overlays
//! - **orchestrator**: applies both bus policies inside the mount namespace
//! - **config**: hierarchical TOML configuration
//! - **telemetry**: structured syslog audit events

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod dbus;
pub mod orchestrator;
pub mod telemetry;
