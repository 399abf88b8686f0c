//! Error types for D-Bus mediation.
//!
//! This module defines structured error types for every mediation stage:
//! - Profile errors (malformed or inconsistent filter directives)
//! - Proxy errors (pipes, spawning, readiness, teardown)
//! - Overlay errors (socket verification, bind mounts, path hiding)
//! - Privilege and environment errors

use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for all mediation operations.
#[derive(Debug, Error)]
pub enum DbusError {
    /// Profile validation or consistency check failed.
    #[error("D-Bus profile error: {0}")]
    Profile(#[from] ProfileError),

    /// Filtering proxy lifecycle failed.
    #[error("D-Bus proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// Socket overlay or path hiding failed.
    #[error("D-Bus socket overlay error: {0}")]
    Overlay(#[from] OverlayError),

    /// Privilege transition failed.
    #[error("Privilege error: {0}")]
    Privilege(#[from] PrivilegeError),

    /// Environment rewrite failed.
    #[error("Environment error: {0}")]
    Env(#[from] EnvError),
}

/// Errors found while checking filter directives in a profile.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// A filter directive exists for a bus whose policy is `allow`.
    #[error("{prefix} filter rule configured, but the bus is not set to filter")]
    RuleWithoutFilter {
        /// Directive prefix (`dbus-user` or `dbus-system`).
        prefix: String,
    },

    /// A directive uses an unknown kind (not own/talk/see/call/broadcast).
    #[error("Unknown D-Bus directive '{kind}' in line '{line}'")]
    UnknownDirective {
        /// The offending directive kind.
        kind: String,
        /// The full profile line.
        line: String,
    },

    /// A directive is missing its value.
    #[error("Missing value for D-Bus directive in line '{line}'")]
    MissingValue {
        /// The full profile line.
        line: String,
    },

    /// A directive names an invalid bus name.
    #[error("Invalid D-Bus name '{name}' in line '{line}'")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// The full profile line.
        line: String,
    },

    /// A call/broadcast directive lacks its `=<rule>` part.
    #[error("Missing rule for D-Bus directive in line '{line}' (expected <name>=<rule>)")]
    MissingRule {
        /// The full profile line.
        line: String,
    },

    /// Failed to read a profile file.
    #[error("Failed to read profile {path}: {source}")]
    Read {
        /// Path to the profile.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the filtering proxy lifecycle.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Failed to create or verify the per-user staging directory.
    #[error("Failed to prepare staging directory {path}: {source}")]
    StagingDir {
        /// The staging directory.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Staging directory exists with the wrong owner or mode.
    #[error("Staging directory {path} has unexpected ownership or mode (uid {uid}, gid {gid}, mode {mode:o})")]
    StagingPerms {
        /// The staging directory.
        path: PathBuf,
        /// Observed owner.
        uid: u32,
        /// Observed group.
        gid: u32,
        /// Observed permission bits.
        mode: u32,
    },

    /// Failed to create a pipe.
    #[error("Failed to create {which} pipe: {source}")]
    Pipe {
        /// Which pipe (status or arguments).
        which: &'static str,
        /// The underlying errno.
        #[source]
        source: nix::Error,
    },

    /// Failed to read the precompiled seccomp filter.
    #[error("Failed to load seccomp filter {path}: {message}")]
    Seccomp {
        /// Path to the filter file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// A seccomp filter is required but none is configured.
    #[error("A seccomp filter is required for xdg-dbus-proxy but none is configured")]
    NoSeccompFilter,

    /// Failed to spawn the proxy process.
    #[error("Failed to spawn {binary}: {source}")]
    Spawn {
        /// Proxy binary path.
        binary: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An argument contained an interior NUL byte and cannot be framed.
    #[error("Proxy argument contains a NUL byte: {0:?}")]
    NulInArgument(String),

    /// Writing to the arguments pipe failed.
    #[error("Failed to write proxy arguments: {0}")]
    WriteArgs(#[source] std::io::Error),

    /// Reading the status pipe failed.
    #[error("Failed to read proxy status: {0}")]
    ReadStatus(#[source] std::io::Error),

    /// The proxy closed the status pipe before signalling readiness.
    #[error("xdg-dbus-proxy closed pipe unexpectedly")]
    ClosedBeforeReady,

    /// A bus is filtered but the handle holds no proxy socket for it.
    #[error("No proxy socket for the {0} bus (was xdg-dbus-proxy started?)")]
    MissingSocket(String),

    /// Waiting for the proxy process failed.
    #[error("Failed to wait for proxy process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Errors from socket overlays and path hiding.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// Failed to open the proxy socket path.
    #[error("Failed to open D-Bus proxy socket {path}: {source}")]
    Open {
        /// The proxy socket path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to stat a path being overlaid or hidden.
    #[error("Failed to stat {path}: {source}")]
    Stat {
        /// The path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The proxy path does not refer to a socket.
    #[error("Refusing to mount {path}: not a socket")]
    NotASocket {
        /// The proxy socket path.
        path: PathBuf,
    },

    /// The bind mount failed.
    #[error("Failed to bind-mount {source_path} over {target}: {errno}")]
    Mount {
        /// Mount source.
        source_path: PathBuf,
        /// Mount target.
        target: PathBuf,
        /// The underlying errno.
        #[source]
        errno: nix::Error,
    },

    /// Failed to prepare the empty placeholder used for hiding.
    #[error("Failed to prepare placeholder for hiding: {0}")]
    Placeholder(#[source] std::io::Error),
}

/// Errors from effective-uid transitions.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    /// Raising the effective uid to root failed.
    #[error("Failed to acquire root privileges (is the binary installed setuid?): {0}")]
    Acquire(#[source] nix::Error),

    /// Dropping the effective uid back failed.
    #[error("Failed to drop privileges to uid {uid}: {source}")]
    Drop {
        /// Target effective uid.
        uid: u32,
        /// The underlying errno.
        #[source]
        source: nix::Error,
    },
}

/// Errors from rewriting the environment.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Key or value cannot be stored in the process environment.
    #[error("cannot modify {key} (invalid key or value)")]
    Invalid {
        /// The variable name.
        key: String,
    },
}
