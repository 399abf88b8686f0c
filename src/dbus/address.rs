//! Bus addresses and the well-known socket locations.
//!
//! D-Bus addresses are `;`-separated lists of `transport:key=value,...`
//! entries. Only the `unix` transport with a `path` key names a filesystem
//! socket that can be overlaid; anything else is passed to the proxy as-is.

use std::path::{Path, PathBuf};

/// Environment variable holding the session bus address.
pub const SESSION_BUS_ADDRESS_ENV: &str = "DBUS_SESSION_BUS_ADDRESS";

/// Prefix of a filesystem unix socket address.
pub const UNIX_PATH_PREFIX: &str = "unix:path=";

/// Fixed location of the system bus socket.
pub const SYSTEM_BUS_SOCKET: &str = "/run/dbus/system_bus_socket";

/// Canonical session bus socket for `uid`.
pub fn user_bus_socket(uid: u32) -> PathBuf {
    PathBuf::from(format!("/run/user/{}/bus", uid))
}

/// Render a filesystem socket path as a bus address.
pub fn unix_path_address(path: &Path) -> String {
    format!("{}{}", UNIX_PATH_PREFIX, path.display())
}

/// Canonical session bus address for `uid` (`unix:path=/run/user/<uid>/bus`).
pub fn user_bus_address(uid: u32) -> String {
    unix_path_address(&user_bus_socket(uid))
}

/// System bus address (`unix:path=/run/dbus/system_bus_socket`).
pub fn system_bus_address() -> String {
    unix_path_address(Path::new(SYSTEM_BUS_SOCKET))
}

/// Extract the socket path from the first entry of an address list, if that
/// entry is a unix transport with a `path` key.
pub fn socket_path(address: &str) -> Option<PathBuf> {
    let first = address.split(';').next()?.trim();
    let params = first.strip_prefix("unix:")?;
    params
        .split(',')
        .find_map(|kv| kv.strip_prefix("path="))
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
}

/// Per-user staging directory below `root`.
pub fn staging_dir(root: &Path, uid: u32) -> PathBuf {
    root.join(uid.to_string())
}

/// Proxy socket for the session bus of sandbox `pid`.
pub fn user_proxy_socket(root: &Path, uid: u32, pid: u32) -> PathBuf {
    staging_dir(root, uid).join(format!("{}-user", pid))
}

/// Proxy socket for the system bus of sandbox `pid`.
pub fn system_proxy_socket(root: &Path, uid: u32, pid: u32) -> PathBuf {
    staging_dir(root, uid).join(format!("{}-system", pid))
}
