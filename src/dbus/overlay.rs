//! Verified socket overlay.
//!
//! The proxy socket is opened once with `O_PATH | O_NOFOLLOW`, checked to be a
//! socket through the descriptor, and the bind mount is taken from
//! `/proc/self/fd/<fd>`. The object that was checked is the object that gets
//! mounted, even if the path is swapped in between.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use nix::mount::{mount, MsFlags};
use tracing::debug;

use super::error::OverlayError;

/// Open `path` as a path-only reference without following a final symlink.
fn open_path_only(path: &Path) -> Result<File, OverlayError> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_PATH | libc::O_NOFOLLOW)
        .open(path)
        .map_err(|e| OverlayError::Open {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Open `proxy` and confirm it is a socket. Returns the open reference.
pub fn verify_socket(proxy: &Path) -> Result<File, OverlayError> {
    let file = open_path_only(proxy)?;
    let meta = file.metadata().map_err(|e| OverlayError::Stat {
        path: proxy.to_path_buf(),
        source: e,
    })?;
    if !meta.file_type().is_socket() {
        return Err(OverlayError::NotASocket {
            path: proxy.to_path_buf(),
        });
    }
    Ok(file)
}

/// Bind-mount the socket at `proxy` over `target` in the current mount
/// namespace. Fails without mounting if `proxy` is not a socket.
///
/// Requires `CAP_SYS_ADMIN`; callers hold an
/// [`EffectiveRoot`](super::privilege::EffectiveRoot) guard.
pub fn verify_and_overlay(target: &Path, proxy: &Path) -> Result<(), OverlayError> {
    let socket = verify_socket(proxy)?;
    let source = PathBuf::from(format!("/proc/self/fd/{}", socket.as_raw_fd()));

    mount(
        Some(&source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| OverlayError::Mount {
        source_path: proxy.to_path_buf(),
        target: target.to_path_buf(),
        errno: e,
    })?;

    debug!("Mounted D-Bus proxy socket {:?} over {:?}", proxy, target);
    Ok(())
}
