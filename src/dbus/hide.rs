//! Hiding filesystem paths inside the mount namespace.
//!
//! Directories are covered by an empty read-only tmpfs. Anything else
//! (sockets, regular files) is covered by a bind mount of an empty, read-only
//! placeholder file. Symlinks are resolved before deciding, and paths that
//! do not resolve are left alone: there is nothing to reach.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::mount::{mount, MsFlags};
use tracing::debug;

use super::error::OverlayError;

/// Name of the placeholder file created inside the placeholder directory.
const PLACEHOLDER_NAME: &str = ".empty";

/// What [`EmptyOverlay::hide`] did to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hidden {
    /// Covered by an empty tmpfs.
    Directory,
    /// Covered by the empty placeholder file.
    File,
    /// The path does not exist.
    Missing,
}

/// Covers paths with empty content.
#[derive(Debug, Clone)]
pub struct EmptyOverlay {
    placeholder: PathBuf,
}

impl EmptyOverlay {
    /// Create (or reuse) the empty placeholder file inside `dir`.
    ///
    /// `dir` should not be writable by the sandboxed user.
    pub fn prepare(dir: &Path) -> Result<Self, OverlayError> {
        fs::create_dir_all(dir).map_err(OverlayError::Placeholder)?;
        let placeholder = dir.join(PLACEHOLDER_NAME);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o444)
            .open(&placeholder)
        {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let meta = fs::symlink_metadata(&placeholder).map_err(OverlayError::Placeholder)?;
                if !meta.is_file() || meta.len() != 0 {
                    return Err(OverlayError::Placeholder(std::io::Error::new(
                        ErrorKind::InvalidData,
                        format!("{} is not an empty regular file", placeholder.display()),
                    )));
                }
            }
            Err(e) => return Err(OverlayError::Placeholder(e)),
        }
        Ok(Self { placeholder })
    }

    /// Path of the placeholder file.
    pub fn placeholder(&self) -> &Path {
        &self.placeholder
    }

    /// Hide `path`. Symlinks are resolved first, since mount(2) follows
    /// them; a dangling link is treated as missing.
    pub fn hide(&self, path: &Path) -> Result<Hidden, OverlayError> {
        let Some(target) = resolve_target(path)? else {
            debug!("Nothing to hide at {:?}", path);
            return Ok(Hidden::Missing);
        };
        let meta = fs::metadata(&target).map_err(|e| OverlayError::Stat {
            path: target.clone(),
            source: e,
        })?;

        if meta.is_dir() {
            mount_empty_tmpfs(&target)?;
            debug!("Hid directory {:?} ({:?})", path, target);
            Ok(Hidden::Directory)
        } else {
            bind(&self.placeholder, &target, MsFlags::MS_BIND)?;
            bind(
                &self.placeholder,
                &target,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_NOSUID,
            )?;
            debug!("Hid {:?} ({:?})", path, target);
            Ok(Hidden::File)
        }
    }
}

/// Resolve `path` through all symlinks. `None` when nothing exists there,
/// including when the final link dangles.
pub fn resolve_target(path: &Path) -> Result<Option<PathBuf>, OverlayError> {
    match fs::canonicalize(path) {
        Ok(target) => Ok(Some(target)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(OverlayError::Stat {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn mount_empty_tmpfs(path: &Path) -> Result<(), OverlayError> {
    mount(
        Some("tmpfs"),
        path,
        Some("tmpfs"),
        MsFlags::MS_RDONLY | MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
        Some("mode=0755,size=0"),
    )
    .map_err(|e| OverlayError::Mount {
        source_path: PathBuf::from("tmpfs"),
        target: path.to_path_buf(),
        errno: e,
    })
}

fn bind(source: &Path, target: &Path, flags: MsFlags) -> Result<(), OverlayError> {
    mount(Some(source), target, None::<&str>, flags, None::<&str>).map_err(|e| {
        OverlayError::Mount {
            source_path: source.to_path_buf(),
            target: target.to_path_buf(),
            errno: e,
        }
    })
}
