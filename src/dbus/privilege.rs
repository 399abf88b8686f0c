//! Scoped effective-root for mount operations.
//!
//! busgate may be installed setuid root. It runs with the invoking user's
//! effective uid and raises it to root only around mount calls:
//!
//! ```ignore
//! {
//!     let _root = EffectiveRoot::acquire()?;
//!     mount(...)?;
//! } // effective uid restored here
//! ```

use nix::unistd::{geteuid, getuid, seteuid, Uid};
use tracing::{trace, warn};

use super::error::PrivilegeError;

/// Guard holding effective uid 0 until dropped.
#[derive(Debug)]
#[must_use = "privileges are released when the guard is dropped"]
pub struct EffectiveRoot {
    restore: Option<Uid>,
}

impl EffectiveRoot {
    /// Raise the effective uid to root.
    ///
    /// A process already running with effective uid 0 gets a guard that
    /// changes nothing on drop.
    pub fn acquire() -> Result<Self, PrivilegeError> {
        let current = geteuid();
        if current.is_root() {
            return Ok(Self { restore: None });
        }
        seteuid(Uid::from_raw(0)).map_err(PrivilegeError::Acquire)?;
        trace!("Effective uid raised to root");
        Ok(Self {
            restore: Some(current),
        })
    }
}

impl Drop for EffectiveRoot {
    fn drop(&mut self) {
        if let Some(uid) = self.restore.take() {
            if let Err(e) = seteuid(uid) {
                warn!("Failed to restore effective uid {}: {}", uid, e);
            } else {
                trace!("Effective uid restored to {}", uid);
            }
        }
    }
}

/// Drop the effective uid to the real uid for a setuid-root start.
///
/// The saved set-user-ID stays root so [`EffectiveRoot::acquire`] keeps
/// working. Does nothing when not running setuid.
pub fn drop_to_real_user() -> Result<(), PrivilegeError> {
    let real = getuid();
    if geteuid() == real {
        return Ok(());
    }
    seteuid(real).map_err(|e| PrivilegeError::Drop {
        uid: real.as_raw(),
        source: e,
    })
}
