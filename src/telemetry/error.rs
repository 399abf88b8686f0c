//! Audit logging errors.

use thiserror::Error;

/// Errors setting up the syslog audit trail.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The local syslog socket is unavailable.
    #[error("Cannot reach syslog: {0}")]
    SyslogConnection(String),

    /// [`install`](super::install) was called twice.
    #[error("Audit logger already installed")]
    AlreadyInitialized,
}
