//! Handle to a running filtering proxy.

use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus};

use tracing::{debug, warn};

use super::channel::ReadinessChannel;
use super::error::ProxyError;
use super::policy::Bus;
use crate::telemetry::{self, AuditEvent};

/// State of the filtering proxy for one sandbox.
///
/// Returned by [`ProxyLauncher::start`](super::proxy::ProxyLauncher::start),
/// consumed by the orchestrator and finally stopped at sandbox exit. An idle
/// handle (nothing launched) has pid 0 and no socket paths.
#[derive(Debug, Default)]
pub struct ProxyHandle {
    child: Option<Child>,
    status: Option<ReadinessChannel>,
    user_socket: Option<PathBuf>,
    system_socket: Option<PathBuf>,
}

impl ProxyHandle {
    /// Handle with no proxy running.
    pub fn idle() -> Self {
        Self::default()
    }

    pub(crate) fn running(
        child: Child,
        status: ReadinessChannel,
        user_socket: Option<PathBuf>,
        system_socket: Option<PathBuf>,
    ) -> Self {
        Self {
            child: Some(child),
            status: Some(status),
            user_socket,
            system_socket,
        }
    }

    /// PID of the proxy process, 0 when idle.
    pub fn pid(&self) -> u32 {
        self.child.as_ref().map_or(0, Child::id)
    }

    /// Proxy socket path for `bus`, if that bus is filtered and its socket
    /// has not been mounted yet.
    pub fn socket(&self, bus: Bus) -> Option<&Path> {
        match bus {
            Bus::User => self.user_socket.as_deref(),
            Bus::System => self.system_socket.as_deref(),
        }
    }

    /// Take the proxy socket path for `bus`, releasing it from the handle.
    pub fn take_socket(&mut self, bus: Bus) -> Option<PathBuf> {
        match bus {
            Bus::User => self.user_socket.take(),
            Bus::System => self.system_socket.take(),
        }
    }

    /// Stop the proxy and reset the handle.
    ///
    /// Closes the status pipe (the proxy's shutdown cue), waits for the
    /// process and warns on a non-zero exit. All fields are cleared even if
    /// waiting fails. Calling this on an idle handle does nothing.
    pub fn stop(&mut self) -> Result<Option<ExitStatus>, ProxyError> {
        self.user_socket = None;
        self.system_socket = None;

        if let Some(status) = self.status.take() {
            status.close();
        }
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };

        let pid = child.id();
        let status = child.wait().map_err(ProxyError::Wait)?;
        match failed_exit_code(&status) {
            Some(code) => warn!("xdg-dbus-proxy (pid {}) exited with code {}", pid, code),
            None => debug!("xdg-dbus-proxy (pid {}) finished: {}", pid, status),
        }

        telemetry::record(AuditEvent::ProxyStop {
            pid,
            exit_code: status.code(),
        });
        Ok(Some(status))
    }
}

/// Exit code of a proxy that exited on its own with a failure. A proxy
/// killed by a signal (e.g. `SIGPIPE` after the status pipe closes) is not
/// a failure.
fn failed_exit_code(status: &ExitStatus) -> Option<i32> {
    status.code().filter(|&code| code != 0)
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        if self.child.is_some()
            && let Err(e) = self.stop()
        {
            warn!("Failed to stop xdg-dbus-proxy: {}", e);
        }
    }
}
