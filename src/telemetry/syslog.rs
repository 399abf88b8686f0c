//! Syslog integration for audit logging.

use std::sync::{Mutex, OnceLock};

use syslog::{Facility, Formatter3164};
use tracing::{debug, error};

use super::error::TelemetryError;
use super::events::AuditEvent;

/// Syslog tag for all audit events.
pub const SYSLOG_TAG: &str = "BUSGATE";

/// Global audit logger instance.
static AUDIT_LOGGER: OnceLock<AuditLogger> = OnceLock::new();

/// Audit logger that writes structured JSON events to syslog.
///
/// The writer sits behind a mutex because the logger lives in a global
/// `OnceLock` and is used through shared references.
pub struct AuditLogger {
    /// None indicates a null logger.
    writer: Option<Mutex<syslog::Logger<syslog::LoggerBackend, Formatter3164>>>,
}

impl AuditLogger {
    /// Create a new audit logger connected to the local syslog socket.
    pub fn new() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_AUTHPRIV,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer = syslog::unix(formatter)
            .map_err(|e| TelemetryError::SyslogConnection(e.to_string()))?;

        debug!("Connected to syslog with tag '{}'", SYSLOG_TAG);
        Ok(Self {
            writer: Some(Mutex::new(writer)),
        })
    }

    /// Create a null audit logger that discards all events.
    pub fn new_null() -> Self {
        Self { writer: None }
    }

    /// Log an audit event as timestamped JSON.
    pub fn log(&self, event: AuditEvent) {
        let Some(ref writer) = self.writer else {
            return;
        };

        let json = match serde_json::to_string(&event.with_timestamp()) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        match writer.lock() {
            Ok(mut writer) => {
                if let Err(e) = writer.info(&json) {
                    error!("Failed to write to syslog: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to acquire syslog writer lock: {}", e);
            }
        }
        debug!("Logged audit event: {}", json);
    }

    /// Check if this is a null logger.
    pub fn is_null(&self) -> bool {
        self.writer.is_none()
    }
}

/// Install the global audit logger. Call once at startup.
pub fn init_logger() -> Result<(), TelemetryError> {
    install(AuditLogger::new()?)
}

/// Install a specific logger, e.g. [`AuditLogger::new_null`] when syslog is
/// unavailable.
pub fn install(logger: AuditLogger) -> Result<(), TelemetryError> {
    AUDIT_LOGGER
        .set(logger)
        .map_err(|_| TelemetryError::AlreadyInitialized)
}

/// The global audit logger, if one was installed.
pub fn try_audit() -> Option<&'static AuditLogger> {
    AUDIT_LOGGER.get()
}

/// Log `event` if an audit logger is installed.
pub fn record(event: AuditEvent) {
    if let Some(logger) = try_audit() {
        logger.log(event);
    }
}
