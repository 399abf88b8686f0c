//! Audit logging for busgate.
//!
//! Security-relevant mediation events go to syslog with the `BUSGATE` tag.
//! Diagnostic output is separate and goes through `tracing` to stderr.
//!
//! # Usage
//!
//! ```ignore
//! use busgate::telemetry::{self, AuditEvent};
//!
//! telemetry::init_logger()?;
//!
//! // Silently dropped when no logger is installed.
//! telemetry::record(AuditEvent::MediationDisabled { uid: 1000 });
//! ```
//!
//! # Event Format
//!
//! Events are logged as JSON with an ISO8601 timestamp:
//!
//! ```json
//! {"ts":"2026-10-16T09:12:44Z","event":"bus_mediated","bus":"user","policy":"filter","path":"/run/user/1000/bus"}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::AuditEvent;
pub use syslog::{init_logger, install, record, try_audit, AuditLogger, SYSLOG_TAG};
