//! Audit event types for structured logging.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dbus::{Bus, BusPolicy};

/// Audit events for D-Bus mediation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Filtering proxy launched and reported ready.
    ProxyStart {
        /// PID of the proxy process.
        pid: u32,
        /// Session bus policy.
        user: BusPolicy,
        /// System bus policy.
        system: BusPolicy,
        /// Number of filter directives sent.
        rules: usize,
    },

    /// Filtering proxy stopped.
    ProxyStop {
        /// PID of the proxy process.
        pid: u32,
        /// Exit code, if it exited normally.
        exit_code: Option<i32>,
    },

    /// A bus path was overlaid or hidden in the sandbox.
    BusMediated {
        /// Which bus.
        bus: Bus,
        /// Policy that was applied.
        policy: BusPolicy,
        /// Path that was mounted over.
        path: String,
    },

    /// Mediation is switched off in the configuration.
    MediationDisabled {
        /// Invoking user.
        uid: u32,
    },

    /// An abstract bus socket may still be reachable from the sandbox.
    AbstractSocketRisk {
        /// Invoking user.
        uid: u32,
    },
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_start_serialization() {
        let event = AuditEvent::ProxyStart {
            pid: 4242,
            user: BusPolicy::Filter,
            system: BusPolicy::Block,
            rules: 3,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"proxy_start\""));
        assert!(json.contains("\"pid\":4242"));
        assert!(json.contains("\"user\":\"filter\""));
        assert!(json.contains("\"system\":\"block\""));
        assert!(json.contains("\"rules\":3"));
        assert!(json.contains("\"ts\""));
    }

    #[test]
    fn test_proxy_stop_serialization() {
        let event = AuditEvent::ProxyStop {
            pid: 4242,
            exit_code: Some(1),
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"proxy_stop\""));
        assert!(json.contains("\"exit_code\":1"));
    }

    #[test]
    fn test_bus_mediated_serialization() {
        let event = AuditEvent::BusMediated {
            bus: Bus::System,
            policy: BusPolicy::Block,
            path: "/run/dbus/system_bus_socket".to_string(),
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"bus_mediated\""));
        assert!(json.contains("\"bus\":\"system\""));
        assert!(json.contains("\"path\":\"/run/dbus/system_bus_socket\""));
    }

    #[test]
    fn test_abstract_socket_risk_serialization() {
        let event = AuditEvent::AbstractSocketRisk { uid: 1000 };
        let json = serde_json::to_string(&event.with_timestamp()).unwrap();
        assert!(json.contains("\"event\":\"abstract_socket_risk\""));
        assert!(json.contains("\"uid\":1000"));
    }
}
