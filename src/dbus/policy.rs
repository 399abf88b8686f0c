//! Bus policies and the network facts that affect them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Access policy for one message bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusPolicy {
    /// Unrestricted access to the real bus.
    #[default]
    Allow,
    /// Access through the filtering proxy.
    Filter,
    /// No access at all.
    Block,
}

impl BusPolicy {
    /// Lowercase name used on the command line and in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            BusPolicy::Allow => "allow",
            BusPolicy::Filter => "filter",
            BusPolicy::Block => "block",
        }
    }
}

impl fmt::Display for BusPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BusPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(BusPolicy::Allow),
            "filter" => Ok(BusPolicy::Filter),
            "block" | "none" => Ok(BusPolicy::Block),
            other => Err(format!(
                "invalid D-Bus policy '{}' (expected allow, filter or block)",
                other
            )),
        }
    }
}

/// The two buses a sandbox can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bus {
    /// Per-user session bus.
    User,
    /// Machine-wide system bus.
    System,
}

impl Bus {
    /// Profile directive prefix for this bus.
    pub fn prefix(self) -> &'static str {
        match self {
            Bus::User => "dbus-user",
            Bus::System => "dbus-system",
        }
    }
}

impl fmt::Display for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bus::User => f.write_str("user"),
            Bus::System => f.write_str("system"),
        }
    }
}

/// Policy pair for both buses, fixed for the lifetime of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusPolicies {
    /// Session bus policy.
    pub user: BusPolicy,
    /// System bus policy.
    pub system: BusPolicy,
}

impl BusPolicies {
    /// Create a policy pair.
    pub fn new(user: BusPolicy, system: BusPolicy) -> Self {
        Self { user, system }
    }

    /// Policy for one bus.
    pub fn get(&self, bus: Bus) -> BusPolicy {
        match bus {
            Bus::User => self.user,
            Bus::System => self.system,
        }
    }

    /// Whether either bus goes through the proxy.
    pub fn needs_proxy(&self) -> bool {
        self.user == BusPolicy::Filter || self.system == BusPolicy::Filter
    }

    /// Whether both buses are left untouched.
    pub fn all_allowed(&self) -> bool {
        self.user == BusPolicy::Allow && self.system == BusPolicy::Allow
    }
}

/// Network configuration of the sandbox, as far as abstract sockets care.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkPolicy {
    /// The sandbox has no network namespace access at all (`--net=none`).
    pub no_network: bool,
    /// A network bridge is configured, so the sandbox has its own namespace.
    pub bridge_configured: bool,
    /// Allowed socket protocol families (comma-separated), if restricted.
    pub protocols: Option<String>,
}

impl NetworkPolicy {
    /// Whether an abstract unix socket in the host network namespace could
    /// still be reachable from the sandbox.
    pub fn abstract_socket_reachable(&self) -> bool {
        if self.no_network || self.bridge_configured {
            return false;
        }
        match &self.protocols {
            Some(list) => list.split(',').any(|p| p.trim() == "unix"),
            None => true,
        }
    }
}
