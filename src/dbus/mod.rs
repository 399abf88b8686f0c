//! D-Bus mediation for sandboxed processes.
//!
//! Each of the two buses gets a policy: `allow` leaves it alone, `block`
//! hides its socket, and `filter` routes it through xdg-dbus-proxy, which
//! enforces the `dbus-user.*` / `dbus-system.*` directives of the profile.
//!
//! # Lifecycle
//!
//! 1. [`ProxyLauncher::start`] launches the proxy (only if a bus is filtered)
//!    and returns a [`ProxyHandle`].
//! 2. Inside the sandbox's mount namespace,
//!    [`PolicyOrchestrator::apply`](crate::orchestrator::PolicyOrchestrator::apply)
//!    overlays the proxy sockets onto the canonical bus paths and hides
//!    everything else.
//! 3. At sandbox exit, [`ProxyHandle::stop`] shuts the proxy down.

pub mod address;
pub mod channel;
pub mod env;
pub mod error;
pub mod handle;
pub mod hide;
pub mod name;
pub mod overlay;
pub mod policy;
pub mod privilege;
pub mod proxy;
pub mod rules;
pub mod spawn;

pub use env::{Environment, MapEnv, ProcessEnv};
pub use error::{DbusError, EnvError, OverlayError, PrivilegeError, ProfileError, ProxyError};
pub use handle::ProxyHandle;
pub use hide::{EmptyOverlay, Hidden};
pub use name::check_name;
pub use overlay::verify_and_overlay;
pub use policy::{Bus, BusPolicies, BusPolicy, NetworkPolicy};
pub use privilege::EffectiveRoot;
pub use proxy::{ProxyArguments, ProxyLauncher};
pub use rules::{check_profile, Consistency, Profile, RuleExtractor};
pub use spawn::{restricted_command, spawn_restricted, PrivilegeProfile};
