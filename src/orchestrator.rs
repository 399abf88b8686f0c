//! Applying bus policies inside the sandbox's mount namespace.
//!
//! Runs once, after the proxy is ready and before the sandboxed command
//! starts. Mount operations go through [`MountOps`] so the sequence can be
//! exercised without privileges.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::dbus::address::{self, SESSION_BUS_ADDRESS_ENV, SYSTEM_BUS_SOCKET};
use crate::dbus::hide::resolve_target;
use crate::dbus::{
    Bus, BusPolicies, BusPolicy, DbusError, EffectiveRoot, EmptyOverlay, Environment,
    NetworkPolicy, ProxyError, ProxyHandle,
};
use crate::telemetry::{self, AuditEvent};

/// Mount-namespace operations used by the orchestrator.
pub trait MountOps {
    /// Bind-mount the proxy socket at `proxy` over `target`.
    fn overlay_socket(&mut self, target: &Path, proxy: &Path) -> Result<(), DbusError>;

    /// Make `path` unreachable. Missing paths are not an error.
    fn disable(&mut self, path: &Path) -> Result<(), DbusError>;
}

/// [`MountOps`] on the real host, holding effective root only for the
/// duration of each call.
#[derive(Debug)]
pub struct HostMounts {
    placeholder_dir: PathBuf,
    overlay: Option<EmptyOverlay>,
}

impl HostMounts {
    /// Mounts whose empty placeholder file lives in `placeholder_dir`.
    pub fn new(placeholder_dir: impl Into<PathBuf>) -> Self {
        Self {
            placeholder_dir: placeholder_dir.into(),
            overlay: None,
        }
    }

    fn empty_overlay(&mut self) -> Result<&EmptyOverlay, DbusError> {
        let overlay = match self.overlay.take() {
            Some(overlay) => overlay,
            None => EmptyOverlay::prepare(&self.placeholder_dir)?,
        };
        Ok(&*self.overlay.insert(overlay))
    }
}

impl MountOps for HostMounts {
    fn overlay_socket(&mut self, target: &Path, proxy: &Path) -> Result<(), DbusError> {
        let _root = EffectiveRoot::acquire()?;
        crate::dbus::verify_and_overlay(target, proxy)?;
        Ok(())
    }

    fn disable(&mut self, path: &Path) -> Result<(), DbusError> {
        let _root = EffectiveRoot::acquire()?;
        // Nothing to hide; do not create the placeholder for it.
        if resolve_target(path)?.is_none() {
            debug!("Nothing to hide at {:?}", path);
            return Ok(());
        }
        self.empty_overlay()?.hide(path)?;
        Ok(())
    }
}

/// Result of [`PolicyOrchestrator::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediationReport {
    /// Both buses are allowed; only the staging directory was hidden.
    NothingToMediate,
    /// Mediation is switched off in the configuration.
    Disabled,
    /// Policies were applied.
    Applied {
        /// An abstract bus socket may still be reachable.
        abstract_socket_reachable: bool,
    },
}

/// Applies the bus policies of one sandbox.
#[derive(Debug, Clone)]
pub struct PolicyOrchestrator {
    policies: BusPolicies,
    dbus_enabled: bool,
    network: NetworkPolicy,
    uid: u32,
    home: PathBuf,
    staging_root: PathBuf,
}

impl PolicyOrchestrator {
    /// Orchestrator for `uid`, with mediation enabled and unrestricted network.
    pub fn new(
        policies: BusPolicies,
        uid: u32,
        home: impl Into<PathBuf>,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            policies,
            dbus_enabled: true,
            network: NetworkPolicy::default(),
            uid,
            home: home.into(),
            staging_root: staging_root.into(),
        }
    }

    /// Set the global mediation switch.
    pub fn dbus_enabled(mut self, enabled: bool) -> Self {
        self.dbus_enabled = enabled;
        self
    }

    /// Set the sandbox's network configuration.
    pub fn network(mut self, network: NetworkPolicy) -> Self {
        self.network = network;
        self
    }

    /// Overlay and hide bus sockets according to the policies, rewrite the
    /// session bus address and report residual risk.
    ///
    /// Filtered sockets are taken out of `handle` as they are mounted.
    pub fn apply(
        &self,
        handle: &mut ProxyHandle,
        mounts: &mut dyn MountOps,
        env: &mut dyn Environment,
    ) -> Result<MediationReport, DbusError> {
        if self.policies.all_allowed() {
            mounts.disable(&self.staging_root)?;
            return Ok(MediationReport::NothingToMediate);
        }

        if !self.dbus_enabled {
            mounts.disable(&self.staging_root)?;
            warn!("D-Bus handling is disabled in the busgate configuration");
            telemetry::record(AuditEvent::MediationDisabled { uid: self.uid });
            return Ok(MediationReport::Disabled);
        }

        if self.policies.user != BusPolicy::Allow {
            self.apply_user(handle, mounts, env)?;
        }

        let system = Path::new(SYSTEM_BUS_SOCKET);
        match self.policies.system {
            BusPolicy::Filter => {
                let proxy = take_socket(handle, Bus::System)?;
                mounts.overlay_socket(system, &proxy)?;
                mediated(Bus::System, BusPolicy::Filter, system);
            }
            BusPolicy::Block => {
                mounts.disable(system)?;
                mediated(Bus::System, BusPolicy::Block, system);
            }
            BusPolicy::Allow => {}
        }

        // Only after the sockets are mounted.
        mounts.disable(&self.staging_root)?;

        let abstract_socket_reachable = self.network.abstract_socket_reachable();
        if abstract_socket_reachable {
            warn!(
                "An abstract unix socket for the session bus might still be available. \
                 Use a network namespace or remove unix from the protocol set."
            );
            telemetry::record(AuditEvent::AbstractSocketRisk { uid: self.uid });
        }

        info!(
            "D-Bus policies applied (user: {}, system: {})",
            self.policies.user, self.policies.system
        );
        Ok(MediationReport::Applied {
            abstract_socket_reachable,
        })
    }

    fn apply_user(
        &self,
        handle: &mut ProxyHandle,
        mounts: &mut dyn MountOps,
        env: &mut dyn Environment,
    ) -> Result<(), DbusError> {
        let canonical = address::user_bus_socket(self.uid);
        let original = env
            .get(SESSION_BUS_ADDRESS_ENV)
            .and_then(|addr| address::socket_path(&addr))
            .unwrap_or_else(|| canonical.clone());

        if self.policies.user == BusPolicy::Filter {
            let proxy = take_socket(handle, Bus::User)?;
            mounts.overlay_socket(&canonical, &proxy)?;
        } else {
            mounts.disable(&canonical)?;
        }
        mediated(Bus::User, self.policies.user, &canonical);

        if original != canonical {
            debug!("Hiding custom session bus socket {:?}", original);
            mounts.disable(&original)?;
        }

        env.set(SESSION_BUS_ADDRESS_ENV, &address::user_bus_address(self.uid))?;

        // dbus-launch state could start an unmediated bus.
        mounts.disable(&self.home.join(".dbus"))?;
        Ok(())
    }
}

fn take_socket(handle: &mut ProxyHandle, bus: Bus) -> Result<PathBuf, ProxyError> {
    handle
        .take_socket(bus)
        .ok_or_else(|| ProxyError::MissingSocket(bus.to_string()))
}

fn mediated(bus: Bus, policy: BusPolicy, path: &Path) {
    debug!("{} bus: {} at {:?}", bus, policy, path);
    telemetry::record(AuditEvent::BusMediated {
        bus,
        policy,
        path: path.display().to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbus::channel::ReadinessChannel;
    use crate::dbus::MapEnv;
    use std::fs::File;
    use std::process::Command;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        Overlay(PathBuf, PathBuf),
        Disable(PathBuf),
    }

    #[derive(Default)]
    struct RecordingMounts {
        ops: Vec<Op>,
    }

    impl MountOps for RecordingMounts {
        fn overlay_socket(&mut self, target: &Path, proxy: &Path) -> Result<(), DbusError> {
            self.ops
                .push(Op::Overlay(target.to_path_buf(), proxy.to_path_buf()));
            Ok(())
        }

        fn disable(&mut self, path: &Path) -> Result<(), DbusError> {
            self.ops.push(Op::Disable(path.to_path_buf()));
            Ok(())
        }
    }

    fn handle_with(user: Option<&str>, system: Option<&str>) -> ProxyHandle {
        let (read, write) = nix::unistd::pipe().unwrap();
        drop(write);
        let child = Command::new("/bin/sh")
            .args(["-c", "exit 0"])
            .spawn()
            .unwrap();
        ProxyHandle::running(
            child,
            ReadinessChannel::new(File::from(read)),
            user.map(PathBuf::from),
            system.map(PathBuf::from),
        )
    }

    fn orchestrator(user: BusPolicy, system: BusPolicy) -> PolicyOrchestrator {
        PolicyOrchestrator::new(
            BusPolicies::new(user, system),
            1000,
            "/home/alice",
            "/run/busgate/dbus",
        )
    }

    fn disable(path: &str) -> Op {
        Op::Disable(PathBuf::from(path))
    }

    #[test]
    fn test_all_allowed_only_hides_staging() {
        let mut mounts = RecordingMounts::default();
        let mut env = MapEnv::new();
        let report = orchestrator(BusPolicy::Allow, BusPolicy::Allow)
            .apply(&mut ProxyHandle::idle(), &mut mounts, &mut env)
            .unwrap();

        assert_eq!(report, MediationReport::NothingToMediate);
        assert_eq!(mounts.ops, vec![disable("/run/busgate/dbus")]);
        assert_eq!(env, MapEnv::new());
    }

    #[test]
    fn test_disabled_mediation() {
        let mut mounts = RecordingMounts::default();
        let mut env = MapEnv::new();
        let report = orchestrator(BusPolicy::Block, BusPolicy::Block)
            .dbus_enabled(false)
            .apply(&mut ProxyHandle::idle(), &mut mounts, &mut env)
            .unwrap();

        assert_eq!(report, MediationReport::Disabled);
        assert_eq!(mounts.ops, vec![disable("/run/busgate/dbus")]);
        assert_eq!(env.get(SESSION_BUS_ADDRESS_ENV), None);
    }

    #[test]
    fn test_filter_user_block_system() {
        let mut handle = handle_with(Some("/run/busgate/dbus/1000/7-user"), None);
        let mut mounts = RecordingMounts::default();
        let mut env = MapEnv::new();

        let report = orchestrator(BusPolicy::Filter, BusPolicy::Block)
            .network(NetworkPolicy {
                no_network: true,
                ..Default::default()
            })
            .apply(&mut handle, &mut mounts, &mut env)
            .unwrap();

        assert_eq!(
            report,
            MediationReport::Applied {
                abstract_socket_reachable: false
            }
        );
        assert_eq!(
            mounts.ops,
            vec![
                Op::Overlay(
                    PathBuf::from("/run/user/1000/bus"),
                    PathBuf::from("/run/busgate/dbus/1000/7-user"),
                ),
                disable("/home/alice/.dbus"),
                disable("/run/dbus/system_bus_socket"),
                disable("/run/busgate/dbus"),
            ]
        );
        assert_eq!(
            env.get(SESSION_BUS_ADDRESS_ENV).as_deref(),
            Some("unix:path=/run/user/1000/bus")
        );
        assert!(handle.socket(Bus::User).is_none());
        handle.stop().unwrap();
    }

    #[test]
    fn test_custom_session_address_is_hidden() {
        let mut mounts = RecordingMounts::default();
        let mut env =
            MapEnv::new().with(SESSION_BUS_ADDRESS_ENV, "unix:path=/tmp/dbus-abc,guid=0123");

        orchestrator(BusPolicy::Block, BusPolicy::Allow)
            .apply(&mut ProxyHandle::idle(), &mut mounts, &mut env)
            .unwrap();

        assert_eq!(
            mounts.ops,
            vec![
                disable("/run/user/1000/bus"),
                disable("/tmp/dbus-abc"),
                disable("/home/alice/.dbus"),
                disable("/run/busgate/dbus"),
            ]
        );
        assert_eq!(
            env.get(SESSION_BUS_ADDRESS_ENV).as_deref(),
            Some("unix:path=/run/user/1000/bus")
        );
    }

    #[test]
    fn test_abstract_session_address_falls_back_to_canonical() {
        let mut mounts = RecordingMounts::default();
        let mut env = MapEnv::new().with(SESSION_BUS_ADDRESS_ENV, "unix:abstract=/tmp/dbus-XYZ");

        orchestrator(BusPolicy::Block, BusPolicy::Allow)
            .apply(&mut ProxyHandle::idle(), &mut mounts, &mut env)
            .unwrap();

        assert!(!mounts.ops.contains(&disable("/tmp/dbus-XYZ")));
        assert_eq!(mounts.ops.len(), 3);
    }

    #[test]
    fn test_filter_system_only() {
        let mut handle = handle_with(None, Some("/run/busgate/dbus/1000/7-system"));
        let mut mounts = RecordingMounts::default();
        let mut env = MapEnv::new();

        let report = orchestrator(BusPolicy::Allow, BusPolicy::Filter)
            .apply(&mut handle, &mut mounts, &mut env)
            .unwrap();

        assert_eq!(
            report,
            MediationReport::Applied {
                abstract_socket_reachable: true
            }
        );
        assert_eq!(
            mounts.ops,
            vec![
                Op::Overlay(
                    PathBuf::from("/run/dbus/system_bus_socket"),
                    PathBuf::from("/run/busgate/dbus/1000/7-system"),
                ),
                disable("/run/busgate/dbus"),
            ]
        );
        assert_eq!(env.get(SESSION_BUS_ADDRESS_ENV), None);
        handle.stop().unwrap();
    }

    #[test]
    fn test_filter_without_proxy_socket_fails() {
        let mut mounts = RecordingMounts::default();
        let err = orchestrator(BusPolicy::Filter, BusPolicy::Allow)
            .apply(&mut ProxyHandle::idle(), &mut mounts, &mut MapEnv::new())
            .unwrap_err();
        assert!(matches!(
            err,
            DbusError::Proxy(ProxyError::MissingSocket(_))
        ));
        assert!(mounts.ops.is_empty());
    }

    #[test]
    fn test_protocol_set_without_unix_suppresses_risk() {
        let report = orchestrator(BusPolicy::Block, BusPolicy::Block)
            .network(NetworkPolicy {
                protocols: Some("inet,inet6".to_string()),
                ..Default::default()
            })
            .apply(
                &mut ProxyHandle::idle(),
                &mut RecordingMounts::default(),
                &mut MapEnv::new(),
            )
            .unwrap();
        assert_eq!(
            report,
            MediationReport::Applied {
                abstract_socket_reachable: false
            }
        );
    }

    #[test]
    fn test_host_mounts_skip_missing_paths() {
        if !nix::unistd::geteuid().is_root() {
            return;
        }
        let dir = tempfile::TempDir::new().unwrap();
        let placeholder_dir = dir.path().join("staging").join(".placeholder");
        let mut mounts = HostMounts::new(&placeholder_dir);

        mounts.disable(&dir.path().join("staging")).unwrap();
        let dangling = dir.path().join(".dbus");
        std::os::unix::fs::symlink(dir.path().join("gone"), &dangling).unwrap();
        mounts.disable(&dangling).unwrap();

        assert!(!dir.path().join("staging").exists());
        assert!(mounts.overlay.is_none());
    }
}
