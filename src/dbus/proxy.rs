//! Launching xdg-dbus-proxy.
//!
//! The proxy is started as `xdg-dbus-proxy --fd=<N> --args=<M>` and receives
//! its real configuration over the arguments pipe. Per filtered bus it gets:
//!
//! ```text
//! <real bus address> <proxy socket path> --filter [--<kind>=<value>...]
//! ```
//!
//! Closing the arguments pipe ends the configuration; one byte on the status
//! pipe means the proxy sockets are listening.

use std::fs::{self, DirBuilder};
use std::io::ErrorKind;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::Child;

use nix::unistd::{getgid, getuid};
use tracing::{debug, info, warn};

use super::address::{self, SESSION_BUS_ADDRESS_ENV};
use super::channel::{ConfigSink, ProxyPipes, Readiness};
use super::env::Environment;
use super::error::ProxyError;
use super::handle::ProxyHandle;
use super::policy::{Bus, BusPolicies, BusPolicy};
use super::rules::RuleExtractor;
use super::spawn::{spawn_restricted, PrivilegeProfile};
use crate::telemetry::{self, AuditEvent};

/// Default location of the proxy binary.
pub const DEFAULT_PROXY_BINARY: &str = "/usr/bin/xdg-dbus-proxy";

/// Default root below which per-user staging directories live.
pub const DEFAULT_STAGING_ROOT: &str = "/run/busgate/dbus";

/// Default precompiled seccomp filter for the proxy.
pub const DEFAULT_SECCOMP_FILTER: &str = "/run/busgate/seccomp/dbus-proxy";

/// Required permission bits of a staging directory.
const STAGING_MODE: u32 = 0o700;

/// The configuration stream for one proxy start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyArguments {
    /// Arguments in the order they are written to the pipe.
    pub args: Vec<String>,
    /// Proxy socket for the session bus, when filtered.
    pub user_socket: Option<PathBuf>,
    /// Proxy socket for the system bus, when filtered.
    pub system_socket: Option<PathBuf>,
    /// Number of filter directives among `args`.
    pub rules: usize,
}

/// Starts the filtering proxy for one sandbox.
#[derive(Debug, Clone)]
pub struct ProxyLauncher {
    proxy_binary: PathBuf,
    staging_root: PathBuf,
    uid: u32,
    gid: u32,
    pid: u32,
    seccomp_filter: Option<PathBuf>,
    require_seccomp: bool,
}

impl ProxyLauncher {
    /// Launcher for the invoking user and this process.
    pub fn new(proxy_binary: impl Into<PathBuf>, staging_root: impl Into<PathBuf>) -> Self {
        Self {
            proxy_binary: proxy_binary.into(),
            staging_root: staging_root.into(),
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
            pid: std::process::id(),
            seccomp_filter: None,
            require_seccomp: false,
        }
    }

    /// Name proxy sockets after `pid` instead of this process.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Load a precompiled seccomp filter into the proxy.
    pub fn with_seccomp(mut self, filter: Option<PathBuf>) -> Self {
        self.seccomp_filter = filter;
        self
    }

    /// Fail instead of warning when the seccomp filter is missing.
    pub fn require_seccomp(mut self, required: bool) -> Self {
        self.require_seccomp = required;
        self
    }

    /// The seccomp filter to load into the proxy, if one is available.
    ///
    /// A missing filter file is an error when required, else the proxy runs
    /// unfiltered with a warning.
    pub fn seccomp_filter(&self) -> Result<Option<PathBuf>, ProxyError> {
        let Some(path) = &self.seccomp_filter else {
            if self.require_seccomp {
                return Err(ProxyError::NoSeccompFilter);
            }
            warn!("No seccomp filter configured, xdg-dbus-proxy runs unfiltered");
            return Ok(None);
        };

        match fs::metadata(path) {
            Ok(_) => Ok(Some(path.clone())),
            Err(e) if e.kind() == ErrorKind::NotFound && !self.require_seccomp => {
                warn!(
                    "Seccomp filter {:?} not found, xdg-dbus-proxy runs unfiltered",
                    path
                );
                Ok(None)
            }
            Err(e) => Err(ProxyError::Seccomp {
                path: path.clone(),
                message: e.to_string(),
            }),
        }
    }

    /// Per-user staging directory.
    pub fn staging_dir(&self) -> PathBuf {
        address::staging_dir(&self.staging_root, self.uid)
    }

    /// Create the staging directory if missing and check its owner and mode.
    ///
    /// Creating it below a root-owned staging root needs effective root.
    pub fn ensure_staging_dir(&self) -> Result<PathBuf, ProxyError> {
        let dir = self.staging_dir();
        let staging_err = |e| ProxyError::StagingDir {
            path: dir.clone(),
            source: e,
        };

        match fs::symlink_metadata(&dir) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Creating {:?} directory for D-Bus proxy sockets", dir);
                match DirBuilder::new().mode(STAGING_MODE).create(&dir) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                    Err(e) => return Err(staging_err(e)),
                }
                std::os::unix::fs::chown(&dir, Some(self.uid), Some(self.gid))
                    .map_err(staging_err)?;
                fs::set_permissions(&dir, fs::Permissions::from_mode(STAGING_MODE))
                    .map_err(staging_err)?;
            }
            Err(e) => return Err(staging_err(e)),
        }

        let meta = fs::symlink_metadata(&dir).map_err(staging_err)?;
        let mode = meta.mode() & 0o7777;
        if !meta.is_dir() || meta.uid() != self.uid || meta.gid() != self.gid || mode != STAGING_MODE
        {
            return Err(ProxyError::StagingPerms {
                path: dir,
                uid: meta.uid(),
                gid: meta.gid(),
                mode,
            });
        }
        Ok(dir)
    }

    /// Compute the configuration stream without launching anything.
    ///
    /// The session bus address is taken verbatim from the environment when
    /// set, else the per-uid default is used.
    pub fn arguments(
        &self,
        policies: BusPolicies,
        rules: RuleExtractor<'_>,
        env: &dyn Environment,
    ) -> ProxyArguments {
        let mut out = ProxyArguments::default();

        for bus in [Bus::User, Bus::System] {
            if policies.get(bus) != BusPolicy::Filter {
                continue;
            }
            let (real, socket) = match bus {
                Bus::User => (
                    env.get(SESSION_BUS_ADDRESS_ENV)
                        .unwrap_or_else(|| address::user_bus_address(self.uid)),
                    address::user_proxy_socket(&self.staging_root, self.uid, self.pid),
                ),
                Bus::System => (
                    address::system_bus_address(),
                    address::system_proxy_socket(&self.staging_root, self.uid, self.pid),
                ),
            };

            let directives = rules.collect_arguments(bus.prefix());
            out.rules += directives.len();
            out.args.push(real);
            out.args.push(socket.display().to_string());
            out.args.push("--filter".to_string());
            out.args.extend(directives);

            match bus {
                Bus::User => out.user_socket = Some(socket),
                Bus::System => out.system_socket = Some(socket),
            }
        }
        out
    }

    /// Launch the proxy and block until it is ready.
    ///
    /// Returns an idle handle when no bus is filtered.
    pub fn start(
        &self,
        policies: BusPolicies,
        rules: RuleExtractor<'_>,
        env: &dyn Environment,
    ) -> Result<ProxyHandle, ProxyError> {
        if !policies.needs_proxy() {
            debug!("No bus is filtered, not starting xdg-dbus-proxy");
            return Ok(ProxyHandle::idle());
        }

        let profile =
            PrivilegeProfile::restricted(self.uid, self.gid).with_seccomp(self.seccomp_filter()?);
        self.ensure_staging_dir()?;
        let plan = self.arguments(policies, rules, env);

        let ProxyPipes {
            mut status,
            config,
            child_status,
            child_args,
        } = ProxyPipes::new()?;

        let status_fd = child_status.as_raw_fd();
        let args_fd = child_args.as_raw_fd();

        info!("Starting {:?}", self.proxy_binary);
        let mut child = spawn_restricted(
            &self.proxy_binary,
            &[format!("--fd={}", status_fd), format!("--args={}", args_fd)],
            &profile,
            &[status_fd, args_fd],
        )?;
        drop(child_status);
        drop(child_args);

        if let Err(e) = send_configuration(config, &plan.args) {
            reap(&mut child);
            return Err(e);
        }

        match status.wait() {
            Ok(Readiness::Ready) => {}
            Ok(Readiness::Failed) => {
                // Let the proxy finish writing its diagnostics.
                if let Err(e) = child.wait() {
                    warn!("Failed to wait for xdg-dbus-proxy: {}", e);
                }
                return Err(ProxyError::ClosedBeforeReady);
            }
            Err(e) => {
                reap(&mut child);
                return Err(e);
            }
        }

        debug!("xdg-dbus-proxy initialized (pid {})", child.id());
        telemetry::record(AuditEvent::ProxyStart {
            pid: child.id(),
            user: policies.user,
            system: policies.system,
            rules: plan.rules,
        });

        Ok(ProxyHandle::running(
            child,
            status,
            plan.user_socket,
            plan.system_socket,
        ))
    }
}

fn send_configuration(mut config: ConfigSink, args: &[String]) -> Result<(), ProxyError> {
    config.send_all(args)?;
    // Closing the write end marks the end of the configuration.
    drop(config.finish()?);
    Ok(())
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbus::env::MapEnv;
    use crate::dbus::rules::Profile;
    use tempfile::TempDir;

    fn launcher(root: &Path) -> ProxyLauncher {
        ProxyLauncher::new("/nonexistent/xdg-dbus-proxy", root).with_pid(42)
    }

    #[test]
    fn test_arguments_for_filtered_user_bus() {
        let dir = TempDir::new().unwrap();
        let l = launcher(dir.path());
        let profile = Profile::from_lines(["dbus-user.talk org.foo", "dbus-user.own", "other.rule x"]);
        let env = MapEnv::new();

        let plan = l.arguments(
            BusPolicies::new(BusPolicy::Filter, BusPolicy::Block),
            profile.rules(),
            &env,
        );

        let uid = getuid().as_raw();
        let socket = address::user_proxy_socket(dir.path(), uid, 42);
        assert_eq!(
            plan.args,
            vec![
                address::user_bus_address(uid),
                socket.display().to_string(),
                "--filter".to_string(),
                "--talk=org.foo".to_string(),
            ]
        );
        assert_eq!(plan.user_socket, Some(socket));
        assert_eq!(plan.system_socket, None);
        assert_eq!(plan.rules, 1);
    }

    #[test]
    fn test_arguments_use_environment_address_verbatim() {
        let dir = TempDir::new().unwrap();
        let env = MapEnv::new().with(SESSION_BUS_ADDRESS_ENV, "unix:path=/tmp/dbus-x,guid=ab");
        let profile = Profile::from_lines(Vec::<String>::new());

        let plan = launcher(dir.path()).arguments(
            BusPolicies::new(BusPolicy::Filter, BusPolicy::Allow),
            profile.rules(),
            &env,
        );
        assert_eq!(plan.args[0], "unix:path=/tmp/dbus-x,guid=ab");
        assert_eq!(plan.args.len(), 3);
    }

    #[test]
    fn test_arguments_for_both_buses_in_order() {
        let dir = TempDir::new().unwrap();
        let profile = Profile::from_lines([
            "dbus-system.talk org.freedesktop.login1",
            "dbus-user.see org.bar",
        ]);

        let plan = launcher(dir.path()).arguments(
            BusPolicies::new(BusPolicy::Filter, BusPolicy::Filter),
            profile.rules(),
            &MapEnv::new(),
        );

        assert_eq!(plan.args.len(), 8);
        assert_eq!(plan.args[3], "--see=org.bar");
        assert_eq!(plan.args[4], "unix:path=/run/dbus/system_bus_socket");
        assert_eq!(plan.args[7], "--talk=org.freedesktop.login1");
        assert!(plan.system_socket.is_some());
    }

    #[test]
    fn test_start_without_filter_is_idle() {
        let dir = TempDir::new().unwrap();
        let profile = Profile::default();
        let handle = launcher(dir.path())
            .start(
                BusPolicies::new(BusPolicy::Block, BusPolicy::Allow),
                profile.rules(),
                &MapEnv::new(),
            )
            .unwrap();
        assert_eq!(handle.pid(), 0);
        assert!(!dir.path().join(getuid().as_raw().to_string()).exists());
    }

    #[test]
    fn test_ensure_staging_dir() {
        let dir = TempDir::new().unwrap();
        let l = launcher(dir.path());

        let staging = l.ensure_staging_dir().unwrap();
        let meta = fs::metadata(&staging).unwrap();
        assert_eq!(meta.mode() & 0o7777, 0o700);
        assert_eq!(meta.uid(), getuid().as_raw());

        // Idempotent.
        assert_eq!(l.ensure_staging_dir().unwrap(), staging);
    }

    #[test]
    fn test_ensure_staging_dir_rejects_loose_mode() {
        let dir = TempDir::new().unwrap();
        let l = launcher(dir.path());
        let staging = l.staging_dir();
        fs::create_dir(&staging).unwrap();
        fs::set_permissions(&staging, fs::Permissions::from_mode(0o755)).unwrap();

        let err = l.ensure_staging_dir().unwrap_err();
        assert!(matches!(err, ProxyError::StagingPerms { mode: 0o755, .. }));
    }

    #[test]
    fn test_missing_seccomp_filter_warns_by_default() {
        let dir = TempDir::new().unwrap();
        let l = launcher(dir.path()).with_seccomp(Some(dir.path().join("absent.bpf")));
        assert_eq!(l.seccomp_filter().unwrap(), None);
        assert_eq!(launcher(dir.path()).seccomp_filter().unwrap(), None);
    }

    #[test]
    fn test_missing_seccomp_filter_fails_when_required() {
        let dir = TempDir::new().unwrap();
        let l = launcher(dir.path())
            .with_seccomp(Some(dir.path().join("absent.bpf")))
            .require_seccomp(true);
        assert!(matches!(
            l.seccomp_filter().unwrap_err(),
            ProxyError::Seccomp { .. }
        ));

        let unset = launcher(dir.path()).require_seccomp(true);
        assert!(matches!(
            unset.seccomp_filter().unwrap_err(),
            ProxyError::NoSeccompFilter
        ));

        // Checked before anything is spawned.
        let profile = Profile::default();
        let err = l
            .start(
                BusPolicies::new(BusPolicy::Filter, BusPolicy::Allow),
                profile.rules(),
                &MapEnv::new(),
            )
            .unwrap_err();
        assert!(matches!(err, ProxyError::Seccomp { .. }));
    }

    #[test]
    fn test_present_seccomp_filter_is_used() {
        let dir = TempDir::new().unwrap();
        let filter = dir.path().join("dbus-proxy.bpf");
        fs::write(&filter, [0u8; 8]).unwrap();
        let l = launcher(dir.path())
            .with_seccomp(Some(filter.clone()))
            .require_seccomp(true);
        assert_eq!(l.seccomp_filter().unwrap(), Some(filter));
    }

    #[test]
    fn test_start_with_missing_binary() {
        let dir = TempDir::new().unwrap();
        let profile = Profile::default();
        let err = launcher(dir.path())
            .start(
                BusPolicies::new(BusPolicy::Filter, BusPolicy::Allow),
                profile.rules(),
                &MapEnv::new(),
            )
            .unwrap_err();
        assert!(matches!(err, ProxyError::Spawn { .. }));
    }
}
