//! Subcommand handling for busgate.

use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use nix::mount::{mount, MsFlags};
use nix::sched::{unshare, CloneFlags};
use nix::unistd::{getgid, getuid};
use tracing::{debug, info};

use crate::cli::{Commands, PolicyArgs};
use crate::config::{Config, ConfigError};
use crate::dbus::{
    check_name, check_profile, restricted_command, BusPolicies, Consistency, EffectiveRoot,
    NetworkPolicy, PrivilegeProfile, ProcessEnv, Profile, ProxyHandle, ProxyLauncher,
};
use crate::orchestrator::{HostMounts, PolicyOrchestrator};

/// Directory (below the staging root) holding the empty placeholder file.
const PLACEHOLDER_DIR: &str = ".placeholder";

/// Dispatch a subcommand.
pub fn handle_command(command: Commands, config: &Config) -> Result<ExitCode> {
    match command {
        Commands::CheckName { names } => Ok(run_check_name(&names)),
        Commands::CheckProfile(args) => run_check_profile(&args),
        Commands::ProxyArgs(args) => run_proxy_args(&args, config),
        Commands::Run {
            policy,
            net_none,
            net_bridge,
            protocol,
            command,
        } => {
            let network = NetworkPolicy {
                no_network: net_none,
                bridge_configured: net_bridge,
                protocols: protocol,
            };
            run_mediated(&policy, network, &command, config)
        }
    }
}

fn run_check_name(names: &[String]) -> ExitCode {
    let mut all_valid = true;
    for name in names {
        if check_name(name) {
            println!("{}: valid", name);
        } else {
            println!("{}: invalid", name);
            all_valid = false;
        }
    }
    if all_valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Load the profile and resolve the policies: flag, then profile, then allow.
fn load_policies(args: &PolicyArgs) -> Result<(Profile, BusPolicies)> {
    let profile = Profile::load(&args.profile)?;
    let policies = BusPolicies::new(
        args.dbus_user.or(profile.user_policy).unwrap_or_default(),
        args.dbus_system.or(profile.system_policy).unwrap_or_default(),
    );
    debug!(
        "Policies for {:?}: user {}, system {}",
        args.profile, policies.user, policies.system
    );
    Ok((profile, policies))
}

fn run_check_profile(args: &PolicyArgs) -> Result<ExitCode> {
    let (profile, policies) = load_policies(args)?;
    let (user, system) = check_profile(&profile, policies.user, policies.system)
        .with_context(|| format!("Profile {:?} is inconsistent", args.profile))?;

    for (name, policy, outcome) in [
        ("dbus-user", policies.user, user),
        ("dbus-system", policies.system, system),
    ] {
        let note = match outcome {
            Consistency::NoRules => "no rules".to_string(),
            Consistency::Filtered => "rules applied".to_string(),
            Consistency::IgnoredUnderBlock { rule } => format!("rules ignored (first: {})", rule),
        };
        println!("{} {}: {}", name, policy, note);
    }
    Ok(ExitCode::SUCCESS)
}

fn launcher(config: &Config) -> ProxyLauncher {
    ProxyLauncher::new(config.dbus.proxy_binary(), config.dbus.staging_root())
        .with_seccomp(Some(config.dbus.seccomp_filter().to_path_buf()))
        .require_seccomp(config.dbus.require_seccomp())
}

fn run_proxy_args(args: &PolicyArgs, config: &Config) -> Result<ExitCode> {
    let (profile, policies) = load_policies(args)?;
    check_profile(&profile, policies.user, policies.system)?;

    let plan = launcher(config).arguments(policies, profile.rules(), &ProcessEnv);
    for arg in &plan.args {
        println!("{}", arg);
    }
    Ok(ExitCode::SUCCESS)
}

/// Create the staging root and the per-user staging directory.
fn prepare_staging(launcher: &ProxyLauncher, staging_root: &Path) -> Result<()> {
    let _root = EffectiveRoot::acquire()?;
    DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(staging_root)
        .with_context(|| format!("Failed to create {:?}", staging_root))?;
    launcher.ensure_staging_dir()?;
    Ok(())
}

/// Detach into a private mount namespace so mounts stay local to the sandbox.
fn enter_mount_namespace() -> Result<()> {
    let _root = EffectiveRoot::acquire()?;
    unshare(CloneFlags::CLONE_NEWNS).context("Failed to create mount namespace")?;
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .context("Failed to make mounts private")?;
    Ok(())
}

fn run_mediated(
    args: &PolicyArgs,
    network: NetworkPolicy,
    command: &[String],
    config: &Config,
) -> Result<ExitCode> {
    let (profile, policies) = load_policies(args)?;
    check_profile(&profile, policies.user, policies.system)?;

    let uid = getuid().as_raw();
    let gid = getgid().as_raw();
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDirectory)?;
    let staging_root = config.dbus.staging_root();
    let launcher = launcher(config);

    let mut handle = if policies.needs_proxy() && config.dbus.enabled() {
        prepare_staging(&launcher, staging_root)?;
        launcher
            .start(policies, profile.rules(), &ProcessEnv)
            .context("Failed to start xdg-dbus-proxy")?
    } else {
        ProxyHandle::idle()
    };

    enter_mount_namespace()?;

    let orchestrator = PolicyOrchestrator::new(policies, uid, home, staging_root)
        .dbus_enabled(config.dbus.enabled())
        .network(network);
    let mut mounts = HostMounts::new(staging_root.join(PLACEHOLDER_DIR));
    let report = orchestrator
        .apply(&mut handle, &mut mounts, &mut ProcessEnv)
        .context("Failed to apply D-Bus policy")?;
    debug!("Mediation: {:?}", report);

    let (program, program_args) = command
        .split_first()
        .context("No command given")?;
    info!("Running {:?}", program);
    let status = restricted_command(
        Path::new(program),
        program_args,
        &PrivilegeProfile::restricted(uid, gid),
        &[],
    )?
    .status()
    .with_context(|| format!("Failed to run {}", program))?;

    handle.stop().context("Failed to stop xdg-dbus-proxy")?;

    let code = status.code().unwrap_or(1);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
