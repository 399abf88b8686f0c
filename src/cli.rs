//! Command-line interface definitions for busgate.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::dbus::BusPolicy;

/// D-Bus mediation for sandboxed processes.
///
/// busgate routes a sandbox's session and system bus through xdg-dbus-proxy,
/// or hides them entirely, according to `dbus-user` / `dbus-system` policies
/// and the filter directives in a profile.
#[derive(Parser, Debug)]
#[command(name = "busgate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to additional config file.
    ///
    /// Merged on top of the system and user configs.
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Profile and policy selection shared by several subcommands.
#[derive(Args, Debug, Clone)]
pub struct PolicyArgs {
    /// Profile file with `dbus-user.*` / `dbus-system.*` directives.
    #[arg(long = "profile", value_name = "FILE")]
    pub profile: PathBuf,

    /// Session bus policy: allow, filter or block.
    ///
    /// Overrides a `dbus-user` line in the profile.
    #[arg(long = "dbus-user", value_name = "POLICY")]
    pub dbus_user: Option<BusPolicy>,

    /// System bus policy: allow, filter or block.
    ///
    /// Overrides a `dbus-system` line in the profile.
    #[arg(long = "dbus-system", value_name = "POLICY")]
    pub dbus_system: Option<BusPolicy>,
}

/// Subcommands for busgate.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check D-Bus names against the bus name grammar.
    #[command(name = "check-name")]
    CheckName {
        /// Names to check (e.g. org.freedesktop.Notifications, org.mpris.*).
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Validate the D-Bus directives of a profile against the policies.
    #[command(name = "check-profile")]
    CheckProfile(PolicyArgs),

    /// Print the configuration the proxy would receive, one argument per line.
    #[command(name = "proxy-args")]
    ProxyArgs(PolicyArgs),

    /// Run a command with its D-Bus access mediated.
    Run {
        #[command(flatten)]
        policy: PolicyArgs,

        /// The sandbox has no network access.
        #[arg(long = "net-none")]
        net_none: bool,

        /// The sandbox has its own bridged network namespace.
        #[arg(long = "net-bridge")]
        net_bridge: bool,

        /// Allowed socket protocol families (comma-separated, e.g. unix,inet).
        #[arg(long = "protocol", value_name = "LIST")]
        protocol: Option<String>,

        /// Command and arguments to run.
        #[arg(required = true, last = true)]
        command: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_name_command() {
        let cli = Cli::parse_from(["busgate", "check-name", "org.foo.Bar", "org.*"]);
        match cli.command {
            Commands::CheckName { names } => assert_eq!(names, vec!["org.foo.Bar", "org.*"]),
            _ => panic!("Expected CheckName command"),
        }
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_policy_args() {
        let cli = Cli::parse_from([
            "busgate",
            "-vv",
            "proxy-args",
            "--profile",
            "/etc/busgate/app.profile",
            "--dbus-user",
            "filter",
            "--dbus-system",
            "none",
        ]);

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::ProxyArgs(args) => {
                assert_eq!(args.profile, PathBuf::from("/etc/busgate/app.profile"));
                assert_eq!(args.dbus_user, Some(BusPolicy::Filter));
                assert_eq!(args.dbus_system, Some(BusPolicy::Block));
            }
            _ => panic!("Expected ProxyArgs command"),
        }
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let result = Cli::try_parse_from([
            "busgate",
            "check-profile",
            "--profile",
            "p",
            "--dbus-user",
            "sometimes",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from([
            "busgate",
            "run",
            "--profile",
            "app.profile",
            "--dbus-user",
            "filter",
            "--net-none",
            "--protocol",
            "unix,inet",
            "--",
            "notify-send",
            "--urgency=low",
            "hi",
        ]);

        match cli.command {
            Commands::Run {
                policy,
                net_none,
                net_bridge,
                protocol,
                command,
            } => {
                assert_eq!(policy.dbus_user, Some(BusPolicy::Filter));
                assert_eq!(policy.dbus_system, None);
                assert!(net_none);
                assert!(!net_bridge);
                assert_eq!(protocol.as_deref(), Some("unix,inet"));
                assert_eq!(command, vec!["notify-send", "--urgency=low", "hi"]);
            }
            _ => panic!("Expected Run command"),
        }
    }
}
