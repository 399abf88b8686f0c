//! busgate: D-Bus mediation for sandboxed processes.
//!
//! Entry point for the busgate binary: CLI parsing, privilege drop for
//! setuid installs, logging and audit setup, configuration loading and
//! subcommand dispatch.
//!
//! # I/O Architecture
//!
//! - **Audit logging** goes to syslog, never to stdout/stderr
//! - **Debug logging** goes to stderr through `tracing`
//! - **stdout** carries only subcommand output (`check-name`, `proxy-args`, ...)

use std::process::ExitCode;

use anyhow::{Context, Result};
use busgate::{cli::Cli, cli_handler, config::ConfigLoader, dbus::privilege, telemetry};
use clap::Parser;
use tracing::{debug, warn};

fn main() -> Result<ExitCode> {
    // Effective root is only taken back around mount operations.
    privilege::drop_to_real_user().context("Failed to drop privileges")?;

    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    init_tracing(cli.verbose, &config.general.log_level)?;

    debug!("Parsed CLI arguments: {:?}", cli);
    debug!("Loaded configuration: {:?}", config);

    // Auditing is best effort: hosts without a syslog socket still run.
    if let Err(e) = telemetry::init_logger() {
        warn!("Audit logging unavailable: {}", e);
    }

    cli_handler::handle_command(cli.command, &config)
}

/// Initialize the tracing subscriber for diagnostic logging.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG` if set, else `general.log_level`, else warnings
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, log_level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if log_level.is_empty() { "warn" } else { log_level })
        }),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
