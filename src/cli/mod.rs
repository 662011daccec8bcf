//! Command-line interface definitions for the `respawn` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `respawn` binary.
#[derive(Debug, Parser)]
#[command(
    name = "respawn",
    about = "Run a command on a disposable cloud instance that survives preemption",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision an instance, run a command on it, and tear it down.
    #[command(
        name = "run",
        about = "Provision an instance, run a command on it, and tear it down"
    )]
    Run(RunCommand),
}

/// Arguments for the `respawn run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Instance name. A unique `respawn-<id>` name is generated when omitted.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: Option<String>,
    /// Virtual CPUs to request.
    #[arg(long, value_name = "COUNT", default_value_t = 2)]
    pub(crate) cpus: u32,
    /// Memory to request, in gigabytes.
    #[arg(long, value_name = "GB", default_value_t = 4)]
    pub(crate) mem: u32,
    /// Disk space to request, in gigabytes.
    #[arg(long, value_name = "GB", default_value_t = 20)]
    pub(crate) disk: u32,
    /// Request reclaimable capacity. Preempted instances are recreated and
    /// the command is replayed.
    #[arg(long)]
    pub(crate) preemptible: bool,
    /// Hourly price used for cost reporting.
    #[arg(long, value_name = "PRICE", default_value_t = 0.0)]
    pub(crate) price: f64,
    /// Retry budget for the command; defaults to the configured value.
    #[arg(long, value_name = "COUNT")]
    pub(crate) retries: Option<u32>,
    /// Run the command inside this container image on the instance.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) sandbox: Option<String>,
    /// Treat a non-recoverable command failure as success.
    #[arg(long)]
    pub(crate) quiet: bool,
    /// Command to execute on the instance (use -- to separate flags).
    #[arg(required = true, trailing_var_arg = true)]
    pub(crate) command: Vec<String>,
}
