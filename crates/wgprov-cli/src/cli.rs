//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Top-level `wgprov` arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "wgprov")]
#[command(version, about = "Provision WireGuard peers", long_about = None)]
pub struct Cli {
    /// Settings file (TOML). Built-in defaults apply when omitted.
    #[arg(short, long, env = "WGPROV_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Provision one new peer and print its client config.
    Provision(ProvisionArgs),

    /// List peers in the registry.
    Peers {
        /// Output format.
        #[arg(short, long, value_enum, default_value_t = Format::Table)]
        format: Format,
    },

    /// Print the address the next peer would receive.
    NextAddress,
}

/// Arguments for `provision`.
#[derive(Args, Debug, Clone)]
pub struct ProvisionArgs {
    /// Public host clients connect to (IP or DNS name, no port).
    #[arg(short, long, env = "WGPROV_ENDPOINT")]
    pub endpoint: String,

    /// Write the config to this file (mode 0600) instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
