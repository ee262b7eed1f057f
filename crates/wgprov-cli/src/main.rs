//! `wgprov` binary entrypoint.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wgprov_cli::cli::{Cli, Commands};
use wgprov_cli::commands::{NextAddressCommand, PeersCommand, ProvisionCommand};
use wgprov_cli::output::OutputFormat;
use wgprov_cli::{load_settings, CliError};
use wgprov_core::SystemProvisioner;

fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the client config.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(&e)
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let settings = load_settings(cli.config.as_deref())?;
    let provisioner = SystemProvisioner::from_settings(&settings)?;
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Provision(args) => {
            let mut stderr = io::stderr();
            ProvisionCommand::new(&args)
                .execute(&mut stdout, &mut stderr, &provisioner)
                .await?;
        }
        Commands::Peers { format } => {
            PeersCommand::new(OutputFormat::new(format))
                .execute(&mut stdout, &provisioner)
                .await?;
        }
        Commands::NextAddress => {
            NextAddressCommand.execute(&mut stdout, &provisioner).await?;
        }
    }

    Ok(())
}
