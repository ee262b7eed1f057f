//! # wgprov-cli
//!
//! Operator command line for `WireGuard` peer provisioning.
//!
//! Provides commands for:
//! - Provisioning a peer and emitting its client config
//! - Listing the peer registry
//! - Previewing the next allocated address
//!
//! The binary loads [`wgprov_core::ProvisionSettings`], builds a
//! [`wgprov_core::SystemProvisioner`] and dispatches to one of the
//! [`commands`]. Errors map to distinct exit codes via
//! [`CliError::exit_code`].

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, Format, ProvisionArgs};
pub use error::CliError;
pub use output::OutputFormat;

use std::path::Path;

use wgprov_core::ProvisionSettings;

/// Loads settings from `path`, or the built-in defaults.
///
/// # Errors
///
/// Returns a configuration error if the file cannot be read or is invalid.
pub fn load_settings(path: Option<&Path>) -> Result<ProvisionSettings, CliError> {
    let settings = match path {
        Some(path) => ProvisionSettings::from_file(path)?,
        None => {
            let settings = ProvisionSettings::default();
            settings.validate()?;
            settings
        }
    };
    Ok(settings)
}
