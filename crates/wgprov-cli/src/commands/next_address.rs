//! `wgprov next-address`.

use std::io::Write;

use wgprov_core::keys::KeyProvider;
use wgprov_core::{DaemonController, Provisioner, RegistryStore};

use crate::error::CliError;

/// Next-address command executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NextAddressCommand;

impl NextAddressCommand {
    /// Prints the address the next peer would receive.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read, the pool is
    /// exhausted, or output fails.
    pub async fn execute<W, S, K, D>(
        &self,
        writer: &mut W,
        provisioner: &Provisioner<S, K, D>,
    ) -> Result<(), CliError>
    where
        W: Write,
        S: RegistryStore + 'static,
        K: KeyProvider,
        D: DaemonController,
    {
        let address = provisioner.preview_next_address().await?;
        writeln!(writer, "{address}")?;
        Ok(())
    }
}
