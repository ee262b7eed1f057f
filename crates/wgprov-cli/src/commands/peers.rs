//! `wgprov peers`.

use std::io::Write;

use wgprov_core::keys::KeyProvider;
use wgprov_core::{DaemonController, Provisioner, RegistryStore};

use crate::error::CliError;
use crate::output::{OutputFormat, PeerList};

/// Peers command executor.
#[derive(Debug, Clone, Default)]
pub struct PeersCommand {
    format: OutputFormat,
}

impl PeersCommand {
    /// Create a new peers command.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Lists the registry's peers.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read or output fails.
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
        let peers = provisioner.peers().await?;
        self.format.write(writer, &PeerList { peers })
    }
}
